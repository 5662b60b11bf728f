//! Parameter store backed by a local TOML file
//!
//! ```toml
//! [[parameter]]
//! name = "/PROD/INTEGRATION-APP/BROKER/USER"
//! value = "bridge"
//!
//! [[parameter]]
//! name = "/PROD/INTEGRATION-APP/BROKER/PASSWORD"
//! value = "s3cret"
//! secure = true
//! ```
//!
//! Secure values are masked in path listings and only returned by a
//! decrypting lookup, mirroring the remote service.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Parameter, ParameterError, ParameterPage, ParameterStore};

const MASK: &str = "********";

#[derive(Debug, Clone, Deserialize)]
struct FileParameter {
    name: String,
    value: String,
    #[serde(default)]
    secure: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ParameterFile {
    #[serde(default, rename = "parameter")]
    parameters: Vec<FileParameter>,
}

/// Parameters read from a TOML document
#[derive(Debug, Default)]
pub struct FileParameterStore {
    parameters: Vec<FileParameter>,
}

impl FileParameterStore {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ParameterError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ParameterError> {
        let file: ParameterFile = toml::from_str(content)?;
        Ok(Self {
            parameters: file.parameters,
        })
    }

    fn in_path(name: &str, path: &str, recursive: bool) -> bool {
        let path = path.trim_end_matches('/');
        match name.strip_prefix(path).and_then(|rest| rest.strip_prefix('/')) {
            Some(rest) => recursive || !rest.contains('/'),
            None => false,
        }
    }
}

#[async_trait]
impl ParameterStore for FileParameterStore {
    async fn get_parameters_by_path(
        &self,
        path: &str,
        recursive: bool,
        _next_token: Option<String>,
    ) -> Result<ParameterPage, ParameterError> {
        let parameters = self
            .parameters
            .iter()
            .filter(|p| Self::in_path(&p.name, path, recursive))
            .map(|p| Parameter {
                name: p.name.clone(),
                value: if p.secure {
                    MASK.to_string()
                } else {
                    p.value.clone()
                },
                secure: p.secure,
            })
            .collect();

        Ok(ParameterPage {
            parameters,
            next_token: None,
        })
    }

    async fn get_parameter(
        &self,
        name: &str,
        with_decryption: bool,
    ) -> Result<String, ParameterError> {
        let parameter = self
            .parameters
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ParameterError::NotFound(name.to_string()))?;

        if parameter.secure && !with_decryption {
            return Ok(MASK.to_string());
        }
        Ok(parameter.value.clone())
    }
}
