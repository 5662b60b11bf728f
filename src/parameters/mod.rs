//! Hierarchical parameter store access
//!
//! Parameters are read once at startup: one recursive listing under the
//! deployment prefix, then one decrypting lookup per secure parameter.

mod file;
mod ssm;


pub use file::FileParameterStore;
pub use ssm::SsmParameterStore;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use crate::signing::SigningError;

/// Errors raised while reading parameters
#[derive(Debug)]
pub enum ParameterError {
    /// IO error reading a parameter file
    Io(std::io::Error),
    /// Parameter file is not valid TOML
    Parse(toml::de::Error),
    /// HTTP failure talking to the parameter service
    Http(reqwest::Error),
    /// Parameter service answered with a non-success status
    Status { status: u16, body: String },
    /// Response body could not be understood
    Decode(String),
    /// A single-parameter lookup found nothing
    NotFound(String),
    /// Request could not be signed
    Signing(SigningError),
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterError::Io(e) => write!(f, "IO error: {}", e),
            ParameterError::Parse(e) => write!(f, "Parse error: {}", e),
            ParameterError::Http(e) => write!(f, "HTTP error: {}", e),
            ParameterError::Status { status, body } => {
                write!(f, "Parameter service returned {}: {}", status, body)
            }
            ParameterError::Decode(msg) => write!(f, "Unexpected response: {}", msg),
            ParameterError::NotFound(name) => write!(f, "Parameter not found: {}", name),
            ParameterError::Signing(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ParameterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParameterError::Io(e) => Some(e),
            ParameterError::Parse(e) => Some(e),
            ParameterError::Http(e) => Some(e),
            ParameterError::Signing(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ParameterError {
    fn from(e: std::io::Error) -> Self {
        ParameterError::Io(e)
    }
}

impl From<toml::de::Error> for ParameterError {
    fn from(e: toml::de::Error) -> Self {
        ParameterError::Parse(e)
    }
}

impl From<reqwest::Error> for ParameterError {
    fn from(e: reqwest::Error) -> Self {
        ParameterError::Http(e)
    }
}

impl From<SigningError> for ParameterError {
    fn from(e: SigningError) -> Self {
        ParameterError::Signing(e)
    }
}

/// One entry of a path listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    /// Plain value, or ciphertext/mask when `secure`
    pub value: String,
    pub secure: bool,
}

/// One page of a path listing
#[derive(Debug, Clone, Default)]
pub struct ParameterPage {
    pub parameters: Vec<Parameter>,
    pub next_token: Option<String>,
}

/// A read-only hierarchical key-value store
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// List parameters under `path`, one page at a time
    async fn get_parameters_by_path(
        &self,
        path: &str,
        recursive: bool,
        next_token: Option<String>,
    ) -> Result<ParameterPage, ParameterError>;

    /// Fetch one parameter, decrypting it when asked
    async fn get_parameter(
        &self,
        name: &str,
        with_decryption: bool,
    ) -> Result<String, ParameterError>;
}

/// Plain-text parameters keyed relative to the prefix they were loaded from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    prefix: String,
    values: BTreeMap<String, String>,
}

impl ParameterSet {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Value for a key relative to the prefix, e.g. `/BROKER/USER`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Full store name of a relative key
    pub fn full_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Read every parameter under `prefix`, decrypting secure values
pub async fn load(
    store: &dyn ParameterStore,
    prefix: &str,
) -> Result<ParameterSet, ParameterError> {
    let mut set = ParameterSet::new(prefix);
    let path = set.prefix().to_string();
    let mut next_token = None;
    let mut secure = Vec::new();

    loop {
        let page = store
            .get_parameters_by_path(&path, true, next_token.take())
            .await?;
        for parameter in page.parameters {
            let key = match parameter.name.strip_prefix(&path) {
                Some(key) if key.starts_with('/') => key,
                _ => continue,
            };
            if parameter.secure {
                secure.push((key.to_string(), parameter.name.clone()));
            } else {
                set.insert(key, parameter.value);
            }
        }
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    for (key, name) in secure {
        let value = store.get_parameter(&name, true).await?;
        set.insert(key, value);
    }

    debug!("Loaded {} parameters under {}", set.len(), path);
    Ok(set)
}
