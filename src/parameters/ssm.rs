//! Parameter service client (JSON protocol)

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Parameter, ParameterError, ParameterPage, ParameterStore};
use crate::signing::{Credentials, Signer, DEFAULT_REGION};

const TARGET_PREFIX: &str = "AmazonSSM";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const SECURE_STRING: &str = "SecureString";
const SERVICE: &str = "ssm";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireParameter {
    name: String,
    #[serde(default)]
    value: String,
    #[serde(rename = "Type", default)]
    kind: String,
}

impl From<WireParameter> for Parameter {
    fn from(p: WireParameter) -> Self {
        Parameter {
            secure: p.kind == SECURE_STRING,
            name: p.name,
            value: p.value,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParametersByPathResponse {
    #[serde(default)]
    parameters: Vec<WireParameter>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParameterResponse {
    parameter: WireParameter,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(rename = "__type", default)]
    kind: String,
}

/// Parameter store reached over HTTP
pub struct SsmParameterStore {
    client: reqwest::Client,
    endpoint: String,
    region: String,
    signer: Option<Signer>,
}

impl SsmParameterStore {
    /// Client for the regional service endpoint
    pub fn for_region(region: &str) -> Self {
        Self::new(format!("https://ssm.{}.amazonaws.com", region)).with_region(region)
    }

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            region: DEFAULT_REGION.to_string(),
            signer: None,
        }
    }

    /// Region requests are signed for
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self.signer = self.signer.take().map(|signer| {
            Signer::new(signer.credentials().clone(), self.region.clone(), SERVICE)
        });
        self
    }

    /// Sign every request with `credentials`
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.signer = Some(Signer::new(credentials, self.region.clone(), SERVICE));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        payload: Value,
    ) -> Result<T, ParameterError> {
        let mut request = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, action))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(payload.to_string())
            .build()?;
        if let Some(signer) = &self.signer {
            signer.sign(&mut request, Utc::now())?;
        }
        let response = self.client.execute(request).await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ParameterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ParameterError::Decode(format!("{}: {}", action, e)))
    }
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get_parameters_by_path(
        &self,
        path: &str,
        recursive: bool,
        next_token: Option<String>,
    ) -> Result<ParameterPage, ParameterError> {
        let mut payload = json!({
            "Path": path,
            "Recursive": recursive,
            "WithDecryption": false,
        });
        if let Some(token) = next_token {
            payload["NextToken"] = Value::String(token);
        }

        let response: GetParametersByPathResponse =
            self.call("GetParametersByPath", payload).await?;
        Ok(ParameterPage {
            parameters: response.parameters.into_iter().map(Into::into).collect(),
            next_token: response.next_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_parameter(
        &self,
        name: &str,
        with_decryption: bool,
    ) -> Result<String, ParameterError> {
        let payload = json!({
            "Name": name,
            "WithDecryption": with_decryption,
        });

        match self
            .call::<GetParameterResponse>("GetParameter", payload)
            .await
        {
            Ok(response) => Ok(response.parameter.value),
            Err(ParameterError::Status { status: 400, body })
                if serde_json::from_str::<ServiceError>(&body)
                    .map(|e| e.kind.ends_with("ParameterNotFound"))
                    .unwrap_or(false) =>
            {
                Err(ParameterError::NotFound(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}
