//! Topic client speaking the topic service's query protocol
//!
//! `Publish` is a form-encoded `POST /`; the reply is XML from which only the
//! message id is needed. The region in the topic ARN picks both the default
//! endpoint and the signing region.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tracing::debug;

use super::{CloudError, CloudMessage, CloudTopic};
use crate::signing::{Credentials, Signer};

const API_VERSION: &str = "2010-03-31";
const SERVICE: &str = "sns";

static MESSAGE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<MessageId>\s*([^<\s]+)\s*</MessageId>").expect("Invalid message id regex")
});

/// Region segment of a topic ARN (`arn:<partition>:sns:<region>:<account>:<name>`)
fn arn_region(arn: &str) -> Result<&str, CloudError> {
    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() != 6 || parts[0] != "arn" || parts[2] != "sns" {
        return Err(CloudError::InvalidAddress(format!("not a topic ARN: {}", arn)));
    }
    if parts[3].is_empty() || parts[5].is_empty() {
        return Err(CloudError::InvalidAddress(format!(
            "incomplete topic ARN: {}",
            arn
        )));
    }
    Ok(parts[3])
}

/// Form fields for a `Publish` call
fn publish_form(arn: &str, message: &CloudMessage) -> Vec<(String, String)> {
    let mut form = vec![
        ("Action".to_string(), "Publish".to_string()),
        ("Version".to_string(), API_VERSION.to_string()),
        ("TopicArn".to_string(), arn.to_string()),
        ("Message".to_string(), message.body.clone()),
    ];
    append_attributes(&mut form, &message.attributes);
    form
}

fn append_attributes(form: &mut Vec<(String, String)>, attributes: &BTreeMap<String, String>) {
    for (index, (name, value)) in attributes.iter().enumerate() {
        let prefix = format!("MessageAttributes.entry.{}", index + 1);
        form.push((format!("{}.Name", prefix), name.clone()));
        form.push((format!("{}.Value.DataType", prefix), "String".to_string()));
        form.push((format!("{}.Value.StringValue", prefix), value.clone()));
    }
}

/// A topic reached over HTTP
pub struct SnsTopic {
    client: reqwest::Client,
    arn: String,
    endpoint: String,
    region: String,
    signer: Option<Signer>,
}

impl SnsTopic {
    /// Create a client for the topic, addressing the regional endpoint from the ARN
    pub fn new(arn: impl Into<String>) -> Result<Self, CloudError> {
        let arn = arn.into();
        let region = arn_region(&arn)?.to_string();
        let endpoint = format!("https://sns.{}.amazonaws.com", region);

        Ok(Self {
            client: reqwest::Client::new(),
            arn,
            endpoint,
            region,
            signer: None,
        })
    }

    /// Sign every request with `credentials`
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.signer = Some(Signer::new(credentials, self.region.clone(), SERVICE));
        self
    }

    /// Send requests to `endpoint` instead of the regional endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CloudTopic for SnsTopic {
    fn arn(&self) -> &str {
        &self.arn
    }

    async fn publish(&self, message: &CloudMessage) -> Result<String, CloudError> {
        let mut request = self
            .client
            .post(format!("{}/", self.endpoint))
            .form(&publish_form(&self.arn, message))
            .build()?;
        if let Some(signer) = &self.signer {
            signer.sign(&mut request, Utc::now())?;
        }
        let response = self.client.execute(request).await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CloudError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let message_id = MESSAGE_ID
            .captures(&body)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| CloudError::Decode("Publish: no MessageId in response".to_string()))?;
        debug!("Published message {} to {}", message_id, self.arn);
        Ok(message_id)
    }
}
