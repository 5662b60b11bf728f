//! Queue client speaking the queue service's JSON protocol
//!
//! Requests are `POST /` with an `X-Amz-Target` header naming the action.
//! The service endpoint is the origin of the queue URL unless overridden, and
//! the signing region is read from the queue URL's host.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{CloudError, CloudMessage, CloudQueue, ReceivedMessage};
use crate::signing::{Credentials, Signer, DEFAULT_REGION};

const TARGET_PREFIX: &str = "AmazonSQS";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const SERVICE: &str = "sqs";

/// Longest long-poll the service accepts
const MAX_WAIT_SECONDS: u64 = 20;

/// Largest batch the service returns per receive
const MAX_BATCH: u32 = 10;

/// Slack added to the HTTP timeout on top of the long-poll wait
const RECEIVE_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageResponse {
    message_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageResponse {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireMessage {
    message_id: String,
    receipt_handle: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    message_attributes: BTreeMap<String, WireAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireAttribute {
    string_value: Option<String>,
}

impl From<WireMessage> for ReceivedMessage {
    fn from(m: WireMessage) -> Self {
        // Binary attributes have no string form and are not carried
        let attributes = m
            .message_attributes
            .into_iter()
            .filter_map(|(name, attr)| attr.string_value.map(|v| (name, v)))
            .collect();

        ReceivedMessage {
            message_id: m.message_id,
            receipt_handle: m.receipt_handle,
            body: m.body,
            attributes,
        }
    }
}

/// Encode attributes as string-typed message attributes
fn wire_attributes(attributes: &BTreeMap<String, String>) -> Value {
    let map = attributes
        .iter()
        .map(|(name, value)| {
            (
                name.clone(),
                json!({ "DataType": "String", "StringValue": value }),
            )
        })
        .collect::<serde_json::Map<_, _>>();
    Value::Object(map)
}

/// Region in a queue host: `sqs.<region>.amazonaws.com` or `<region>.queue.amazonaws.com`
fn host_region(host: &str) -> Option<&str> {
    let labels: Vec<&str> = host.split('.').collect();
    match labels.as_slice() {
        ["sqs", region, "amazonaws", ..] => Some(*region),
        [region, "queue", "amazonaws", ..] => Some(*region),
        _ => None,
    }
}

/// A queue reached over HTTP
pub struct SqsQueue {
    client: reqwest::Client,
    queue_url: String,
    endpoint: String,
    region: String,
    signer: Option<Signer>,
}

impl SqsQueue {
    /// Create a client for the queue at `queue_url`
    pub fn new(queue_url: impl Into<String>) -> Result<Self, CloudError> {
        let queue_url = queue_url.into();
        let parsed = reqwest::Url::parse(&queue_url)
            .map_err(|e| CloudError::InvalidAddress(format!("{}: {}", queue_url, e)))?;
        let Some(host) = parsed.host_str() else {
            return Err(CloudError::InvalidAddress(format!(
                "{}: missing host",
                queue_url
            )));
        };
        let region = host_region(host).unwrap_or(DEFAULT_REGION).to_string();
        let endpoint = parsed.origin().ascii_serialization();

        Ok(Self {
            client: reqwest::Client::new(),
            queue_url,
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

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Send requests to `endpoint` instead of the queue URL's origin
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(
        &self,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<String, CloudError> {
        let mut request = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, action))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(payload.to_string());
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let mut request = request.build()?;
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

        Ok(body)
    }

    fn parse<T: DeserializeOwned>(action: &str, body: &str) -> Result<T, CloudError> {
        serde_json::from_str(body).map_err(|e| CloudError::Decode(format!("{}: {}", action, e)))
    }
}

#[async_trait]
impl CloudQueue for SqsQueue {
    fn url(&self) -> &str {
        &self.queue_url
    }

    async fn send(&self, message: &CloudMessage) -> Result<String, CloudError> {
        let mut payload = json!({
            "QueueUrl": self.queue_url,
            "MessageBody": message.body,
        });
        if !message.attributes.is_empty() {
            payload["MessageAttributes"] = wire_attributes(&message.attributes);
        }

        let body = self.call("SendMessage", payload, None).await?;
        let response: SendMessageResponse = Self::parse("SendMessage", &body)?;
        debug!(
            "Sent message {} to {}",
            response.message_id, self.queue_url
        );
        Ok(response.message_id)
    }

    async fn receive(
        &self,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, CloudError> {
        let wait_seconds = wait.as_secs().min(MAX_WAIT_SECONDS);
        let payload = json!({
            "QueueUrl": self.queue_url,
            "MaxNumberOfMessages": max_messages.clamp(1, MAX_BATCH),
            "WaitTimeSeconds": wait_seconds,
            "MessageAttributeNames": ["All"],
        });
        let timeout = Duration::from_secs(wait_seconds) + RECEIVE_TIMEOUT_SLACK;

        let body = self.call("ReceiveMessage", payload, Some(timeout)).await?;
        let response: ReceiveMessageResponse = Self::parse("ReceiveMessage", &body)?;
        Ok(response.messages.into_iter().map(Into::into).collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), CloudError> {
        let payload = json!({
            "QueueUrl": self.queue_url,
            "ReceiptHandle": receipt_handle,
        });
        self.call("DeleteMessage", payload, None).await?;
        debug!("Deleted message from {}", self.queue_url);
        Ok(())
    }
}
