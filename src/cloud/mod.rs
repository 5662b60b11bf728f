//! Cloud-side queue and topic clients
//!
//! The cloud side has no reply-to concept and no correlation field, so both
//! travel as string message attributes named after the broker's own header
//! names.

mod memory;
mod sns;
mod sqs;


pub use memory::{MemoryQueue, MemoryTopic};
pub use sns::SnsTopic;
pub use sqs::SqsQueue;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::signing::SigningError;

/// Attribute carrying the correlation id
pub const CORRELATION_ID_ATTRIBUTE: &str = "JMSCorrelationID";

/// Attribute carrying the reply-to queue name
pub const REPLY_TO_ATTRIBUTE: &str = "JMSReplyTo";

/// Errors raised by the cloud clients
#[derive(Debug)]
pub enum CloudError {
    /// Transport-level HTTP failure
    Http(reqwest::Error),
    /// Service answered with a non-success status
    Status { status: u16, body: String },
    /// Response body could not be understood
    Decode(String),
    /// Queue URL or topic ARN cannot be used
    InvalidAddress(String),
    /// Receipt handle does not belong to an in-flight message
    InvalidReceipt(String),
    /// Request could not be signed
    Signing(SigningError),
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudError::Http(e) => write!(f, "HTTP error: {}", e),
            CloudError::Status { status, body } => {
                write!(f, "Service returned {}: {}", status, body)
            }
            CloudError::Decode(msg) => write!(f, "Unexpected response: {}", msg),
            CloudError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            CloudError::InvalidReceipt(handle) => write!(f, "Invalid receipt handle: {}", handle),
            CloudError::Signing(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CloudError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CloudError::Http(e) => Some(e),
            CloudError::Signing(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(e: reqwest::Error) -> Self {
        CloudError::Http(e)
    }
}

impl From<SigningError> for CloudError {
    fn from(e: SigningError) -> Self {
        CloudError::Signing(e)
    }
}

/// Outbound message: a body plus string attributes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloudMessage {
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

impl CloudMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// A message received from a queue, deletable through its own receipt handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

/// A polled cloud queue
#[async_trait]
pub trait CloudQueue: Send + Sync {
    fn url(&self) -> &str;

    /// Enqueue a message, returning the service-assigned message id
    async fn send(&self, message: &CloudMessage) -> Result<String, CloudError>;

    /// Long-poll for up to `max_messages`, waiting at most `wait`
    ///
    /// An empty result means the wait elapsed.
    async fn receive(
        &self,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, CloudError>;

    /// Delete a received message
    async fn delete(&self, receipt_handle: &str) -> Result<(), CloudError>;
}

/// A publish-only cloud topic
#[async_trait]
pub trait CloudTopic: Send + Sync {
    fn arn(&self) -> &str;

    /// Publish a message, returning the service-assigned message id
    async fn publish(&self, message: &CloudMessage) -> Result<String, CloudError>;
}
