//! Bridge error taxonomy
//!
//! Every variant is fatal to the unit of work that raised it. Nothing is
//! retried inside the process; recovery relies on the source substrate
//! redelivering whatever was not acknowledged.

use std::fmt;

use crate::broker::BrokerError;
use crate::cloud::CloudError;
use crate::config::ConfigError;

/// Failure of a call into either substrate
#[derive(Debug)]
pub enum TransportError {
    Broker(BrokerError),
    Cloud(CloudError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Broker(e) => write!(f, "broker: {}", e),
            TransportError::Cloud(e) => write!(f, "cloud: {}", e),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Broker(e) => Some(e),
            TransportError::Cloud(e) => Some(e),
        }
    }
}

impl From<BrokerError> for TransportError {
    fn from(e: BrokerError) -> Self {
        TransportError::Broker(e)
    }
}

impl From<CloudError> for TransportError {
    fn from(e: CloudError) -> Self {
        TransportError::Cloud(e)
    }
}

/// Errors that stop a relay or the whole process
#[derive(Debug)]
pub enum BridgeError {
    /// Missing or unreachable configuration
    Config(ConfigError),
    /// Broker unreachable, authentication rejected or a destination refused
    Connect(BrokerError),
    /// Receiving from the source substrate failed
    Receive(TransportError),
    /// The destination did not accept the message; the source was not acknowledged
    Forward(TransportError),
    /// Acknowledge/delete failed after a successful forward (duplicate risk)
    Acknowledge(TransportError),
    /// A message the bridge cannot carry, such as a non-text payload
    MalformedMessage(String),
    /// A response arrived without a reply destination
    MissingReplyTo { message_id: Option<String> },
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Config(e) => write!(f, "Configuration error: {}", e),
            BridgeError::Connect(e) => write!(f, "Connect error: {}", e),
            BridgeError::Receive(e) => write!(f, "Receive error: {}", e),
            BridgeError::Forward(e) => write!(f, "Forward error: {}", e),
            BridgeError::Acknowledge(e) => write!(f, "Acknowledge error: {}", e),
            BridgeError::MalformedMessage(msg) => write!(f, "Malformed message: {}", msg),
            BridgeError::MissingReplyTo { message_id } => write!(
                f,
                "Message {} has no reply-to destination",
                message_id.as_deref().unwrap_or("-")
            ),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Config(e) => Some(e),
            BridgeError::Connect(e) => Some(e),
            BridgeError::Receive(e) | BridgeError::Forward(e) | BridgeError::Acknowledge(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

impl From<ConfigError> for BridgeError {
    fn from(e: ConfigError) -> Self {
        BridgeError::Config(e)
    }
}
