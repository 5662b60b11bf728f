//! Broker-side connection and session handle
//!
//! A [`BrokerSession`] owns one long-lived connection in client-acknowledge
//! mode and hands out producers and consumers bound to named destinations.
//! Two implementations exist: [`MqttSession`] speaks MQTT v5.0 to a real
//! broker, [`MemoryBroker`] keeps everything in process.

mod memory;
mod session;
mod tls;
mod topic;

#[cfg(test)]
mod tests;

pub use memory::{MemoryBroker, MemorySession};
pub use session::{ConnectOptions, MqttSession};
pub use tls::{client_connector, TlsError, DEFAULT_CA_BUNDLE};
pub use topic::{filter_matches, validate_destination};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::message::Destination;
use crate::protocol::{DecodeError, EncodeError, ReasonCode};

/// Errors raised by broker sessions, producers and consumers
#[derive(Debug)]
pub enum BrokerError {
    /// IO error on the broker connection
    Io(std::io::Error),
    /// TLS setup failed
    Tls(TlsError),
    /// Endpoint URI could not be used
    InvalidEndpoint(String),
    /// Destination name cannot be used on this broker
    InvalidDestination(String),
    /// Connect did not complete within the timeout
    Timeout,
    /// Broker refused the connection
    Rejected(ReasonCode),
    /// Broker refused a subscription
    SubscribeFailed { filter: String, reason: ReasonCode },
    /// Broker refused a published message
    SendFailed(ReasonCode),
    /// Broker violated the protocol
    Protocol(String),
    Decode(DecodeError),
    Encode(EncodeError),
    /// Inbound message cannot be represented
    Malformed(String),
    /// Connection is gone; nothing more can be sent or received
    ConnectionLost(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Io(e) => write!(f, "IO error: {}", e),
            BrokerError::Tls(e) => write!(f, "TLS error: {}", e),
            BrokerError::InvalidEndpoint(msg) => write!(f, "Invalid endpoint: {}", msg),
            BrokerError::InvalidDestination(msg) => write!(f, "Invalid destination: {}", msg),
            BrokerError::Timeout => write!(f, "Timed out waiting for the broker"),
            BrokerError::Rejected(code) => write!(f, "Connection rejected: {}", code),
            BrokerError::SubscribeFailed { filter, reason } => {
                write!(f, "Subscription to '{}' refused: {}", filter, reason)
            }
            BrokerError::SendFailed(code) => write!(f, "Message refused: {}", code),
            BrokerError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            BrokerError::Decode(e) => write!(f, "Decode error: {}", e),
            BrokerError::Encode(e) => write!(f, "Encode error: {}", e),
            BrokerError::Malformed(msg) => write!(f, "Malformed message: {}", msg),
            BrokerError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrokerError::Io(e) => Some(e),
            BrokerError::Tls(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        BrokerError::Io(e)
    }
}

impl From<TlsError> for BrokerError {
    fn from(e: TlsError) -> Self {
        BrokerError::Tls(e)
    }
}

impl From<DecodeError> for BrokerError {
    fn from(e: DecodeError) -> Self {
        BrokerError::Decode(e)
    }
}

impl From<EncodeError> for BrokerError {
    fn from(e: EncodeError) -> Self {
        BrokerError::Encode(e)
    }
}

/// Payload of a broker message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerBody {
    Text(String),
    /// Anything that is not declared or recognisable as text
    Bytes(Bytes),
}

/// A message in the broker's own model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub body: BrokerBody,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<Destination>,
}

impl BrokerMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: BrokerBody::Text(body.into()),
            message_id: None,
            correlation_id: None,
            reply_to: None,
        }
    }
}

/// Acknowledges one delivered message
#[async_trait]
pub trait Acknowledger: Send {
    async fn acknowledge(self: Box<Self>) -> Result<(), BrokerError>;
}

/// A received message together with its acknowledgment handle
///
/// Dropping a delivery without acknowledging it leaves the message with the
/// broker, which redelivers it.
pub struct Delivery {
    pub message: BrokerMessage,
    acknowledger: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: BrokerMessage, acknowledger: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            acknowledger,
        }
    }

    pub async fn acknowledge(self) -> Result<(), BrokerError> {
        self.acknowledger.acknowledge().await
    }

    pub fn into_parts(self) -> (BrokerMessage, Box<dyn Acknowledger>) {
        (self.message, self.acknowledger)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Sends messages to one destination
#[async_trait]
pub trait MessageProducer: Send + Sync {
    fn destination(&self) -> &Destination;

    /// Returns once the broker has accepted the message
    async fn send(&self, message: BrokerMessage) -> Result<(), BrokerError>;

    async fn close(self: Box<Self>) -> Result<(), BrokerError>;
}

/// Receives messages from one destination, one at a time
#[async_trait]
pub trait MessageConsumer: Send {
    /// Wait for the next message
    async fn receive(&mut self) -> Result<Delivery, BrokerError>;
}

/// One broker connection and its session
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Client identity the session was opened with
    fn client_id(&self) -> &str;

    async fn create_producer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageProducer>, BrokerError>;

    async fn create_consumer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError>;

    /// Consumer on a named persistent subscription that keeps messages
    /// published while the subscriber is away
    async fn create_durable_consumer(
        &self,
        topic: &str,
        subscriber_id: &str,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError>;

    /// Every consumer of this session has been created
    ///
    /// Deliveries no consumer claims are an error from here on, including
    /// ones already held for a subscription left over from an earlier run.
    async fn consumers_ready(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Shared handle used by relays running on the same session
pub type SharedSession = Arc<dyn BrokerSession>;
