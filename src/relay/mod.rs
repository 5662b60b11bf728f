//! Relays
//!
//! A relay drains one source and forwards each message to one sink, one
//! message at a time. The source message is acknowledged only after the sink
//! accepted it, and the next message is not taken until both steps succeeded.
//! Any failure ends the relay; whatever was not acknowledged is redelivered
//! by the source substrate.

mod endpoints;
mod request_response;


pub use endpoints::{
    BrokerReplySink, BrokerSink, BrokerSource, QueueSink, QueueSource, TopicSink,
};
pub use request_response::RequestResponseRelay;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{BridgeError, TransportError};
use crate::message::Message;

/// Proof of delivery for one inbound message, settled exactly once
#[async_trait]
pub trait Receipt: Send {
    /// Acknowledge or delete the message at its source
    async fn settle(self: Box<Self>) -> Result<(), TransportError>;
}

/// A message taken from a source together with its receipt
pub struct Inbound {
    pub message: Message,
    pub receipt: Box<dyn Receipt>,
}

/// Where a relay takes messages from
#[async_trait]
pub trait Source: Send {
    /// Human-readable name of the source
    fn describe(&self) -> String;

    /// Wait for the next message
    async fn next(&mut self) -> Result<Inbound, BridgeError>;
}

/// Where a relay forwards messages to
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human-readable name of the sink
    fn describe(&self) -> String;

    /// Returns once the destination accepted the message
    async fn forward(&self, message: Message) -> Result<(), BridgeError>;
}

/// Relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// No message in flight
    Idle,
    /// A message was received and is not yet acknowledged
    Forwarding,
}

/// One-way relay from a source to a sink
pub struct Relay {
    name: String,
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    /// Fixed reply destination stamped on every forwarded message
    reply_to: Option<String>,
    state: RelayState,
    forwarded: u64,
}

impl Relay {
    pub fn new(name: impl Into<String>, source: Box<dyn Source>, sink: Box<dyn Sink>) -> Self {
        Self {
            name: name.into(),
            source,
            sink,
            reply_to: None,
            state: RelayState::Idle,
            forwarded: 0,
        }
    }

    /// Overwrite the reply-to of every message with `queue`
    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Messages forwarded and acknowledged so far
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Receive, forward and acknowledge one message
    pub async fn step(&mut self) -> Result<(), BridgeError> {
        let Inbound {
            mut message,
            receipt,
        } = self.source.next().await?;
        self.state = RelayState::Forwarding;

        let label = message.label().to_string();
        info!(
            "Relay '{}': Received message {} from {}",
            self.name,
            label,
            self.source.describe()
        );

        if let Some(reply_to) = &self.reply_to {
            message.reply_to = Some(reply_to.clone());
        }

        self.sink.forward(message).await?;
        debug!("Relay '{}': Message {} accepted", self.name, label);

        receipt.settle().await.map_err(BridgeError::Acknowledge)?;

        self.state = RelayState::Idle;
        self.forwarded += 1;
        info!(
            "Relay '{}': Forwarded message {} to {}",
            self.name,
            label,
            self.sink.describe()
        );
        Ok(())
    }

    /// Relay messages until something fails
    pub async fn run(mut self) -> Result<(), BridgeError> {
        info!(
            "Relay '{}': Starting ({} -> {})",
            self.name,
            self.source.describe(),
            self.sink.describe()
        );
        loop {
            self.step().await?;
        }
    }
}
