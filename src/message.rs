//! Substrate-neutral message model
//!
//! Relays move [`Message`] values between the broker and the cloud side.
//! Reply-to is carried as a plain destination name; adapters turn it into a
//! native handle only at the point of use.

use std::fmt;

/// The unit of transfer between substrates
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Opaque text payload, copied verbatim
    pub body: String,
    /// Identifier assigned by the source substrate (informational only)
    pub id: Option<String>,
    /// Caller-supplied token linking a request to its response
    pub correlation_id: Option<String>,
    /// Name of the queue a response should be sent to
    pub reply_to: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Identifier used in log lines
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or("-")
    }
}

/// A named broker-side endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Point-to-point
    Queue(String),
    /// Publish-subscribe
    Topic(String),
}

impl Destination {
    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name) | Destination::Topic(name) => name,
        }
    }

    pub fn is_queue(&self) -> bool {
        matches!(self, Destination::Queue(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "queue://{}", name),
            Destination::Topic(name) => write!(f, "topic://{}", name),
        }
    }
}
