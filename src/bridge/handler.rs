//! Topic event handler
//!
//! For cloud-to-broker publish-subscribe deployments invoked once per topic
//! event delivery. Every record is forwarded to the broker topic; the
//! invocation succeeds only if all of them were accepted. A failed
//! invocation is retried by the delivering service as a whole.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::info;

use crate::broker::SharedSession;
use crate::config::BridgeSettings;
use crate::error::BridgeError;
use crate::message::Destination;
use crate::relay::{BrokerSink, Sink};
use crate::translate;

/// Event document delivered by the topic service
#[derive(Debug, Clone, Deserialize)]
pub struct TopicEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

impl TopicEvent {
    pub fn parse(json: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(json)
            .map_err(|e| BridgeError::MalformedMessage(format!("invalid topic event: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "Sns")]
    pub notification: Notification,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    pub message_id: String,
    pub message: String,
    #[serde(default)]
    pub message_attributes: BTreeMap<String, NotificationAttribute>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationAttribute {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Notification {
    /// String-typed attributes only
    fn string_attributes(&self) -> BTreeMap<String, String> {
        self.message_attributes
            .iter()
            .filter(|(_, attr)| attr.kind == "String")
            .map(|(name, attr)| (name.clone(), attr.value.clone()))
            .collect()
    }
}

/// Forwards topic event records to a broker sink
pub struct TopicEventHandler {
    sink: Box<dyn Sink>,
    reply_to: Option<String>,
}

impl TopicEventHandler {
    pub fn new(sink: Box<dyn Sink>) -> Self {
        Self {
            sink,
            reply_to: None,
        }
    }

    /// Overwrite the reply-to of every record with `queue`
    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    /// Handler producing to the configured broker topic on `session`
    pub async fn from_session(
        session: &SharedSession,
        settings: &BridgeSettings,
    ) -> Result<Self, BridgeError> {
        let destination = Destination::Topic(settings.broker_destination.clone());
        let producer = session
            .create_producer(&destination)
            .await
            .map_err(BridgeError::Connect)?;

        let handler = Self::new(Box::new(BrokerSink::new(producer)));
        Ok(match &settings.broker_response_queue {
            Some(queue) if settings.variant.is_request_response() => {
                handler.with_reply_to(queue.clone())
            }
            _ => handler,
        })
    }

    /// Forward every record, stopping at the first failure
    pub async fn handle(&self, event: TopicEvent) -> Result<usize, BridgeError> {
        let mut forwarded = 0;
        for record in event.records {
            let notification = record.notification;
            let attributes = notification.string_attributes();
            let mut message = translate::from_attributes(
                Some(notification.message_id),
                notification.message,
                &attributes,
            );
            if let Some(reply_to) = &self.reply_to {
                message.reply_to = Some(reply_to.clone());
            }

            let label = message.label().to_string();
            info!("Topic event: Received message {}", label);
            self.sink.forward(message).await?;
            forwarded += 1;
            info!(
                "Topic event: Forwarded message {} to {}",
                label,
                self.sink.describe()
            );
        }
        Ok(forwarded)
    }
}
