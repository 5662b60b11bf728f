//! Attribute translation between the substrates
//!
//! Bodies pass through verbatim. Correlation id and reply-to are copied when
//! present and stay absent when absent; nothing is ever synthesized. On the
//! cloud side both travel as string attributes, on the broker side they map
//! to native fields, with reply-to resolved to a queue by name.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use crate::broker::{BrokerBody, BrokerMessage};
use crate::cloud::{CloudMessage, ReceivedMessage, CORRELATION_ID_ATTRIBUTE, REPLY_TO_ATTRIBUTE};
use crate::error::BridgeError;
use crate::message::{Destination, Message};

/// Build a message from a body and cloud-side string attributes
pub fn from_attributes(
    id: Option<String>,
    body: String,
    attributes: &BTreeMap<String, String>,
) -> Message {
    Message {
        body,
        id,
        correlation_id: attributes.get(CORRELATION_ID_ATTRIBUTE).cloned(),
        reply_to: attributes.get(REPLY_TO_ATTRIBUTE).cloned(),
    }
}

/// Message received from a cloud queue
pub fn from_cloud(received: &ReceivedMessage) -> Message {
    from_attributes(
        Some(received.message_id.clone()),
        received.body.clone(),
        &received.attributes,
    )
}

/// Message to send or publish on the cloud side
///
/// The cloud side assigns its own identifiers, so the source id is dropped.
pub fn to_cloud(message: &Message) -> CloudMessage {
    let mut attributes = BTreeMap::new();
    if let Some(correlation_id) = &message.correlation_id {
        attributes.insert(CORRELATION_ID_ATTRIBUTE.to_string(), correlation_id.clone());
    }
    if let Some(reply_to) = &message.reply_to {
        attributes.insert(REPLY_TO_ATTRIBUTE.to_string(), reply_to.clone());
    }

    CloudMessage {
        body: message.body.clone(),
        attributes,
    }
}

/// Message received from the broker
///
/// Only text messages can cross to the cloud side.
pub fn from_broker(message: BrokerMessage) -> Result<Message, BridgeError> {
    let body = match message.body {
        BrokerBody::Text(text) => text,
        BrokerBody::Bytes(bytes) => {
            return Err(BridgeError::MalformedMessage(format!(
                "message {} has a non-text body ({} bytes)",
                message.message_id.as_deref().unwrap_or("-"),
                bytes.len()
            )));
        }
    };

    Ok(Message {
        body,
        id: message.message_id,
        correlation_id: message.correlation_id,
        reply_to: message.reply_to.map(|d| d.name().to_string()),
    })
}

/// Message to send to the broker; reply-to names a queue
pub fn to_broker(message: Message) -> BrokerMessage {
    BrokerMessage {
        body: BrokerBody::Text(message.body),
        message_id: message.id,
        correlation_id: message.correlation_id,
        reply_to: message.reply_to.map(Destination::Queue),
    }
}
