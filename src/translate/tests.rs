use bytes::Bytes;
use pretty_assertions::assert_eq;

use super::*;

#[test]
fn test_to_cloud_carries_correlation_and_reply_to() {
    let message = Message::new("ping")
        .with_id("ID:broker-1")
        .with_correlation_id("abc123")
        .with_reply_to("replies");

    let cloud = to_cloud(&message);
    assert_eq!(cloud.body, "ping");
    assert_eq!(
        cloud.attributes.get(CORRELATION_ID_ATTRIBUTE).map(String::as_str),
        Some("abc123")
    );
    assert_eq!(
        cloud.attributes.get(REPLY_TO_ATTRIBUTE).map(String::as_str),
        Some("replies")
    );
    assert_eq!(cloud.attributes.len(), 2);
}

#[test]
fn test_to_cloud_omits_absent_attributes() {
    let cloud = to_cloud(&Message::new("plain"));
    assert!(cloud.attributes.is_empty());
}

#[test]
fn test_from_cloud() {
    let mut attributes = BTreeMap::new();
    attributes.insert(CORRELATION_ID_ATTRIBUTE.to_string(), "abc123".to_string());
    attributes.insert("Unrelated".to_string(), "x".to_string());
    let received = ReceivedMessage {
        message_id: "m-1".to_string(),
        receipt_handle: "rh-1".to_string(),
        body: "{\"k\": 1}".to_string(),
        attributes,
    };

    let message = from_cloud(&received);
    assert_eq!(
        message,
        Message::new("{\"k\": 1}")
            .with_id("m-1")
            .with_correlation_id("abc123")
    );
    assert_eq!(message.reply_to, None);
}

#[test]
fn test_empty_attribute_is_not_absent() {
    let mut attributes = BTreeMap::new();
    attributes.insert(CORRELATION_ID_ATTRIBUTE.to_string(), String::new());

    let message = from_attributes(None, "x".to_string(), &attributes);
    assert_eq!(message.correlation_id.as_deref(), Some(""));
}

#[test]
fn test_to_broker_resolves_reply_to_queue() {
    let broker = to_broker(
        Message::new("ping")
            .with_id("m-1")
            .with_correlation_id("abc123")
            .with_reply_to("replies"),
    );

    assert_eq!(broker.body, BrokerBody::Text("ping".to_string()));
    assert_eq!(broker.message_id.as_deref(), Some("m-1"));
    assert_eq!(broker.correlation_id.as_deref(), Some("abc123"));
    assert_eq!(broker.reply_to, Some(Destination::Queue("replies".to_string())));
}

#[test]
fn test_from_broker_text() {
    let mut broker = BrokerMessage::text("pong");
    broker.message_id = Some("ID:1".to_string());
    broker.correlation_id = Some("abc123".to_string());
    broker.reply_to = Some(Destination::Queue("replies".to_string()));

    let message = from_broker(broker).unwrap();
    assert_eq!(
        message,
        Message::new("pong")
            .with_id("ID:1")
            .with_correlation_id("abc123")
            .with_reply_to("replies")
    );
}

#[test]
fn test_from_broker_without_metadata() {
    let message = from_broker(BrokerMessage::text("pong")).unwrap();
    assert_eq!(message, Message::new("pong"));
}

#[test]
fn test_from_broker_rejects_bytes() {
    let broker = BrokerMessage {
        body: BrokerBody::Bytes(Bytes::from_static(&[0xff, 0x00])),
        message_id: Some("ID:9".to_string()),
        correlation_id: None,
        reply_to: None,
    };

    match from_broker(broker) {
        Err(BridgeError::MalformedMessage(msg)) => assert!(msg.contains("ID:9")),
        other => panic!("expected malformed message, got {:?}", other),
    }
}

#[test]
fn test_body_passes_through_unchanged() {
    let body = "  multi\nline \u{1F600} body\t";
    let cloud = to_cloud(&Message::new(body));
    assert_eq!(cloud.body, body);

    let broker = to_broker(Message::new(body));
    assert_eq!(broker.body, BrokerBody::Text(body.to_string()));
}
