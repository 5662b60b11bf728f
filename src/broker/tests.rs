//! Broker session tests
//!
//! The MQTT session is driven against a scripted peer on the other end of an
//! in-memory duplex stream, speaking the crate's own codec.

#![allow(clippy::field_reassign_with_default)]

use bytes::{Buf, Bytes, BytesMut};
use pretty_assertions::assert_eq;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::cloud::{CloudMessage, CloudQueue, MemoryQueue};
use crate::codec::{Decoder, Encoder};
use crate::error::BridgeError;
use crate::relay::{BrokerSink, QueueSource, Relay};
use crate::protocol::{ConnAck, Connect, Packet, Properties, PubAck, Publish, QoS, SubAck};

struct Peer {
    stream: DuplexStream,
    buf: BytesMut,
}

impl Peer {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    async fn recv(&mut self) -> Packet {
        loop {
            if let Some((packet, used)) = Decoder::new().decode(&self.buf).unwrap() {
                self.buf.advance(used);
                return packet;
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "session closed the stream");
        }
    }

    async fn send(&mut self, packet: Packet) {
        let mut buf = BytesMut::new();
        Encoder::new().encode(&packet, &mut buf).unwrap();
        self.stream.write_all(&buf).await.unwrap();
    }

    /// Answer the next SUBSCRIBE, returning its filter and subscription id
    async fn grant_subscription(&mut self) -> (String, u32) {
        match self.recv().await {
            Packet::Subscribe(sub) => {
                self.send(Packet::SubAck(SubAck {
                    packet_id: sub.packet_id,
                    reason_codes: vec![ReasonCode::GrantedQoS1],
                    properties: Properties::default(),
                }))
                .await;
                (
                    sub.subscriptions[0].filter.clone(),
                    sub.properties.subscription_identifiers[0],
                )
            }
            other => panic!("expected SUBSCRIBE, got {:?}", other),
        }
    }
}

fn options() -> ConnectOptions {
    let mut options = ConnectOptions::new(
        "mqtt://localhost",
        "bridge",
        "secret",
        "PointToPointOneWayTraditionalProxy",
    );
    options.keep_alive = 0;
    options
}

async fn connect_with(connack: ConnAck) -> (MqttSession, Peer, Connect) {
    let (client, server) = duplex(64 * 1024);
    let mut peer = Peer::new(server);
    let options = options();

    let accept = async {
        let connect = match peer.recv().await {
            Packet::Connect(connect) => *connect,
            other => panic!("expected CONNECT, got {:?}", other),
        };
        peer.send(Packet::ConnAck(connack)).await;
        connect
    };

    let (session, connect) = tokio::join!(MqttSession::establish(client, &options), accept);
    (session.unwrap(), peer, connect)
}

async fn connect() -> (MqttSession, Peer) {
    let (session, peer, _) = connect_with(ConnAck::default()).await;
    (session, peer)
}

fn inbound(topic: &str, packet_id: u16, subscription_id: u32, payload: &'static [u8]) -> Publish {
    let mut properties = Properties::default();
    properties.subscription_identifiers.push(subscription_id);
    Publish {
        qos: QoS::AtLeastOnce,
        topic: topic.to_string(),
        packet_id: Some(packet_id),
        payload: Bytes::from_static(payload),
        properties,
        ..Default::default()
    }
}

// ============================================================================
// MQTT session
// ============================================================================

#[tokio::test]
async fn test_connect_opens_persistent_session() {
    let (session, _peer, connect) = connect_with(ConnAck::default()).await;

    assert_eq!(session.client_id(), "PointToPointOneWayTraditionalProxy");
    assert_eq!(connect.client_id, "PointToPointOneWayTraditionalProxy");
    assert!(!connect.clean_start);
    assert_eq!(connect.properties.session_expiry_interval, Some(u32::MAX));
    assert_eq!(connect.username.as_deref(), Some("bridge"));
    assert_eq!(connect.password, Some(Bytes::from_static(b"secret")));
}

#[tokio::test]
async fn test_connect_rejected() {
    let (client, server) = duplex(4096);
    let mut peer = Peer::new(server);

    let accept = async {
        peer.recv().await;
        peer.send(Packet::ConnAck(ConnAck {
            session_present: false,
            reason_code: ReasonCode::BadUserNameOrPassword,
            properties: Properties::default(),
        }))
        .await;
    };

    let opts = options();
    let (result, _) = tokio::join!(MqttSession::establish(client, &opts), accept);
    assert!(matches!(
        result,
        Err(BrokerError::Rejected(ReasonCode::BadUserNameOrPassword))
    ));
}

#[tokio::test]
async fn test_connect_timeout_without_connack() {
    let (client, _server) = duplex(4096);
    let mut options = options();
    options.connect_timeout = std::time::Duration::from_millis(50);

    let result = MqttSession::establish(client, &options).await;
    assert!(matches!(result, Err(BrokerError::Timeout)));
}

#[tokio::test]
async fn test_plaintext_endpoint_refused() {
    let result = MqttSession::connect(&options()).await;
    assert!(matches!(result, Err(BrokerError::InvalidEndpoint(_))));
}

#[tokio::test]
async fn test_producer_waits_for_puback() {
    let (session, mut peer) = connect().await;
    let producer = session
        .create_producer(&Destination::Queue("orders".to_string()))
        .await
        .unwrap();

    let mut message = BrokerMessage::text("ping");
    message.correlation_id = Some("abc123".to_string());
    message.reply_to = Some(Destination::Queue("replies".to_string()));

    let send = tokio::spawn(async move { producer.send(message).await });

    let publish = match peer.recv().await {
        Packet::Publish(p) => p,
        other => panic!("expected PUBLISH, got {:?}", other),
    };
    assert_eq!(publish.topic, "orders");
    assert_eq!(publish.qos, QoS::AtLeastOnce);
    assert_eq!(publish.payload, Bytes::from_static(b"ping"));
    assert_eq!(publish.properties.payload_format_indicator, Some(1));
    assert_eq!(
        publish.properties.correlation_data,
        Some(Bytes::from_static(b"abc123"))
    );
    assert_eq!(publish.properties.response_topic.as_deref(), Some("replies"));
    assert!(!send.is_finished());

    peer.send(Packet::PubAck(PubAck::new(publish.packet_id.unwrap())))
        .await;
    send.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_producer_refused_by_broker() {
    let (session, mut peer) = connect().await;
    let producer = session
        .create_producer(&Destination::Topic("prices".to_string()))
        .await
        .unwrap();

    let send = tokio::spawn(async move { producer.send(BrokerMessage::text("1.10")).await });
    let packet_id = match peer.recv().await {
        Packet::Publish(p) => p.packet_id.unwrap(),
        other => panic!("expected PUBLISH, got {:?}", other),
    };
    peer.send(Packet::PubAck(PubAck {
        packet_id,
        reason_code: ReasonCode::NotAuthorized,
        properties: Properties::default(),
    }))
    .await;

    assert!(matches!(
        send.await.unwrap(),
        Err(BrokerError::SendFailed(ReasonCode::NotAuthorized))
    ));
}

#[tokio::test]
async fn test_no_matching_subscribers_is_success() {
    let (session, mut peer) = connect().await;
    let producer = session
        .create_producer(&Destination::Topic("prices".to_string()))
        .await
        .unwrap();

    let send = tokio::spawn(async move { producer.send(BrokerMessage::text("1.10")).await });
    let packet_id = match peer.recv().await {
        Packet::Publish(p) => p.packet_id.unwrap(),
        other => panic!("expected PUBLISH, got {:?}", other),
    };
    peer.send(Packet::PubAck(PubAck {
        packet_id,
        reason_code: ReasonCode::NoMatchingSubscribers,
        properties: Properties::default(),
    }))
    .await;

    send.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_queue_send_without_subscribers_is_refused() {
    let (session, mut peer) = connect().await;
    let producer = session
        .create_producer(&Destination::Queue("orders".to_string()))
        .await
        .unwrap();

    let send = tokio::spawn(async move { producer.send(BrokerMessage::text("order-1")).await });
    let packet_id = match peer.recv().await {
        Packet::Publish(p) => p.packet_id.unwrap(),
        other => panic!("expected PUBLISH, got {:?}", other),
    };
    peer.send(Packet::PubAck(PubAck {
        packet_id,
        reason_code: ReasonCode::NoMatchingSubscribers,
        properties: Properties::default(),
    }))
    .await;

    assert!(matches!(
        send.await.unwrap(),
        Err(BrokerError::SendFailed(ReasonCode::NoMatchingSubscribers))
    ));
}

#[tokio::test]
async fn test_dropped_queue_message_stays_on_cloud_queue() {
    let (session, mut peer) = connect().await;
    let queue = MemoryQueue::new("https://sqs.local/orders");
    queue.send(&CloudMessage::new("order-1")).await.unwrap();

    let producer = session
        .create_producer(&Destination::Queue("orders".to_string()))
        .await
        .unwrap();
    let mut relay = Relay::new(
        "orders",
        Box::new(QueueSource::new(
            Arc::new(queue.clone()),
            1,
            Duration::from_secs(1),
        )),
        Box::new(BrokerSink::new(producer)),
    );
    let step = tokio::spawn(async move { relay.step().await });

    let packet_id = match peer.recv().await {
        Packet::Publish(p) => p.packet_id.unwrap(),
        other => panic!("expected PUBLISH, got {:?}", other),
    };
    peer.send(Packet::PubAck(PubAck {
        packet_id,
        reason_code: ReasonCode::NoMatchingSubscribers,
        properties: Properties::default(),
    }))
    .await;

    assert!(matches!(step.await.unwrap(), Err(BridgeError::Forward(_))));
    assert!(queue.deleted().is_empty());
    assert_eq!(queue.in_flight_count(), 1);
}

#[tokio::test]
async fn test_queue_consumer_acknowledges_explicitly() {
    let (session, mut peer) = connect().await;
    let session = std::sync::Arc::new(session);

    let subscribe = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .create_consumer(&Destination::Queue("orders".to_string()))
                .await
        })
    };
    let (filter, subscription_id) = peer.grant_subscription().await;
    assert_eq!(filter, "$share/PointToPointOneWayTraditionalProxy/orders");
    let mut consumer = subscribe.await.unwrap().unwrap();

    let mut publish = inbound("orders", 10, subscription_id, b"ping");
    publish.properties.correlation_data = Some(Bytes::from_static(b"abc123"));
    peer.send(Packet::Publish(publish)).await;

    let delivery = consumer.receive().await.unwrap();
    assert_eq!(delivery.message.body, BrokerBody::Text("ping".to_string()));
    assert_eq!(delivery.message.correlation_id.as_deref(), Some("abc123"));

    // Nothing is acknowledged on receipt: a later publish reaches the peer first
    let producer = session
        .create_producer(&Destination::Queue("audit".to_string()))
        .await
        .unwrap();
    tokio::spawn(async move { producer.send(BrokerMessage::text("seen")).await });
    assert!(matches!(peer.recv().await, Packet::Publish(_)));

    delivery.acknowledge().await.unwrap();
    assert_eq!(peer.recv().await, Packet::PubAck(PubAck::new(10)));
}

#[tokio::test]
async fn test_durable_consumer_uses_subscriber_identity() {
    let (session, mut peer) = connect().await;

    let subscribe = tokio::spawn(async move {
        session
            .create_durable_consumer("prices", "PublishSubscribeOneWayTraditionalDurableSubscriber")
            .await
            .map(|_| ())
    });
    let (filter, _) = peer.grant_subscription().await;
    assert_eq!(
        filter,
        "$share/PublishSubscribeOneWayTraditionalDurableSubscriber/prices"
    );
    subscribe.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_subscription_refused() {
    let (session, mut peer) = connect().await;

    let subscribe = tokio::spawn(async move {
        session
            .create_consumer(&Destination::Topic("prices".to_string()))
            .await
            .map(|_| ())
    });
    let packet_id = match peer.recv().await {
        Packet::Subscribe(sub) => sub.packet_id,
        other => panic!("expected SUBSCRIBE, got {:?}", other),
    };
    peer.send(Packet::SubAck(SubAck {
        packet_id,
        reason_codes: vec![ReasonCode::NotAuthorized],
        properties: Properties::default(),
    }))
    .await;

    assert!(matches!(
        subscribe.await.unwrap(),
        Err(BrokerError::SubscribeFailed { .. })
    ));
}

#[tokio::test]
async fn test_messages_from_resumed_session_are_held() {
    let (session, mut peer, _) = connect_with(ConnAck {
        session_present: true,
        ..Default::default()
    })
    .await;

    // Stored message delivered before the bridge re-subscribes
    peer.send(Packet::Publish(inbound(
        "orders",
        3,
        1,
        b"while you were away",
    )))
    .await;

    let session = std::sync::Arc::new(session);
    let subscribe = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .create_consumer(&Destination::Queue("orders".to_string()))
                .await
        })
    };
    peer.grant_subscription().await;
    let mut consumer = subscribe.await.unwrap().unwrap();

    let delivery = consumer.receive().await.unwrap();
    assert_eq!(
        delivery.message.body,
        BrokerBody::Text("while you were away".to_string())
    );
}

#[tokio::test]
async fn test_resumed_delivery_on_abandoned_subscription_fails_session() {
    let (session, mut peer, _) = connect_with(ConnAck {
        session_present: true,
        ..Default::default()
    })
    .await;

    // Left over from a run that consumed a different queue
    peer.send(Packet::Publish(inbound(
        "old-orders",
        5,
        1,
        b"stale",
    )))
    .await;

    let session = Arc::new(session);
    let subscribe = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .create_consumer(&Destination::Queue("orders".to_string()))
                .await
        })
    };
    peer.grant_subscription().await;
    let mut consumer = subscribe.await.unwrap().unwrap();

    assert!(matches!(
        session.consumers_ready().await,
        Err(BrokerError::Protocol(_))
    ));
    assert!(matches!(
        consumer.receive().await,
        Err(BrokerError::ConnectionLost(_))
    ));
}

#[tokio::test]
async fn test_unclaimed_delivery_after_consumers_ready_fails_session() {
    let (session, mut peer) = connect().await;
    let session = Arc::new(session);

    let subscribe = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .create_consumer(&Destination::Queue("orders".to_string()))
                .await
        })
    };
    peer.grant_subscription().await;
    let mut consumer = subscribe.await.unwrap().unwrap();
    session.consumers_ready().await.unwrap();

    peer.send(Packet::Publish(inbound("invoices", 6, 99, b"not ours")))
        .await;

    assert!(matches!(
        consumer.receive().await,
        Err(BrokerError::ConnectionLost(_))
    ));
}

#[tokio::test]
async fn test_invalid_correlation_data_is_malformed() {
    let (session, mut peer) = connect().await;

    let subscribe = tokio::spawn(async move {
        session
            .create_consumer(&Destination::Queue("orders".to_string()))
            .await
    });
    let (_, subscription_id) = peer.grant_subscription().await;
    let mut consumer = subscribe.await.unwrap().unwrap();

    let mut publish = inbound("orders", 4, subscription_id, b"ping");
    publish.properties.correlation_data = Some(Bytes::from_static(&[0xff, 0x00]));
    peer.send(Packet::Publish(publish)).await;

    assert!(matches!(
        consumer.receive().await,
        Err(BrokerError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_connection_loss_fails_consumers() {
    let (session, mut peer) = connect().await;

    let subscribe = tokio::spawn(async move {
        session
            .create_consumer(&Destination::Queue("orders".to_string()))
            .await
    });
    peer.grant_subscription().await;
    let mut consumer = subscribe.await.unwrap().unwrap();

    drop(peer);
    assert!(matches!(
        consumer.receive().await,
        Err(BrokerError::ConnectionLost(_))
    ));
}

#[tokio::test]
async fn test_invalid_destination_names() {
    let (session, _peer) = connect().await;

    let result = session
        .create_producer(&Destination::Queue("orders/#".to_string()))
        .await;
    assert!(matches!(result, Err(BrokerError::InvalidDestination(_))));

    let result = session.create_durable_consumer("prices", "a/b").await;
    assert!(matches!(result, Err(BrokerError::InvalidDestination(_))));
}

// ============================================================================
// In-memory broker
// ============================================================================

#[tokio::test]
async fn test_memory_queue_redelivers_unacknowledged() {
    let broker = MemoryBroker::new();
    let session = broker.session("test");
    let queue = Destination::Queue("orders".to_string());

    let producer = session.create_producer(&queue).await.unwrap();
    producer.send(BrokerMessage::text("ping")).await.unwrap();
    assert_eq!(broker.queue_depth("orders"), 1);

    let mut consumer = session.create_consumer(&queue).await.unwrap();
    let first = consumer.receive().await.unwrap();
    assert_eq!(broker.queue_depth("orders"), 0);
    let id = first.message.message_id.clone();
    drop(first);

    // Redelivered with the same identity
    let again = consumer.receive().await.unwrap();
    assert_eq!(again.message.message_id, id);
    again.acknowledge().await.unwrap();
    assert_eq!(broker.queue_depth("orders"), 0);
}

#[tokio::test]
async fn test_memory_durable_subscription_survives_disconnect() {
    let broker = MemoryBroker::new();
    let topic = Destination::Topic("prices".to_string());

    let consumer = broker
        .session("sub")
        .create_durable_consumer("prices", "Durable")
        .await
        .unwrap();
    drop(consumer);

    let producer = broker.session("pub").create_producer(&topic).await.unwrap();
    producer.send(BrokerMessage::text("1.10")).await.unwrap();
    assert_eq!(broker.durable_depth("prices", "Durable"), 1);

    let mut consumer = broker
        .session("sub")
        .create_durable_consumer("prices", "Durable")
        .await
        .unwrap();
    let delivery = consumer.receive().await.unwrap();
    assert_eq!(delivery.message.body, BrokerBody::Text("1.10".to_string()));
}

#[tokio::test]
async fn test_memory_plain_topic_subscription_is_not_durable() {
    let broker = MemoryBroker::new();
    let session = broker.session("test");
    let topic = Destination::Topic("prices".to_string());
    let producer = session.create_producer(&topic).await.unwrap();

    let consumer = session.create_consumer(&topic).await.unwrap();
    drop(consumer);
    producer.send(BrokerMessage::text("lost")).await.unwrap();

    let mut consumer = session.create_consumer(&topic).await.unwrap();
    producer.send(BrokerMessage::text("seen")).await.unwrap();
    let delivery = consumer.receive().await.unwrap();
    assert_eq!(delivery.message.body, BrokerBody::Text("seen".to_string()));
}
