//! MQTT v5.0 broker session
//!
//! One TCP (usually TLS) connection per process. The session is persistent:
//! CONNECT is sent with clean start off and a session expiry interval, so the
//! broker keeps subscriptions and unacknowledged messages while the bridge is
//! away. Inbound QoS 1 messages are acknowledged only when the relay says so.
//!
//! Reading and writing run on separate tasks. Producers and consumers talk to
//! them through [`Shared`]: outbound packets go through a channel to the
//! writer, and the reader completes pending PUBACK/SUBACK waiters and routes
//! inbound publishes to consumers by subscription identifier, falling back to
//! the topic filter.
//!
//! Publishes that arrive before their consumer exists are held. Once the
//! bridge reports all consumers created, anything held or arriving for a
//! filter no consumer claims fails the session instead of piling up
//! unacknowledged.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::{debug, info, warn};

use super::tls::{client_connector, TlsError, DEFAULT_CA_BUNDLE};
use super::topic::{filter_matches, shared_filter, validate_destination};
use super::{
    Acknowledger, BrokerBody, BrokerError, BrokerMessage, BrokerSession, Delivery,
    MessageConsumer, MessageProducer,
};
use crate::codec::{Decoder, Encoder};
use crate::message::Destination;
use crate::protocol::{
    Connect, Disconnect, Packet, Properties, PubAck, Publish, QoS, ReasonCode, Subscribe,
};

/// User property carrying the source message identifier
pub const MESSAGE_ID_PROPERTY: &str = "message-id";

/// Options for opening a broker session
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// `ssl://host:port`, `mqtts://`, `tls://`; `mqtt://` and `tcp://` are plaintext
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Fixed per-deployment identity; keys the persistent session
    pub client_id: String,
    /// Bound on TCP connect, TLS handshake and CONNACK together
    pub connect_timeout: Duration,
    /// Keep alive in seconds
    pub keep_alive: u16,
    /// Seconds the broker keeps the session after a disconnect
    pub session_expiry: u32,
    pub ca_bundle: PathBuf,
    /// Accept plaintext endpoints (local testing only)
    pub allow_plaintext: bool,
}

impl ConnectOptions {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            client_id: client_id.into(),
            connect_timeout: Duration::from_secs(10),
            keep_alive: 60,
            session_expiry: u32::MAX,
            ca_bundle: PathBuf::from(DEFAULT_CA_BUNDLE),
            allow_plaintext: false,
        }
    }
}

/// Parsed broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    tls: bool,
    host: String,
    port: u16,
}

impl Endpoint {
    fn parse(uri: &str) -> Result<Self, BrokerError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| BrokerError::InvalidEndpoint(format!("missing scheme in '{}'", uri)))?;

        let tls = match scheme.to_ascii_lowercase().as_str() {
            "ssl" | "tls" | "mqtts" => true,
            "mqtt" | "tcp" => false,
            other => {
                return Err(BrokerError::InvalidEndpoint(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        };

        let authority = rest.split(['/', '?']).next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !port.contains(']') => {
                let port = port.parse::<u16>().map_err(|_| {
                    BrokerError::InvalidEndpoint(format!("invalid port in '{}'", uri))
                })?;
                (host, port)
            }
            _ => (authority, if tls { 8883 } else { 1883 }),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(BrokerError::InvalidEndpoint(format!(
                "missing host in '{}'",
                uri
            )));
        }

        Ok(Self {
            tls,
            host: host.to_string(),
            port,
        })
    }
}

/// A consumer's claim on inbound publishes
struct Route {
    subscription_id: u32,
    filter: String,
    tx: mpsc::UnboundedSender<Publish>,
}

#[derive(Default)]
struct State {
    /// QoS 1 publishes awaiting PUBACK
    publishes: HashMap<u16, oneshot::Sender<ReasonCode>>,
    /// Subscriptions awaiting SUBACK
    subscribes: HashMap<u16, oneshot::Sender<Vec<ReasonCode>>>,
    routes: Vec<Route>,
    /// Publishes for which no consumer exists yet; a resumed session may
    /// deliver stored messages before the bridge re-subscribes
    unrouted: VecDeque<Publish>,
    /// Every consumer has been created
    sealed: bool,
    /// Set once the connection is gone
    lost: Option<String>,
}

/// State shared between the session, its producers and consumers, and the
/// connection tasks
struct Shared {
    outbound: mpsc::UnboundedSender<Packet>,
    next_packet_id: AtomicU16,
    next_subscription_id: AtomicU32,
    state: Mutex<State>,
}

impl Shared {
    fn lost_error(&self) -> BrokerError {
        let reason = self
            .state
            .lock()
            .lost
            .clone()
            .unwrap_or_else(|| "session closed".to_string());
        BrokerError::ConnectionLost(reason)
    }

    fn send(&self, packet: Packet) -> Result<(), BrokerError> {
        if self.state.lock().lost.is_some() {
            return Err(self.lost_error());
        }
        self.outbound.send(packet).map_err(|_| self.lost_error())
    }

    /// Allocate a packet identifier not in use by a pending publish or subscribe
    fn allocate_packet_id(&self, state: &State) -> u16 {
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !state.publishes.contains_key(&id) && !state.subscribes.contains_key(&id)
            {
                return id;
            }
        }
    }

    /// Mark the connection as gone and release everyone waiting on it
    fn fail(&self, reason: String) {
        let mut state = self.state.lock();
        if state.lost.is_some() {
            return;
        }
        warn!("Broker connection lost: {}", reason);
        state.lost = Some(reason);
        // Dropping the senders wakes every waiter with an error
        state.publishes.clear();
        state.subscribes.clear();
        state.routes.clear();
    }

    fn dispatch(&self, packet: Packet) -> Result<(), BrokerError> {
        match packet {
            Packet::Publish(publish) => {
                if publish.qos == QoS::ExactlyOnce {
                    return Err(BrokerError::Protocol(
                        "QoS 2 delivery was not requested".to_string(),
                    ));
                }
                self.route(publish)?;
            }
            Packet::PubAck(ack) => match self.state.lock().publishes.remove(&ack.packet_id) {
                Some(waiter) => {
                    let _ = waiter.send(ack.reason_code);
                }
                None => warn!("PUBACK for unknown packet id {}", ack.packet_id),
            },
            Packet::SubAck(ack) => match self.state.lock().subscribes.remove(&ack.packet_id) {
                Some(waiter) => {
                    let _ = waiter.send(ack.reason_codes);
                }
                None => warn!("SUBACK for unknown packet id {}", ack.packet_id),
            },
            Packet::PingResp => debug!("PINGRESP received"),
            Packet::Disconnect(disconnect) => {
                return Err(BrokerError::ConnectionLost(format!(
                    "broker sent DISCONNECT: {}",
                    disconnect.reason_code
                )));
            }
            other => {
                return Err(BrokerError::Protocol(format!(
                    "unexpected {} from broker",
                    other.name()
                )));
            }
        }
        Ok(())
    }

    fn route(&self, publish: Publish) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let ids = &publish.properties.subscription_identifiers;

        let target = state
            .routes
            .iter()
            .position(|r| {
                ids.contains(&r.subscription_id) && filter_matches(&r.filter, &publish.topic)
            })
            .or_else(|| {
                state
                    .routes
                    .iter()
                    .position(|r| filter_matches(&r.filter, &publish.topic))
            });

        match target {
            Some(index) => {
                if let Err(mpsc::error::SendError(publish)) = state.routes[index].tx.send(publish) {
                    // Consumer went away; keep the message for a later one
                    state.routes.remove(index);
                    state.unrouted.push_back(publish);
                }
            }
            None if state.sealed => {
                return Err(BrokerError::Protocol(format!(
                    "delivery on '{}' matches no subscription of this bridge",
                    publish.topic
                )));
            }
            None => {
                debug!("Holding message on '{}' until a consumer subscribes", publish.topic);
                state.unrouted.push_back(publish);
            }
        }
        Ok(())
    }
}

/// Convert an inbound publish into the broker message model
fn message_from_publish(publish: &Publish) -> Result<BrokerMessage, BrokerError> {
    let props = &publish.properties;

    let body = match (
        props.payload_format_indicator,
        std::str::from_utf8(&publish.payload),
    ) {
        (Some(1), Ok(text)) | (None, Ok(text)) => BrokerBody::Text(text.to_string()),
        (Some(1), Err(_)) => {
            return Err(BrokerError::Malformed(
                "payload declared as UTF-8 is not valid UTF-8".to_string(),
            ))
        }
        _ => BrokerBody::Bytes(publish.payload.clone()),
    };

    let correlation_id = props
        .correlation_data
        .as_ref()
        .map(|data| {
            String::from_utf8(data.to_vec())
                .map_err(|_| BrokerError::Malformed("correlation data is not UTF-8".to_string()))
        })
        .transpose()?;

    Ok(BrokerMessage {
        body,
        message_id: props.user_property(MESSAGE_ID_PROPERTY).map(str::to_string),
        correlation_id,
        reply_to: props.response_topic.clone().map(Destination::Queue),
    })
}

/// Build an outbound QoS 1 publish for a broker message
fn publish_from_message(topic: &str, packet_id: u16, message: BrokerMessage) -> Publish {
    let mut properties = Properties::default();
    let payload = match message.body {
        BrokerBody::Text(text) => {
            properties.payload_format_indicator = Some(1);
            Bytes::from(text.into_bytes())
        }
        BrokerBody::Bytes(data) => data,
    };
    properties.correlation_data = message.correlation_id.map(|c| Bytes::from(c.into_bytes()));
    properties.response_topic = message.reply_to.map(|d| d.name().to_string());
    if let Some(id) = message.message_id {
        properties
            .user_properties
            .push((MESSAGE_ID_PROPERTY.to_string(), id));
    }

    Publish {
        dup: false,
        qos: QoS::AtLeastOnce,
        retain: false,
        topic: topic.to_string(),
        packet_id: Some(packet_id),
        payload,
        properties,
    }
}

/// MQTT v5.0 session in client-acknowledge mode
pub struct MqttSession {
    client_id: String,
    subscribe_timeout: Duration,
    shared: Arc<Shared>,
}

impl MqttSession {
    /// Connect to the endpoint in `options`
    ///
    /// Fails with [`BrokerError::Timeout`] if TCP, TLS and CONNACK together
    /// take longer than the connect timeout. Never retries.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, BrokerError> {
        let endpoint = Endpoint::parse(&options.endpoint)?;
        if !endpoint.tls && !options.allow_plaintext {
            return Err(BrokerError::InvalidEndpoint(format!(
                "plaintext endpoint '{}' refused",
                options.endpoint
            )));
        }

        info!(
            "Connecting to broker {}:{} as '{}'",
            endpoint.host, endpoint.port, options.client_id
        );

        timeout(options.connect_timeout, async {
            let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
            stream.set_nodelay(true)?;

            if endpoint.tls {
                let connector = client_connector(&options.ca_bundle)?;
                let server_name = ServerName::try_from(endpoint.host.clone())
                    .map_err(|_| TlsError::InvalidServerName(endpoint.host.clone()))?;
                let stream = connector.connect(server_name, stream).await?;
                debug!("TLS established with {}", endpoint.host);
                Self::handshake(stream, options).await
            } else {
                Self::handshake(stream, options).await
            }
        })
        .await
        .map_err(|_| BrokerError::Timeout)?
    }

    /// Open a session over an already connected stream
    pub async fn establish<S>(stream: S, options: &ConnectOptions) -> Result<Self, BrokerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        timeout(options.connect_timeout, Self::handshake(stream, options))
            .await
            .map_err(|_| BrokerError::Timeout)?
    }

    async fn handshake<S>(stream: S, options: &ConnectOptions) -> Result<Self, BrokerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        let mut properties = Properties::default();
        properties.session_expiry_interval = Some(options.session_expiry);
        let connect = Packet::Connect(Box::new(Connect {
            client_id: options.client_id.clone(),
            clean_start: false,
            keep_alive: options.keep_alive,
            username: (!options.username.is_empty()).then(|| options.username.clone()),
            password: (!options.password.is_empty())
                .then(|| Bytes::from(options.password.clone().into_bytes())),
            properties,
        }));

        let encoder = Encoder::new();
        let mut buf = BytesMut::new();
        encoder.encode(&connect, &mut buf)?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        debug!("CONNECT sent for '{}'", options.client_id);

        // Anything after CONNACK in the same read is handed to the reader task
        let decoder = Decoder::new();
        let mut read_buf = BytesMut::with_capacity(4096);
        let packet = loop {
            if let Some((packet, used)) = decoder.decode(&read_buf)? {
                read_buf.advance(used);
                break packet;
            }
            if reader.read_buf(&mut read_buf).await? == 0 {
                return Err(BrokerError::ConnectionLost(
                    "connection closed before CONNACK".to_string(),
                ));
            }
        };

        let connack = match packet {
            Packet::ConnAck(connack) => connack,
            other => {
                return Err(BrokerError::Protocol(format!(
                    "expected CONNACK, got {}",
                    other.name()
                )))
            }
        };
        if connack.reason_code != ReasonCode::Success {
            return Err(BrokerError::Rejected(connack.reason_code));
        }

        info!(
            "Connected to broker as '{}' (session_present={})",
            options.client_id, connack.session_present
        );

        let keep_alive = connack
            .properties
            .server_keep_alive
            .unwrap_or(options.keep_alive);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            outbound,
            next_packet_id: AtomicU16::new(1),
            next_subscription_id: AtomicU32::new(1),
            state: Mutex::new(State::default()),
        });

        tokio::spawn(read_loop(reader, read_buf, decoder, shared.clone()));
        tokio::spawn(write_loop(
            writer,
            outbound_rx,
            encoder,
            keep_alive,
            shared.clone(),
        ));

        Ok(Self {
            client_id: options.client_id.clone(),
            subscribe_timeout: options.connect_timeout,
            shared,
        })
    }

    async fn subscribe(&self, filter: String) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        let subscription_id = self
            .shared
            .next_subscription_id
            .fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();

        let packet_id = {
            let mut state = self.shared.state.lock();
            if state.lost.is_some() {
                drop(state);
                return Err(self.shared.lost_error());
            }

            // Held publishes carry the subscription identifiers of an earlier
            // connection, so they are claimed by filter alone
            let held = std::mem::take(&mut state.unrouted);
            for publish in held {
                if filter_matches(&filter, &publish.topic) {
                    let _ = tx.send(publish);
                } else {
                    state.unrouted.push_back(publish);
                }
            }

            state.routes.push(Route {
                subscription_id,
                filter: filter.clone(),
                tx,
            });
            let packet_id = self.shared.allocate_packet_id(&state);
            state.subscribes.insert(packet_id, ack_tx);
            packet_id
        };

        self.shared.send(Packet::Subscribe(Subscribe::single(
            packet_id,
            filter.clone(),
            subscription_id,
        )))?;

        let codes = timeout(self.subscribe_timeout, ack_rx)
            .await
            .map_err(|_| BrokerError::Timeout)?
            .map_err(|_| self.shared.lost_error())?;

        match codes.first() {
            Some(code) if !code.is_error() => {
                info!("Subscribed to '{}' (granted {})", filter, code);
                Ok(Box::new(MqttConsumer {
                    subscription_id,
                    rx,
                    shared: self.shared.clone(),
                }))
            }
            Some(code) => {
                self.shared
                    .state
                    .lock()
                    .routes
                    .retain(|r| r.subscription_id != subscription_id);
                Err(BrokerError::SubscribeFailed {
                    filter,
                    reason: *code,
                })
            }
            None => Err(BrokerError::Protocol("SUBACK without reason codes".to_string())),
        }
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn create_producer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageProducer>, BrokerError> {
        validate_destination(destination.name())
            .map_err(|e| BrokerError::InvalidDestination(format!("{}: {}", destination, e)))?;
        debug!("Producer created for {}", destination);

        Ok(Box::new(MqttProducer {
            destination: destination.clone(),
            shared: self.shared.clone(),
        }))
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        validate_destination(destination.name())
            .map_err(|e| BrokerError::InvalidDestination(format!("{}: {}", destination, e)))?;

        let filter = match destination {
            // Competing consumers share the queue
            Destination::Queue(name) => shared_filter(&self.client_id, name),
            Destination::Topic(name) => name.clone(),
        };
        self.subscribe(filter).await
    }

    async fn create_durable_consumer(
        &self,
        topic: &str,
        subscriber_id: &str,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        validate_destination(topic)
            .map_err(|e| BrokerError::InvalidDestination(format!("topic://{}: {}", topic, e)))?;
        if subscriber_id.is_empty() || subscriber_id.contains(['/', '+', '#']) {
            return Err(BrokerError::InvalidDestination(format!(
                "invalid durable subscriber id '{}'",
                subscriber_id
            )));
        }

        self.subscribe(shared_filter(subscriber_id, topic)).await
    }

    async fn consumers_ready(&self) -> Result<(), BrokerError> {
        let stale: Vec<String> = {
            let mut state = self.shared.state.lock();
            state.sealed = true;
            state.unrouted.drain(..).map(|publish| publish.topic).collect()
        };
        if stale.is_empty() {
            return Ok(());
        }

        let reason = format!(
            "{} delivered message(s) match no subscription of this bridge: {}",
            stale.len(),
            stale.join(", ")
        );
        self.shared.fail(reason.clone());
        Err(BrokerError::Protocol(reason))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        info!("Closing broker session '{}'", self.client_id);
        self.shared.send(Packet::Disconnect(Disconnect::default()))
    }
}

struct MqttProducer {
    destination: Destination,
    shared: Arc<Shared>,
}

#[async_trait]
impl MessageProducer for MqttProducer {
    fn destination(&self) -> &Destination {
        &self.destination
    }

    async fn send(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        let (tx, rx) = oneshot::channel();
        let packet_id = {
            let mut state = self.shared.state.lock();
            let packet_id = self.shared.allocate_packet_id(&state);
            state.publishes.insert(packet_id, tx);
            packet_id
        };

        let publish = publish_from_message(self.destination.name(), packet_id, message);
        if let Err(e) = self.shared.send(Packet::Publish(publish)) {
            self.shared.state.lock().publishes.remove(&packet_id);
            return Err(e);
        }

        let reason = rx.await.map_err(|_| self.shared.lost_error())?;
        if reason.is_error() {
            return Err(BrokerError::SendFailed(reason));
        }
        if reason == ReasonCode::NoMatchingSubscribers {
            // The broker keeps nothing for an unsubscribed topic, so a queue
            // message was dropped
            if self.destination.is_queue() {
                return Err(BrokerError::SendFailed(reason));
            }
            debug!("No subscribers on {}", self.destination);
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        debug!("Producer closed for {}", self.destination);
        Ok(())
    }
}

struct MqttConsumer {
    subscription_id: u32,
    rx: mpsc::UnboundedReceiver<Publish>,
    shared: Arc<Shared>,
}

#[async_trait]
impl MessageConsumer for MqttConsumer {
    async fn receive(&mut self) -> Result<Delivery, BrokerError> {
        let publish = self.rx.recv().await.ok_or_else(|| self.shared.lost_error())?;
        let message = message_from_publish(&publish)?;

        Ok(Delivery::new(
            message,
            Box::new(MqttAck {
                packet_id: publish.packet_id,
                shared: self.shared.clone(),
            }),
        ))
    }
}

impl Drop for MqttConsumer {
    fn drop(&mut self) {
        let id = self.subscription_id;
        self.shared
            .state
            .lock()
            .routes
            .retain(|r| r.subscription_id != id);
    }
}

struct MqttAck {
    /// Absent for QoS 0 deliveries, which need no acknowledgment
    packet_id: Option<u16>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Acknowledger for MqttAck {
    async fn acknowledge(self: Box<Self>) -> Result<(), BrokerError> {
        match self.packet_id {
            Some(packet_id) => self.shared.send(Packet::PubAck(PubAck::new(packet_id))),
            None => Ok(()),
        }
    }
}

async fn read_loop<R>(mut reader: R, mut buf: BytesMut, decoder: Decoder, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let result: Result<(), BrokerError> = async {
        loop {
            while let Some((packet, used)) = decoder.decode(&buf)? {
                buf.advance(used);
                shared.dispatch(packet)?;
            }
            if reader.read_buf(&mut buf).await? == 0 {
                return Err(BrokerError::ConnectionLost(
                    "connection closed by broker".to_string(),
                ));
            }
        }
    }
    .await;

    if let Err(e) = result {
        shared.fail(e.to_string());
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    encoder: Encoder,
    keep_alive: u16,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    let pinging = keep_alive > 0;
    let mut keepalive_timer =
        tokio::time::interval(Duration::from_secs(u64::from(keep_alive.max(1))));
    keepalive_timer.reset();
    let mut buf = BytesMut::new();

    let result: Result<(), BrokerError> = async {
        loop {
            let packet = tokio::select! {
                packet = rx.recv() => match packet {
                    Some(packet) => packet,
                    None => return Ok(()),
                },
                _ = keepalive_timer.tick(), if pinging => Packet::PingReq,
            };

            let closing = matches!(packet, Packet::Disconnect(_));
            buf.clear();
            encoder.encode(&packet, &mut buf)?;
            writer.write_all(&buf).await?;
            writer.flush().await?;

            if closing {
                writer.shutdown().await?;
                return Ok(());
            }
        }
    }
    .await;

    match result {
        Ok(()) => shared.fail("session closed".to_string()),
        Err(e) => shared.fail(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(
            Endpoint::parse("ssl://b-1234.mq.eu-west-1.amazonaws.com:8883").unwrap(),
            Endpoint {
                tls: true,
                host: "b-1234.mq.eu-west-1.amazonaws.com".to_string(),
                port: 8883,
            }
        );
        assert_eq!(
            Endpoint::parse("mqtt://localhost").unwrap(),
            Endpoint {
                tls: false,
                host: "localhost".to_string(),
                port: 1883,
            }
        );
        assert_eq!(Endpoint::parse("mqtts://[::1]:9000/").unwrap().host, "::1");

        assert!(Endpoint::parse("localhost:1883").is_err());
        assert!(Endpoint::parse("ws://localhost").is_err());
        assert!(Endpoint::parse("ssl://:8883").is_err());
        assert!(Endpoint::parse("ssl://host:port").is_err());
    }

    #[test]
    fn test_message_from_publish_text_detection() {
        let mut publish = Publish {
            payload: Bytes::from_static(b"ping"),
            ..Default::default()
        };
        assert_eq!(
            message_from_publish(&publish).unwrap().body,
            BrokerBody::Text("ping".to_string())
        );

        publish.properties.payload_format_indicator = Some(0);
        assert!(matches!(
            message_from_publish(&publish).unwrap().body,
            BrokerBody::Bytes(_)
        ));

        publish.properties.payload_format_indicator = None;
        publish.payload = Bytes::from_static(&[0xff, 0xfe]);
        assert!(matches!(
            message_from_publish(&publish).unwrap().body,
            BrokerBody::Bytes(_)
        ));

        publish.properties.payload_format_indicator = Some(1);
        assert!(matches!(
            message_from_publish(&publish),
            Err(BrokerError::Malformed(_))
        ));
    }

    #[test]
    fn test_publish_round_trips_metadata() {
        let message = BrokerMessage {
            body: BrokerBody::Text("ping".to_string()),
            message_id: Some("ID:1".to_string()),
            correlation_id: Some("abc123".to_string()),
            reply_to: Some(Destination::Queue("replies".to_string())),
        };
        let publish = publish_from_message("orders", 4, message.clone());
        assert_eq!(publish.qos, QoS::AtLeastOnce);
        assert_eq!(publish.packet_id, Some(4));
        assert_eq!(message_from_publish(&publish).unwrap(), message);
    }

    #[test]
    fn test_message_without_metadata() {
        let publish = publish_from_message("orders", 1, BrokerMessage::text("ping"));
        assert_eq!(publish.properties.correlation_data, None);
        assert_eq!(publish.properties.response_topic, None);

        let message = message_from_publish(&publish).unwrap();
        assert_eq!(message.correlation_id, None);
        assert_eq!(message.reply_to, None);
        assert_eq!(message.message_id, None);
    }
}
