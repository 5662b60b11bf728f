//! mqbridge - MQTT v5 broker to cloud queue and topic bridge
//!
//! Relays messages between a broker's queues and topics and a cloud queue
//! and topic service, one way or as request/response pairs, in either
//! direction. One parameterized bridge covers every combination of
//! direction, pattern and topology.

pub mod bridge;
pub mod broker;
pub mod cloud;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod parameters;
pub mod protocol;
pub mod relay;
pub mod signing;
pub mod translate;

pub use bridge::{Bridge, Substrates, TopicEventHandler};
pub use broker::{BrokerSession, MemoryBroker, MqttSession};
pub use cloud::{CloudQueue, CloudTopic, MemoryQueue, MemoryTopic};
pub use config::{BridgeSettings, Config, DeploymentShape, Variant};
pub use error::{BridgeError, TransportError};
pub use message::{Destination, Message};
pub use relay::{Relay, RequestResponseRelay};
