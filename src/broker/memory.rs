//! In-process broker
//!
//! Implements the session traits without a network: queues deliver each
//! message to one consumer, topics fan out to every subscription, durable
//! subscriptions keep collecting while no consumer is attached, and a
//! delivery dropped without acknowledgment goes back to the front of its
//! mailbox for redelivery.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::topic::validate_destination;
use super::{
    Acknowledger, BrokerError, BrokerMessage, BrokerSession, Delivery, MessageConsumer,
    MessageProducer,
};
use crate::message::Destination;

/// Messages waiting for one consumer (or one group of competing consumers)
#[derive(Default)]
struct Mailbox {
    messages: Mutex<VecDeque<BrokerMessage>>,
    notify: Notify,
}

impl Mailbox {
    fn push(&self, message: BrokerMessage) {
        self.messages.lock().push_back(message);
        self.notify.notify_one();
    }

    fn push_front(&self, message: BrokerMessage) {
        self.messages.lock().push_front(message);
        self.notify.notify_one();
    }

    async fn pop(&self) -> BrokerMessage {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.messages.lock().pop_front() {
                return message;
            }
            notified.await;
        }
    }

    fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

#[derive(Default)]
struct Topics {
    /// Durable subscriptions keyed by (topic, subscriber id)
    durable: HashMap<(String, String), Arc<Mailbox>>,
    /// Non-durable subscriptions that exist while their consumer does
    ephemeral: HashMap<String, Vec<(u64, Arc<Mailbox>)>>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, Arc<Mailbox>>>,
    topics: Mutex<Topics>,
    next_subscription: AtomicU64,
    next_message_id: AtomicU64,
}

impl Inner {
    fn queue(&self, name: &str) -> Arc<Mailbox> {
        self.queues
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn deliver(&self, destination: &Destination, message: BrokerMessage) {
        match destination {
            Destination::Queue(name) => self.queue(name).push(message),
            Destination::Topic(name) => {
                let topics = self.topics.lock();
                for ((topic, _), mailbox) in &topics.durable {
                    if topic == name {
                        mailbox.push(message.clone());
                    }
                }
                for (_, mailbox) in topics.ephemeral.get(name).into_iter().flatten() {
                    mailbox.push(message.clone());
                }
            }
        }
    }
}

/// Shared in-process broker; clone it to hand out sessions
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session with the given client identity
    pub fn session(&self, client_id: impl Into<String>) -> MemorySession {
        MemorySession {
            client_id: client_id.into(),
            inner: self.inner.clone(),
        }
    }

    /// Messages waiting on a queue (not counting unacknowledged deliveries)
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .queues
            .lock()
            .get(queue)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Messages held for a durable subscriber
    pub fn durable_depth(&self, topic: &str, subscriber_id: &str) -> usize {
        self.inner
            .topics
            .lock()
            .durable
            .get(&(topic.to_string(), subscriber_id.to_string()))
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// Session on a [`MemoryBroker`]
#[derive(Clone)]
pub struct MemorySession {
    client_id: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl BrokerSession for MemorySession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn create_producer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageProducer>, BrokerError> {
        validate_destination(destination.name())
            .map_err(|e| BrokerError::InvalidDestination(format!("{}: {}", destination, e)))?;

        Ok(Box::new(MemoryProducer {
            destination: destination.clone(),
            inner: self.inner.clone(),
        }))
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        validate_destination(destination.name())
            .map_err(|e| BrokerError::InvalidDestination(format!("{}: {}", destination, e)))?;

        let (mailbox, subscription) = match destination {
            Destination::Queue(name) => (self.inner.queue(name), None),
            Destination::Topic(name) => {
                let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
                let mailbox = Arc::new(Mailbox::default());
                self.inner
                    .topics
                    .lock()
                    .ephemeral
                    .entry(name.clone())
                    .or_default()
                    .push((id, mailbox.clone()));
                (mailbox, Some((name.clone(), id)))
            }
        };

        Ok(Box::new(MemoryConsumer {
            mailbox,
            subscription,
            inner: self.inner.clone(),
        }))
    }

    async fn create_durable_consumer(
        &self,
        topic: &str,
        subscriber_id: &str,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        validate_destination(topic)
            .map_err(|e| BrokerError::InvalidDestination(format!("topic://{}: {}", topic, e)))?;

        let mailbox = self
            .inner
            .topics
            .lock()
            .durable
            .entry((topic.to_string(), subscriber_id.to_string()))
            .or_default()
            .clone();
        debug!("Durable subscriber '{}' attached to '{}'", subscriber_id, topic);

        Ok(Box::new(MemoryConsumer {
            mailbox,
            subscription: None,
            inner: self.inner.clone(),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

struct MemoryProducer {
    destination: Destination,
    inner: Arc<Inner>,
}

#[async_trait]
impl MessageProducer for MemoryProducer {
    fn destination(&self) -> &Destination {
        &self.destination
    }

    async fn send(&self, mut message: BrokerMessage) -> Result<(), BrokerError> {
        if message.message_id.is_none() {
            let id = self.inner.next_message_id.fetch_add(1, Ordering::Relaxed);
            message.message_id = Some(format!("ID:memory-{}", id));
        }
        self.inner.deliver(&self.destination, message);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        Ok(())
    }
}

struct MemoryConsumer {
    mailbox: Arc<Mailbox>,
    /// Ephemeral topic subscription to remove on drop
    subscription: Option<(String, u64)>,
    inner: Arc<Inner>,
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    async fn receive(&mut self) -> Result<Delivery, BrokerError> {
        let message = self.mailbox.pop().await;
        Ok(Delivery::new(
            message.clone(),
            Box::new(MemoryAck {
                mailbox: self.mailbox.clone(),
                message: Some(message),
            }),
        ))
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if let Some((topic, id)) = self.subscription.take() {
            if let Some(subs) = self.inner.topics.lock().ephemeral.get_mut(&topic) {
                subs.retain(|(sub, _)| *sub != id);
            }
        }
    }
}

/// Unacknowledged delivery; returns the message to its mailbox when dropped
struct MemoryAck {
    mailbox: Arc<Mailbox>,
    message: Option<BrokerMessage>,
}

#[async_trait]
impl Acknowledger for MemoryAck {
    async fn acknowledge(mut self: Box<Self>) -> Result<(), BrokerError> {
        self.message = None;
        Ok(())
    }
}

impl Drop for MemoryAck {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            debug!("Unacknowledged message returned for redelivery");
            self.mailbox.push_front(message);
        }
    }
}
