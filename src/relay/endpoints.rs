//! Sources and sinks on both substrates

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Inbound, Receipt, Sink, Source};
use crate::broker::{Acknowledger, BrokerError, MessageConsumer, MessageProducer, SharedSession};
use crate::cloud::{CloudQueue, CloudTopic, ReceivedMessage};
use crate::error::{BridgeError, TransportError};
use crate::message::{Destination, Message};
use crate::translate;

// ============================================================================
// Cloud side
// ============================================================================

/// Long-polls a cloud queue
///
/// Messages of a batch are handed out one at a time; each is deleted with
/// its own receipt handle.
pub struct QueueSource {
    queue: Arc<dyn CloudQueue>,
    max_messages: u32,
    wait: Duration,
    buffered: VecDeque<ReceivedMessage>,
}

impl QueueSource {
    pub fn new(queue: Arc<dyn CloudQueue>, max_messages: u32, wait: Duration) -> Self {
        Self {
            queue,
            max_messages,
            wait,
            buffered: VecDeque::new(),
        }
    }
}

#[async_trait]
impl Source for QueueSource {
    fn describe(&self) -> String {
        self.queue.url().to_string()
    }

    async fn next(&mut self) -> Result<Inbound, BridgeError> {
        loop {
            if let Some(received) = self.buffered.pop_front() {
                return Ok(Inbound {
                    message: translate::from_cloud(&received),
                    receipt: Box::new(QueueReceipt {
                        queue: self.queue.clone(),
                        receipt_handle: received.receipt_handle,
                    }),
                });
            }

            let batch = self
                .queue
                .receive(self.max_messages, self.wait)
                .await
                .map_err(|e| BridgeError::Receive(e.into()))?;
            if batch.is_empty() {
                debug!("No messages on {}", self.queue.url());
            }
            self.buffered.extend(batch);
        }
    }
}

struct QueueReceipt {
    queue: Arc<dyn CloudQueue>,
    receipt_handle: String,
}

#[async_trait]
impl Receipt for QueueReceipt {
    async fn settle(self: Box<Self>) -> Result<(), TransportError> {
        self.queue.delete(&self.receipt_handle).await?;
        Ok(())
    }
}

/// Sends to a cloud queue
pub struct QueueSink {
    queue: Arc<dyn CloudQueue>,
}

impl QueueSink {
    pub fn new(queue: Arc<dyn CloudQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Sink for QueueSink {
    fn describe(&self) -> String {
        self.queue.url().to_string()
    }

    async fn forward(&self, message: Message) -> Result<(), BridgeError> {
        let id = self
            .queue
            .send(&translate::to_cloud(&message))
            .await
            .map_err(|e| BridgeError::Forward(e.into()))?;
        debug!("Queued {} as {}", message.label(), id);
        Ok(())
    }
}

/// Publishes to a cloud topic
pub struct TopicSink {
    topic: Arc<dyn CloudTopic>,
}

impl TopicSink {
    pub fn new(topic: Arc<dyn CloudTopic>) -> Self {
        Self { topic }
    }
}

#[async_trait]
impl Sink for TopicSink {
    fn describe(&self) -> String {
        self.topic.arn().to_string()
    }

    async fn forward(&self, message: Message) -> Result<(), BridgeError> {
        let id = self
            .topic
            .publish(&translate::to_cloud(&message))
            .await
            .map_err(|e| BridgeError::Forward(e.into()))?;
        debug!("Published {} as {}", message.label(), id);
        Ok(())
    }
}

// ============================================================================
// Broker side
// ============================================================================

/// Consumes from a broker queue or durable subscription
pub struct BrokerSource {
    consumer: Box<dyn MessageConsumer>,
    name: String,
}

impl BrokerSource {
    pub fn new(consumer: Box<dyn MessageConsumer>, name: impl Into<String>) -> Self {
        Self {
            consumer,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Source for BrokerSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn next(&mut self) -> Result<Inbound, BridgeError> {
        let delivery = self.consumer.receive().await.map_err(|e| match e {
            BrokerError::Malformed(msg) => BridgeError::MalformedMessage(msg),
            e => BridgeError::Receive(e.into()),
        })?;

        // A rejected message drops its acknowledger unacknowledged
        let (message, acknowledger) = delivery.into_parts();
        let message = translate::from_broker(message)?;

        Ok(Inbound {
            message,
            receipt: Box::new(BrokerReceipt { acknowledger }),
        })
    }
}

struct BrokerReceipt {
    acknowledger: Box<dyn Acknowledger>,
}

#[async_trait]
impl Receipt for BrokerReceipt {
    async fn settle(self: Box<Self>) -> Result<(), TransportError> {
        self.acknowledger.acknowledge().await?;
        Ok(())
    }
}

/// Sends to a fixed broker queue or topic
pub struct BrokerSink {
    producer: Box<dyn MessageProducer>,
}

impl BrokerSink {
    pub fn new(producer: Box<dyn MessageProducer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl Sink for BrokerSink {
    fn describe(&self) -> String {
        self.producer.destination().to_string()
    }

    async fn forward(&self, message: Message) -> Result<(), BridgeError> {
        self.producer
            .send(translate::to_broker(message))
            .await
            .map_err(|e| BridgeError::Forward(e.into()))
    }
}

/// Sends each message to the broker queue named by its reply-to
///
/// A producer is opened per message and closed after the send.
pub struct BrokerReplySink {
    session: SharedSession,
}

impl BrokerReplySink {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Sink for BrokerReplySink {
    fn describe(&self) -> String {
        "reply-to queue".to_string()
    }

    async fn forward(&self, mut message: Message) -> Result<(), BridgeError> {
        let Some(reply_to) = message.reply_to.take() else {
            return Err(BridgeError::MissingReplyTo {
                message_id: message.id,
            });
        };

        let destination = Destination::Queue(reply_to);
        let producer = self
            .session
            .create_producer(&destination)
            .await
            .map_err(|e| BridgeError::Forward(e.into()))?;
        producer
            .send(translate::to_broker(message))
            .await
            .map_err(|e| BridgeError::Forward(e.into()))?;
        producer
            .close()
            .await
            .map_err(|e| BridgeError::Forward(e.into()))?;

        debug!("Replied to {}", destination);
        Ok(())
    }
}
