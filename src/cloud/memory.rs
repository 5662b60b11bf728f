//! In-process queue and topic
//!
//! A received message stays in flight until deleted through the receipt
//! handle of that receive. [`MemoryQueue::release_in_flight`] makes undeleted
//! messages visible again, standing in for an expired visibility timeout.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::{CloudError, CloudMessage, CloudQueue, CloudTopic, ReceivedMessage};

#[derive(Debug, Clone)]
struct Stored {
    message_id: String,
    message: CloudMessage,
}

#[derive(Default)]
struct QueueState {
    visible: VecDeque<Stored>,
    /// In-flight messages keyed by receipt handle
    in_flight: HashMap<String, Stored>,
    deleted: Vec<String>,
}

struct QueueInner {
    url: String,
    state: Mutex<QueueState>,
    notify: Notify,
    next_id: AtomicU64,
    next_receipt: AtomicU64,
}

/// Shared in-process queue; clones address the same queue
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<QueueInner>,
}

impl MemoryQueue {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                url: url.into(),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                next_id: AtomicU64::new(1),
                next_receipt: AtomicU64::new(1),
            }),
        }
    }

    fn enqueue(&self, message: CloudMessage) -> String {
        let message_id = format!(
            "msg-{}",
            self.inner.next_id.fetch_add(1, Ordering::Relaxed)
        );
        self.inner.state.lock().visible.push_back(Stored {
            message_id: message_id.clone(),
            message,
        });
        self.inner.notify.notify_waiters();
        message_id
    }

    fn take_batch(&self, max_messages: usize) -> Vec<ReceivedMessage> {
        let mut state = self.inner.state.lock();
        let count = max_messages.min(state.visible.len());
        let taken: Vec<Stored> = state.visible.drain(..count).collect();
        let mut batch = Vec::with_capacity(count);
        for stored in taken {
            let receipt_handle = format!(
                "receipt-{}",
                self.inner.next_receipt.fetch_add(1, Ordering::Relaxed)
            );
            batch.push(ReceivedMessage {
                message_id: stored.message_id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: stored.message.body.clone(),
                attributes: stored.message.attributes.clone(),
            });
            state.in_flight.insert(receipt_handle, stored);
        }
        batch
    }

    /// Make every received-but-undeleted message visible again, oldest first
    pub fn release_in_flight(&self) -> usize {
        let mut state = self.inner.state.lock();
        let mut released: Vec<Stored> = state.in_flight.drain().map(|(_, s)| s).collect();
        released.sort_by_key(|s| sequence(&s.message_id));
        let count = released.len();
        for stored in released.into_iter().rev() {
            state.visible.push_front(stored);
        }
        drop(state);
        if count > 0 {
            self.inner.notify.notify_waiters();
        }
        count
    }

    /// Messages waiting to be received
    pub fn visible(&self) -> Vec<CloudMessage> {
        self.inner
            .state
            .lock()
            .visible
            .iter()
            .map(|s| s.message.clone())
            .collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Ids of deleted messages, in deletion order
    pub fn deleted(&self) -> Vec<String> {
        self.inner.state.lock().deleted.clone()
    }
}

fn sequence(message_id: &str) -> u64 {
    message_id
        .strip_prefix("msg-")
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}

#[async_trait]
impl CloudQueue for MemoryQueue {
    fn url(&self) -> &str {
        &self.inner.url
    }

    async fn send(&self, message: &CloudMessage) -> Result<String, CloudError> {
        Ok(self.enqueue(message.clone()))
    }

    async fn receive(
        &self,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, CloudError> {
        let max_messages = max_messages.max(1) as usize;
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.take_batch(max_messages);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), CloudError> {
        let mut state = self.inner.state.lock();
        let stored = state
            .in_flight
            .remove(receipt_handle)
            .ok_or_else(|| CloudError::InvalidReceipt(receipt_handle.to_string()))?;
        debug!("Deleted {} from {}", stored.message_id, self.inner.url);
        state.deleted.push(stored.message_id);
        Ok(())
    }
}

#[derive(Default)]
struct TopicState {
    published: Vec<CloudMessage>,
    subscribers: Vec<MemoryQueue>,
}

/// Shared in-process topic; published messages fan out to subscribed queues
#[derive(Clone)]
pub struct MemoryTopic {
    arn: Arc<str>,
    state: Arc<Mutex<TopicState>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryTopic {
    pub fn new(arn: impl Into<String>) -> Self {
        Self {
            arn: Arc::from(arn.into()),
            state: Arc::new(Mutex::new(TopicState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Deliver every later publish to `queue` as well
    pub fn subscribe(&self, queue: MemoryQueue) {
        self.state.lock().subscribers.push(queue);
    }

    /// Every message published so far
    pub fn published(&self) -> Vec<CloudMessage> {
        self.state.lock().published.clone()
    }
}

#[async_trait]
impl CloudTopic for MemoryTopic {
    fn arn(&self) -> &str {
        &self.arn
    }

    async fn publish(&self, message: &CloudMessage) -> Result<String, CloudError> {
        let subscribers = {
            let mut state = self.state.lock();
            state.published.push(message.clone());
            state.subscribers.clone()
        };
        for queue in subscribers {
            queue.enqueue(message.clone());
        }
        Ok(format!(
            "notification-{}",
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ))
    }
}
