//! In-process queue for tests and single-process runs
//!
//! Messages live only as long as the process. In-flight messages stay hidden
//! until they are settled; there is no visibility timeout.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::{timeout_at, Instant};

use super::{BatchQueue, Delivery, QueueDepth, QueueError};

#[derive(Debug, Clone)]
struct Message {
    id: i64,
    body: Vec<u8>,
    attempts: u32,
}

/// A message moved aside by `dead_letter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: i64,
    pub body: Vec<u8>,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Message>,
    in_flight: HashMap<i64, Message>,
    dead_letters: Vec<DeadLetter>,
}

#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    state: Mutex<State>,
    available: Notify,
    next_id: AtomicI64,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            available: Notify::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Snapshot of the dead-letter store
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    async fn try_claim(&self) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        let mut message = state.ready.pop_front()?;
        message.attempts += 1;

        let delivery = Delivery {
            id: message.id,
            body: message.body.clone(),
            attempt: message.attempts,
        };
        state.in_flight.insert(message.id, message);
        Some(delivery)
    }

    /// Take a delivery out of flight, keeping the lock for the caller
    async fn settle(
        &self,
        delivery: &Delivery,
    ) -> Result<(MutexGuard<'_, State>, Message), QueueError> {
        let mut state = self.state.lock().await;
        let message = state
            .in_flight
            .remove(&delivery.id)
            .ok_or(QueueError::UnknownDelivery(delivery.id))?;
        Ok((state, message))
    }
}

#[async_trait]
impl BatchQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, body: &[u8]) -> Result<i64, QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().await.ready.push_back(Message {
            id,
            body: body.to_vec(),
            attempts: 0,
        });
        self.available.notify_one();
        Ok(id)
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_claim().await {
                return Ok(Some(delivery));
            }
            if timeout_at(deadline, self.available.notified()).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery).await.map(|_| ())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let (mut state, message) = self.settle(delivery).await?;
        state.ready.push_front(message);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let (mut state, message) = self.settle(delivery).await?;
        state.dead_letters.push(DeadLetter {
            id: message.id,
            body: message.body,
            attempts: message.attempts,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let state = self.state.lock().await;
        Ok(QueueDepth {
            ready: state.ready.len() as u64,
            in_flight: state.in_flight.len() as u64,
            dead_lettered: state.dead_letters.len() as u64,
        })
    }
}
