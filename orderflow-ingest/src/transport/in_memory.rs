//! In-memory queue for tests and single-process deployments.
//!
//! Implements both [`MessageSource`] and [`MessageSink`] with at-least-once
//! semantics:
//! - `recv` moves a message from pending to in-flight
//! - `ack` forgets an in-flight message
//! - `requeue_unacked` puts every in-flight message back at the head of the
//!   queue, which is what a broker does when a consumer dies before acking
//!
//! Cloning yields another handle to the same queue.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use orderflow_core::TransportError;
use tokio::sync::Notify;

use super::{MessageSink, MessageSource, ReceivedMessage};

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ReceivedMessage>,
    in_flight: BTreeMap<u64, Vec<u8>>,
    next_tag: u64,
    acked: u64,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Shared in-memory message queue.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    shared: Arc<Shared>,
}

impl InMemoryQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, TransportError> {
        self.shared
            .state
            .lock()
            .map_err(|_| TransportError::Disconnected {
                reason: "queue lock poisoned".to_string(),
            })
    }

    /// Messages waiting to be received.
    pub fn pending_len(&self) -> usize {
        self.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Messages received but not yet acknowledged.
    pub fn in_flight_len(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    pub fn acked_count(&self) -> u64 {
        self.lock().map(|s| s.acked).unwrap_or(0)
    }

    /// Redeliver every unacknowledged message, oldest first.
    pub fn requeue_unacked(&self) -> usize {
        let count = match self.lock() {
            Ok(mut state) => {
                let in_flight = std::mem::take(&mut state.in_flight);
                let count = in_flight.len();
                for (tag, payload) in in_flight.into_iter().rev() {
                    state.pending.push_front(ReceivedMessage { tag, payload });
                }
                count
            }
            Err(_) => 0,
        };
        if count > 0 {
            self.shared.notify.notify_waiters();
        }
        count
    }

    /// Stop accepting publishes. Receivers drain what is pending, then get `None`.
    pub fn close(&self) {
        if let Ok(mut state) = self.lock() {
            state.closed = true;
        }
        self.shared.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|s| s.closed).unwrap_or(true)
    }
}

#[async_trait]
impl MessageSink for InMemoryQueue {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        {
            let mut state = self.lock()?;
            if state.closed {
                return Err(TransportError::Closed);
            }
            let tag = state.next_tag;
            state.next_tag += 1;
            state.pending.push_back(ReceivedMessage { tag, payload });
        }
        self.shared.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl MessageSource for InMemoryQueue {
    async fn recv(&self) -> Result<Option<ReceivedMessage>, TransportError> {
        loop {
            // Register interest before checking so a publish in between is not lost.
            let notified = self.shared.notify.notified();
            {
                let mut state = self.lock()?;
                if let Some(message) = state.pending.pop_front() {
                    state.in_flight.insert(message.tag, message.payload.clone());
                    return Ok(Some(message));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        match state.in_flight.remove(&tag) {
            Some(_) => {
                state.acked += 1;
                Ok(())
            }
            None => Err(TransportError::UnknownTag { tag }),
        }
    }
}
