//! Stream transport seam.
//!
//! The transport is an opaque at-least-once channel: a message may be
//! redelivered until it is acknowledged. [`MessageSource`] is the consumer
//! side, [`MessageSink`] the producer side.

pub mod in_memory;

pub use in_memory::InMemoryQueue;

use std::sync::Arc;

use async_trait::async_trait;
use orderflow_core::TransportError;

/// A message pulled from the transport, pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Delivery tag; pass to [`MessageSource::ack`].
    pub tag: u64,
    pub payload: Vec<u8>,
}

/// Consumer side of the stream.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message. `None` once the source is closed and drained.
    async fn recv(&self) -> Result<Option<ReceivedMessage>, TransportError>;

    /// Advance the cursor past a received message.
    async fn ack(&self, tag: u64) -> Result<(), TransportError>;
}

/// Producer side of the stream.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: MessageSource + ?Sized> MessageSource for Arc<T> {
    async fn recv(&self) -> Result<Option<ReceivedMessage>, TransportError> {
        (**self).recv().await
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        (**self).ack(tag).await
    }
}

#[async_trait]
impl<T: MessageSink + ?Sized> MessageSink for Arc<T> {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        (**self).publish(payload).await
    }
}
