//! Broker client facade (the adapter's only door to the message broker).
//!
//! The adapter never talks to a broker directly. Connection establishment, security
//! negotiation and the transport codec all live behind [`BrokerClient`], which is injected
//! at construction.
//!
//! ## Design Philosophy
//!
//! - **Capability, not logic**: the core calls `connect_*`, `send` and `disconnect_*`; it
//!   never inspects how they are done
//! - **One consumer stream**: `connect_consumer` hands back a single [`RecordStream`] for the
//!   whole topic set; the delivery dispatcher is its only reader
//! - **Raw payloads**: records carry bytes; decoding is the router's job

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use kafka_pubsub_core::TopicSet;

use crate::record::{InboundRecord, OutboundRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker send error: {0}")]
    Send(String),

    #[error("broker disconnect error: {0}")]
    Disconnect(String),

    #[error("{0} is not connected")]
    NotConnected(&'static str),
}

/// The stream of records read by the single consumer connection.
///
/// Records arrive in the order the broker delivered them. `recv` returns `None` once the
/// consumer connection is gone.
#[derive(Debug)]
pub struct RecordStream {
    receiver: mpsc::Receiver<InboundRecord>,
}

impl RecordStream {
    pub fn new(receiver: mpsc::Receiver<InboundRecord>) -> Self {
        Self { receiver }
    }

    /// Create a connected `(sender, stream)` pair with the given buffer size.
    pub fn channel(buffer: usize) -> (mpsc::Sender<InboundRecord>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::new(rx))
    }

    /// Wait for the next record.
    pub async fn recv(&mut self) -> Option<InboundRecord> {
        self.receiver.recv().await
    }

    /// Take a record if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Option<InboundRecord> {
        self.receiver.try_recv().ok()
    }

    /// Stop accepting records; already-buffered records can still be drained.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Broker client capability injected into the adapter.
///
/// ## Connection model
///
/// - `connect_producer` is called lazily by the first publish
/// - `connect_consumer` is called lazily by the first subscription, exactly once per adapter
///   lifetime, with the full configured topic set
/// - `disconnect_*` are called by the adapter's `close`, only for connections that were
///   established
///
/// ## Thread Safety
///
/// The trait requires `Send + Sync`; `send` may be called concurrently from many publishers.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn connect_producer(&self) -> Result<(), BrokerError>;

    async fn connect_consumer(&self, topics: &TopicSet) -> Result<RecordStream, BrokerError>;

    /// Send a record. Must not return before the broker accepted (or failed) the write.
    async fn send(&self, record: OutboundRecord) -> Result<(), BrokerError>;

    async fn disconnect_consumer(&self) -> Result<(), BrokerError>;

    async fn disconnect_producer(&self) -> Result<(), BrokerError>;
}

#[async_trait]
impl<B> BrokerClient for Arc<B>
where
    B: BrokerClient + ?Sized,
{
    async fn connect_producer(&self) -> Result<(), BrokerError> {
        (**self).connect_producer().await
    }

    async fn connect_consumer(&self, topics: &TopicSet) -> Result<RecordStream, BrokerError> {
        (**self).connect_consumer(topics).await
    }

    async fn send(&self, record: OutboundRecord) -> Result<(), BrokerError> {
        (**self).send(record).await
    }

    async fn disconnect_consumer(&self) -> Result<(), BrokerError> {
        (**self).disconnect_consumer().await
    }

    async fn disconnect_producer(&self) -> Result<(), BrokerError> {
        (**self).disconnect_producer().await
    }
}
