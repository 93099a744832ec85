//! In-memory broker client for tests/dev.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use kafka_pubsub_core::TopicSet;

use crate::broker::{BrokerClient, BrokerError, RecordStream};
use crate::record::{InboundRecord, OutboundRecord};

const CONSUMER_BUFFER: usize = 1024;

/// Connection counters, for asserting lifecycle behavior in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub producer_connects: usize,
    pub consumer_connects: usize,
    pub producer_disconnects: usize,
    pub consumer_disconnects: usize,
    pub records_sent: usize,
}

#[derive(Debug)]
struct ConsumerAttachment {
    topics: TopicSet,
    tx: mpsc::Sender<InboundRecord>,
}

#[derive(Debug, Default)]
struct BrokerState {
    producer_connected: bool,
    consumer: Option<ConsumerAttachment>,
    log: Vec<OutboundRecord>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_disconnect: Option<String>,
    stats: BrokerStats,
}

/// In-memory broker.
///
/// - No IO
/// - One consumer attachment at a time, fed every record sent to one of its topics
/// - Every accepted record is kept in an append-only log for inspection
/// - Sends to topics nobody consumes are accepted (the broker stored them)
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `connect_producer`/`connect_consumer` call fail.
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        self.state().fail_next_connect = Some(reason.into());
    }

    /// Make the next `send` call fail.
    pub fn fail_next_send(&self, reason: impl Into<String>) {
        self.state().fail_next_send = Some(reason.into());
    }

    /// Make the next `disconnect_consumer`/`disconnect_producer` call fail. The connection
    /// it was asked to drop stays up.
    pub fn fail_next_disconnect(&self, reason: impl Into<String>) {
        self.state().fail_next_disconnect = Some(reason.into());
    }

    /// Every record the broker accepted, in acceptance order.
    pub fn sent_records(&self) -> Vec<OutboundRecord> {
        self.state().log.clone()
    }

    pub fn stats(&self) -> BrokerStats {
        self.state().stats.clone()
    }

    pub fn is_producer_connected(&self) -> bool {
        self.state().producer_connected
    }

    pub fn is_consumer_connected(&self) -> bool {
        self.state().consumer.is_some()
    }

    /// Push a raw record straight onto the consumer stream, bypassing the producer.
    ///
    /// Returns `false` when no consumer is attached or it does not consume `record.topic`.
    pub async fn inject(&self, record: InboundRecord) -> bool {
        let tx = {
            let state = self.state();
            match &state.consumer {
                Some(c) if c.topics.contains(&record.topic) => c.tx.clone(),
                _ => return false,
            }
        };
        tx.send(record).await.is_ok()
    }

    fn take_connect_failure(state: &mut BrokerState) -> Result<(), BrokerError> {
        match state.fail_next_connect.take() {
            Some(reason) => Err(BrokerError::Connection(reason)),
            None => Ok(()),
        }
    }

    fn take_disconnect_failure(state: &mut BrokerState) -> Result<(), BrokerError> {
        match state.fail_next_disconnect.take() {
            Some(reason) => Err(BrokerError::Disconnect(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn connect_producer(&self) -> Result<(), BrokerError> {
        let mut state = self.state();
        Self::take_connect_failure(&mut state)?;
        state.producer_connected = true;
        state.stats.producer_connects += 1;
        Ok(())
    }

    async fn connect_consumer(&self, topics: &TopicSet) -> Result<RecordStream, BrokerError> {
        let mut state = self.state();
        Self::take_connect_failure(&mut state)?;
        if state.consumer.is_some() {
            return Err(BrokerError::Connection(
                "a consumer is already attached".to_string(),
            ));
        }

        let (tx, stream) = RecordStream::channel(CONSUMER_BUFFER);
        state.consumer = Some(ConsumerAttachment {
            topics: topics.clone(),
            tx,
        });
        state.stats.consumer_connects += 1;
        Ok(stream)
    }

    async fn send(&self, record: OutboundRecord) -> Result<(), BrokerError> {
        let forward = {
            let mut state = self.state();
            if !state.producer_connected {
                return Err(BrokerError::NotConnected("producer"));
            }
            if let Some(reason) = state.fail_next_send.take() {
                return Err(BrokerError::Send(reason));
            }

            state.log.push(record.clone());
            state.stats.records_sent += 1;

            state
                .consumer
                .as_ref()
                .filter(|c| c.topics.contains(&record.topic))
                .map(|c| c.tx.clone())
        };

        if let Some(tx) = forward {
            let inbound = record.into_inbound().with_timestamp(Utc::now());
            // The consumer may have detached in the meantime; the write itself succeeded.
            let _ = tx.send(inbound).await;
        }

        Ok(())
    }

    async fn disconnect_consumer(&self) -> Result<(), BrokerError> {
        let mut state = self.state();
        Self::take_disconnect_failure(&mut state)?;
        if state.consumer.take().is_none() {
            return Err(BrokerError::NotConnected("consumer"));
        }
        state.stats.consumer_disconnects += 1;
        Ok(())
    }

    async fn disconnect_producer(&self) -> Result<(), BrokerError> {
        let mut state = self.state();
        Self::take_disconnect_failure(&mut state)?;
        if !state.producer_connected {
            return Err(BrokerError::NotConnected("producer"));
        }
        state.producer_connected = false;
        state.stats.producer_disconnects += 1;
        Ok(())
    }
}
