//! Broker client implementations.
//!
//! The client capability itself lives in `kafka-pubsub-events` as pure mechanics, together
//! with the in-memory client used by tests. This module provides the Kafka-backed client.

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;

pub use kafka_pubsub_events::{BrokerClient, BrokerError, InMemoryBroker, RecordStream};
