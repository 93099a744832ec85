//! Broker-level records exchanged with the [`BrokerClient`](crate::BrokerClient).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Record headers (name → raw bytes).
pub type Headers = BTreeMap<String, Vec<u8>>;

/// A record as delivered by the broker's consumer connection.
///
/// Produced by the broker client and consumed exactly once by the delivery dispatcher.
/// Nothing in the adapter persists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub key: Option<String>,
    pub headers: Option<Headers>,
    pub payload: Vec<u8>,
    /// Broker append time, when the client reports one.
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundRecord {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            headers: None,
            payload: payload.into(),
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(Vec::as_slice)
    }
}

/// A record handed to the broker client for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<String>,
    pub headers: Headers,
    pub payload: Vec<u8>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            headers: Headers::new(),
            payload: payload.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// The record as the consumer side would see it, minus broker-assigned metadata.
    pub fn into_inbound(self) -> InboundRecord {
        InboundRecord {
            topic: self.topic,
            key: self.key,
            headers: if self.headers.is_empty() {
                None
            } else {
                Some(self.headers)
            },
            payload: self.payload,
            timestamp: None,
        }
    }
}
