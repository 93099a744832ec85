//! Channel ⇄ topic routing.
//!
//! The router is the explicit decode/encode boundary between application channels and
//! broker records. It holds the configured topic set and the header-mode flag, performs no
//! I/O and keeps no subscription state.
//!
//! ## Outbound (publish)
//!
//! Destination topic, first match wins:
//!
//! 1. the payload's `_targetTopic` field (removed from the payload before sending)
//! 2. the channel name, when the channel is one of the configured topics
//! 3. the first configured topic
//!
//! The channel travels with the record either as the `channel` header (header mode) or as an
//! embedded `_channel` field of an object payload.
//!
//! ## Inbound (delivery)
//!
//! Channel, first match wins:
//!
//! 1. the `channel` header (header mode only)
//! 2. the embedded `_channel` field (removed from the payload before delivery)
//! 3. the topic the record was read from

use serde_json::Value as JsonValue;

use kafka_pubsub_core::{Channel, PubSubError, PubSubResult, TopicSet};

use crate::envelope::DecodedMessage;
use crate::record::{InboundRecord, OutboundRecord};

/// Payload field that overrides the destination topic of a single publish.
pub const TARGET_TOPIC_FIELD: &str = "_targetTopic";

/// Payload field carrying the channel when header mode is off.
pub const CHANNEL_FIELD: &str = "_channel";

/// Record header carrying the channel in header mode.
pub const CHANNEL_HEADER: &str = "channel";

#[derive(Debug, Clone)]
pub struct ChannelRouter {
    topics: TopicSet,
    use_headers: bool,
}

impl ChannelRouter {
    pub fn new(topics: TopicSet, use_headers: bool) -> Self {
        Self {
            topics,
            use_headers,
        }
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn use_headers(&self) -> bool {
        self.use_headers
    }

    /// Pick the destination topic for a publish on `channel`.
    ///
    /// Strips the `_targetTopic` field from `payload` when present.
    pub fn resolve_outbound_topic(
        &self,
        channel: &Channel,
        payload: &mut JsonValue,
    ) -> PubSubResult<String> {
        let target = match payload.as_object_mut() {
            Some(obj) => obj.remove(TARGET_TOPIC_FIELD),
            None => None,
        };

        match target {
            Some(JsonValue::String(topic)) if !topic.is_empty() => Ok(topic),
            Some(other) => Err(PubSubError::validation(format!(
                "{TARGET_TOPIC_FIELD} must be a non-empty string, got {other}"
            ))),
            None if self.topics.contains(channel.as_str()) => Ok(channel.as_str().to_string()),
            None => Ok(self.topics.default_topic().to_string()),
        }
    }

    /// Turn a publish call into the record handed to the broker client.
    pub fn encode(&self, channel: &Channel, mut payload: JsonValue) -> PubSubResult<OutboundRecord> {
        let topic = self.resolve_outbound_topic(channel, &mut payload)?;

        let mut headers = crate::record::Headers::new();
        if self.use_headers {
            headers.insert(CHANNEL_HEADER.to_string(), channel.as_str().as_bytes().to_vec());
        } else {
            match payload.as_object_mut() {
                // The field is consumed on decode, so a user value there would not survive.
                Some(obj) if obj.contains_key(CHANNEL_FIELD) => {
                    return Err(PubSubError::validation(format!(
                        "{CHANNEL_FIELD} is reserved for routing when headers are off"
                    )));
                }
                Some(obj) => {
                    obj.insert(
                        CHANNEL_FIELD.to_string(),
                        JsonValue::String(channel.as_str().to_string()),
                    );
                }
                // Without headers, only object payloads can carry their channel.
                None if topic != channel.as_str() => {
                    return Err(PubSubError::validation(format!(
                        "non-object payload on channel '{channel}' cannot be routed through topic '{topic}' without headers"
                    )));
                }
                None => {}
            }
        }

        let bytes = serde_json::to_vec(&payload).map_err(|e| PubSubError::publish(e.to_string()))?;

        Ok(OutboundRecord {
            topic,
            key: None,
            headers,
            payload: bytes,
        })
    }

    /// Work out which channel an inbound record belongs to.
    ///
    /// Strips routing fields from `payload` as they are consumed.
    pub fn resolve_inbound_channel(
        &self,
        record: &InboundRecord,
        payload: &mut JsonValue,
    ) -> PubSubResult<Channel> {
        if self.use_headers {
            if let Some(obj) = payload.as_object_mut() {
                obj.remove(TARGET_TOPIC_FIELD);
            }

            if let Some(raw) = record.header(CHANNEL_HEADER) {
                let name = std::str::from_utf8(raw).map_err(|e| {
                    PubSubError::malformed(format!("{CHANNEL_HEADER} header is not UTF-8: {e}"))
                })?;
                return Channel::new(name)
                    .map_err(|_| PubSubError::malformed(format!("empty {CHANNEL_HEADER} header")));
            }
        }

        if let Some(obj) = payload.as_object_mut() {
            if let Some(JsonValue::String(name)) = obj.get(CHANNEL_FIELD) {
                if let Ok(channel) = Channel::new(name.as_str()) {
                    obj.remove(CHANNEL_FIELD);
                    return Ok(channel);
                }
            }
        }

        Channel::new(record.topic.as_str())
            .map_err(|_| PubSubError::malformed("record has no channel and no topic"))
    }

    /// Decode an inbound record into a channel + payload pair.
    pub fn decode(&self, record: &InboundRecord) -> PubSubResult<DecodedMessage> {
        let mut payload: JsonValue = serde_json::from_slice(&record.payload).map_err(|e| {
            PubSubError::malformed(format!("topic '{}': invalid JSON payload: {e}", record.topic))
        })?;

        let channel = self.resolve_inbound_channel(record, &mut payload)?;
        Ok(DecodedMessage::new(channel, record.topic.clone(), payload))
    }
}
