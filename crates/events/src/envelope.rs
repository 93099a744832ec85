use serde_json::Value as JsonValue;

use kafka_pubsub_core::Channel;

/// An inbound record after routing: the channel it belongs to and the application payload.
///
/// Notes:
/// - `payload` is exactly the value the publisher passed to `publish`, minus reserved routing
///   fields (`_targetTopic`, `_channel`). No keys are added and no values are coerced.
/// - `topic` is the physical topic the record was read from; subscribers never see it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    channel: Channel,
    topic: String,
    payload: JsonValue,
}

impl DecodedMessage {
    pub fn new(channel: Channel, topic: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            channel,
            topic: topic.into(),
            payload,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }

    pub fn into_parts(self) -> (Channel, JsonValue) {
        (self.channel, self.payload)
    }
}
