//! Channel names and the configured broker topic set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{PubSubError, PubSubResult};
use crate::value_object::ValueObject;

/// Application-level pub/sub address.
///
/// A channel is chosen by application code and is not necessarily the name of any broker
/// topic. The only invariant is that it is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel(String);

impl Channel {
    pub fn new(name: impl Into<String>) -> PubSubResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(PubSubError::validation("channel name must not be empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl ValueObject for Channel {}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Channel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Channel {
    type Error = PubSubError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Channel {
    type Error = PubSubError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Channel> for String {
    fn from(value: Channel) -> Self {
        value.0
    }
}

impl PartialEq<str> for Channel {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Channel {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// The broker topics the adapter consumes.
///
/// Fixed at construction, deduplicated, compared without regard to order. The first topic
/// in configuration order is the default destination for channels that are not topics
/// themselves.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct TopicSet {
    topics: Vec<String>,
}

impl TopicSet {
    pub fn new<I, S>(topics: I) -> PubSubResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for topic in topics {
            let topic = topic.into();
            let topic = topic.trim();
            if topic.is_empty() {
                return Err(PubSubError::validation("topic names must not be empty"));
            }
            if seen.insert(topic.to_string()) {
                ordered.push(topic.to_string());
            }
        }

        if ordered.is_empty() {
            return Err(PubSubError::validation("at least one topic is required"));
        }

        Ok(Self { topics: ordered })
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    /// Destination used when a publish names neither a topic override nor a channel that
    /// is itself a configured topic.
    pub fn default_topic(&self) -> &str {
        &self.topics[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.topics
    }
}

impl ValueObject for TopicSet {}

impl PartialEq for TopicSet {
    fn eq(&self, other: &Self) -> bool {
        let a: BTreeSet<&str> = self.iter().collect();
        let b: BTreeSet<&str> = other.iter().collect();
        a == b
    }
}

impl TryFrom<Vec<String>> for TopicSet {
    type Error = PubSubError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicSet> for Vec<String> {
    fn from(value: TopicSet) -> Self {
        value.topics
    }
}
