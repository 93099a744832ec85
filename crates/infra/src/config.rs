//! Adapter configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use kafka_pubsub_core::{PubSubError, PubSubResult, TopicSet};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 9092;
const DEFAULT_NAME: &str = "pubsub";
const DEFAULT_TOPICS: &[&str] = &["test1", "test2"];
const DEFAULT_SECURITY_PROTOCOL: &str = "PLAINTEXT";

/// Construction options for [`KafkaPubSub`](crate::KafkaPubSub).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PubSubConfig {
    /// Broker topics to consume. The first one is the default publish destination.
    pub topics: Vec<String>,
    pub host: String,
    pub port: u16,
    /// Carry the channel in a record header instead of the payload body.
    pub use_headers: bool,
    /// Passed verbatim to the broker client (e.g. `security.protocol`).
    pub global_config: BTreeMap<String, String>,
    /// Recorded on every log line emitted by this adapter instance.
    pub name: String,
    /// Consumer group. Defaults to a unique group per adapter instance so that every
    /// instance sees every message.
    pub group_id: Option<String>,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            topics: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            use_headers: false,
            global_config: BTreeMap::new(),
            name: DEFAULT_NAME.to_string(),
            group_id: None,
        }
    }
}

impl PubSubConfig {
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Load from `KAFKA_TOPIC` (comma-separated), `KAFKA_HOST`, `KAFKA_PORT`,
    /// `KAFKA_SECURITY` and `KAFKA_USE_HEADERS`, falling back to defaults.
    pub fn from_env() -> PubSubResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PubSubResult<Self> {
        let mut config = Self::default();

        if let Some(topics) = lookup("KAFKA_TOPIC") {
            config.topics = topics
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(host) = lookup("KAFKA_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("KAFKA_PORT") {
            config.port = port
                .parse()
                .map_err(|e| PubSubError::validation(format!("KAFKA_PORT '{port}': {e}")))?;
        }
        if let Some(flag) = lookup("KAFKA_USE_HEADERS") {
            config.use_headers = match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(PubSubError::validation(format!(
                        "KAFKA_USE_HEADERS '{other}' is not a boolean"
                    )));
                }
            };
        }
        let security = lookup("KAFKA_SECURITY").unwrap_or_else(|| DEFAULT_SECURITY_PROTOCOL.to_string());
        config
            .global_config
            .insert("security.protocol".to_string(), security);

        config.validate()?;
        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_headers(mut self, use_headers: bool) -> Self {
        self.use_headers = use_headers;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_global(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_config.insert(key.into(), value.into());
        self
    }

    /// `host:port`, as expected by `bootstrap.servers`.
    pub fn brokers(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn topic_set(&self) -> PubSubResult<TopicSet> {
        TopicSet::new(self.topics.iter().cloned())
    }

    pub fn validate(&self) -> PubSubResult<()> {
        self.topic_set()?;
        if self.host.trim().is_empty() {
            return Err(PubSubError::validation("host must not be empty"));
        }
        if self.port == 0 {
            return Err(PubSubError::validation("port must not be 0"));
        }
        Ok(())
    }
}
