//! Kafka-backed broker client (rdkafka).
//!
//! - **Producer**: one `FutureProducer`, shared by every publish; `send` resolves on the
//!   broker's delivery report
//! - **Consumer**: one `StreamConsumer` subscribed to the whole topic set, drained by a
//!   background task into the adapter's [`RecordStream`]
//! - **Consumer group**: `group_id` from config, otherwise unique per client instance so
//!   every adapter sees every message on its topics

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use futures::StreamExt;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kafka_pubsub_core::TopicSet;
use kafka_pubsub_events::{
    BrokerClient, BrokerError, Headers as RecordHeaders, InboundRecord, OutboundRecord,
    RecordStream,
};

use crate::config::PubSubConfig;

const SEND_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
const CONSUMER_BUFFER: usize = 1024;

struct ConsumerTask {
    consumer: Arc<StreamConsumer>,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct ClientState {
    producer: Option<FutureProducer>,
    consumer: Option<ConsumerTask>,
}

pub struct KafkaBroker {
    base: ClientConfig,
    group_id: String,
    state: Mutex<ClientState>,
}

impl core::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state();
        f.debug_struct("KafkaBroker")
            .field("group_id", &self.group_id)
            .field("producer_connected", &state.producer.is_some())
            .field("consumer_connected", &state.consumer.is_some())
            .finish()
    }
}

impl KafkaBroker {
    pub fn new(config: &PubSubConfig) -> Self {
        let mut base = ClientConfig::new();
        base.set("bootstrap.servers", config.brokers());
        base.set("client.id", &config.name);
        for (key, value) in &config.global_config {
            base.set(key, value);
        }

        let group_id = config
            .group_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", config.name, Uuid::now_v7()));

        Self {
            base,
            group_id,
            state: Mutex::new(ClientState::default()),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn producer(&self) -> Result<FutureProducer, BrokerError> {
        self.state()
            .producer
            .clone()
            .ok_or(BrokerError::NotConnected("producer"))
    }
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    async fn connect_producer(&self) -> Result<(), BrokerError> {
        let producer: FutureProducer = self
            .base
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        self.state().producer = Some(producer);
        Ok(())
    }

    async fn connect_consumer(&self, topics: &TopicSet) -> Result<RecordStream, BrokerError> {
        if self.state().consumer.is_some() {
            return Err(BrokerError::Connection(
                "a consumer is already attached".to_string(),
            ));
        }

        let consumer: StreamConsumer = self
            .base
            .clone()
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let names: Vec<&str> = topics.iter().collect();
        consumer
            .subscribe(&names)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        info!(group_id = %self.group_id, topics = ?names, "kafka consumer subscribed");

        let consumer = Arc::new(consumer);
        let (tx, stream) = RecordStream::channel(CONSUMER_BUFFER);
        let pump = tokio::spawn(pump_records(consumer.clone(), tx));

        self.state().consumer = Some(ConsumerTask { consumer, pump });
        Ok(stream)
    }

    async fn send(&self, record: OutboundRecord) -> Result<(), BrokerError> {
        let producer = self.producer()?;

        let mut headers = OwnedHeaders::new();
        for (key, value) in &record.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_slice()),
            });
        }

        let mut future_record = FutureRecord::<str, Vec<u8>>::to(&record.topic)
            .payload(&record.payload)
            .headers(headers);
        if let Some(key) = &record.key {
            future_record = future_record.key(key.as_str());
        }

        let (partition, offset) = producer
            .send(future_record, Timeout::After(SEND_QUEUE_TIMEOUT))
            .await
            .map_err(|(err, _)| BrokerError::Send(err.to_string()))?;
        debug!(topic = %record.topic, partition, offset, "kafka record delivered");
        Ok(())
    }

    async fn disconnect_consumer(&self) -> Result<(), BrokerError> {
        let task = self
            .state()
            .consumer
            .take()
            .ok_or(BrokerError::NotConnected("consumer"))?;

        task.pump.abort();
        task.consumer.unsubscribe();
        info!(group_id = %self.group_id, "kafka consumer disconnected");
        Ok(())
    }

    async fn disconnect_producer(&self) -> Result<(), BrokerError> {
        let producer = self
            .state()
            .producer
            .take()
            .ok_or(BrokerError::NotConnected("producer"))?;

        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
            .map_err(|e| BrokerError::Disconnect(e.to_string()))?
            .map_err(|e| BrokerError::Disconnect(e.to_string()))
    }
}

async fn pump_records(consumer: Arc<StreamConsumer>, tx: mpsc::Sender<InboundRecord>) {
    let mut messages = consumer.stream();
    while let Some(next) = messages.next().await {
        match next {
            Ok(message) => {
                if tx.send(to_inbound(&message)).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!(error = %err, "kafka consumer error"),
        }
    }
    debug!("kafka consumer pump stopped");
}

fn to_inbound(message: &BorrowedMessage<'_>) -> InboundRecord {
    let headers = message.headers().map(|headers| {
        headers
            .iter()
            .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec).unwrap_or_default()))
            .collect::<RecordHeaders>()
    });

    InboundRecord {
        topic: message.topic().to_string(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        headers,
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis),
    }
}
