//! Channel pub/sub adapter over a topic-based broker.
//!
//! [`KafkaPubSub`] owns the adapter lifecycle: it connects the producer on the first publish,
//! attaches the single consumer (and its dispatch worker) on the first subscription, and tears
//! everything down exactly once on [`close`](KafkaPubSub::close).
//!
//! ## Lifecycle
//!
//! ```text
//!   Idle ──publish──► producer up
//!     │                     │
//!     └──subscribe──► consumer up + dispatch worker
//!                           │
//!                close ─────┴──► Closed (terminal)
//! ```
//!
//! Connection state lives behind one async mutex. Subscriptions are registered while that
//! mutex is held, so a concurrent `close` can never miss a subscription added mid-teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use kafka_pubsub_core::{Channel, PubSubError, PubSubResult, SubscriptionId};
use kafka_pubsub_events::{
    BrokerClient, BrokerError, ChannelIterator, ChannelRouter, DeliveryDispatcher,
    HandlerResult, MessageHandler, SubscriptionRegistry,
};

use crate::config::PubSubConfig;
use crate::workers::{DispatchWorker, DispatchWorkerHandle, WorkerStats};

#[derive(Debug, Default)]
struct Lifecycle {
    producer_connected: bool,
    consumer: Option<DispatchWorkerHandle>,
}

/// Channel-keyed publish/subscribe on top of a [`BrokerClient`].
///
/// All operations take `&self`; wrap the adapter in an `Arc` to share it between tasks.
#[derive(Debug)]
pub struct KafkaPubSub<B> {
    config: PubSubConfig,
    broker: B,
    router: Arc<ChannelRouter>,
    registry: Arc<SubscriptionRegistry>,
    lifecycle: Mutex<Lifecycle>,
    closed: AtomicBool,
}

impl<B: BrokerClient> KafkaPubSub<B> {
    /// Build an adapter. Nothing connects until the first publish or subscribe.
    pub fn new(config: PubSubConfig, broker: B) -> PubSubResult<Self> {
        config.validate()?;
        let router = ChannelRouter::new(config.topic_set()?, config.use_headers);
        info!(
            pubsub = %config.name,
            brokers = %config.brokers(),
            topics = ?config.topics,
            use_headers = config.use_headers,
            "pubsub adapter created"
        );

        Ok(Self {
            config,
            broker,
            router: Arc::new(router),
            registry: Arc::new(SubscriptionRegistry::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PubSubConfig {
        &self.config
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Live subscriptions of both modes.
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Counters of the dispatch worker, once a consumer is attached.
    pub async fn worker_stats(&self) -> Option<WorkerStats> {
        self.lifecycle.lock().await.consumer.as_ref().map(DispatchWorkerHandle::stats)
    }

    /// Publish `payload` on `channel`.
    ///
    /// Resolves once the broker accepted the write. An object payload may carry
    /// `_targetTopic` to pick the destination topic; that field is stripped before sending.
    #[instrument(skip(self, payload), fields(pubsub = %self.config.name))]
    pub async fn publish(&self, channel: &str, payload: JsonValue) -> PubSubResult<()> {
        let channel = Channel::new(channel)?;
        let record = self.router.encode(&channel, payload)?;
        let topic = record.topic.clone();

        self.ensure_producer().await?;
        self.broker.send(record).await.map_err(|err| {
            warn!(channel = %channel, topic = %topic, error = %err, "publish failed");
            PubSubError::publish(err.to_string())
        })?;

        debug!(channel = %channel, topic = %topic, "published");
        Ok(())
    }

    /// Register a callback for every message on `channel`.
    ///
    /// The first subscription of the adapter's lifetime attaches the consumer; if that fails
    /// the error is returned and nothing is registered.
    pub async fn subscribe<F>(&self, channel: &str, handler: F) -> PubSubResult<SubscriptionId>
    where
        F: Fn(JsonValue) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_handler(channel, Arc::new(handler)).await
    }

    #[instrument(skip(self, handler), fields(pubsub = %self.config.name))]
    pub async fn subscribe_handler(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> PubSubResult<SubscriptionId> {
        let channel = Channel::new(channel)?;
        let _lifecycle = self.ensure_consumer().await?;
        let id = self.registry.add_handler(channel.clone(), handler);
        debug!(subscription_id = %id, channel = %channel, "callback subscribed");
        Ok(id)
    }

    /// Open a pull-based subscription on `channel`.
    #[instrument(skip(self), fields(pubsub = %self.config.name))]
    pub async fn subscribe_iter(&self, channel: &str) -> PubSubResult<ChannelIterator> {
        let channel = Channel::new(channel)?;
        let _lifecycle = self.ensure_consumer().await?;
        let iterator = ChannelIterator::open(self.registry.clone(), channel);
        debug!(subscription_id = %iterator.id(), channel = %iterator.channel(), "iterator subscribed");
        Ok(iterator)
    }

    /// Remove a subscription. Unknown or already-removed ids are a no-op.
    ///
    /// The consumer stays attached even when no subscriptions remain.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.registry.remove(id) {
            sub.close_queue();
            debug!(pubsub = %self.config.name, subscription_id = %id, channel = %sub.channel(), "unsubscribed");
        }
    }

    /// Shut the adapter down. Idempotent.
    ///
    /// Stops the dispatch worker, finishes every open iterator, empties the registry and
    /// disconnects whichever broker connections were established. Disconnect failures are
    /// logged; the first one is returned after teardown completes.
    #[instrument(skip(self), fields(pubsub = %self.config.name))]
    pub async fn close(&self) -> PubSubResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let consumer = lifecycle.consumer.take();
        let had_consumer = consumer.is_some();
        if let Some(worker) = consumer {
            let stats = worker.shutdown().await;
            debug!(
                records = stats.records,
                malformed = stats.malformed,
                handler_failures = stats.handler_failures,
                "dispatch worker stopped"
            );
        }

        let drained = self.registry.drain();
        for sub in &drained {
            sub.close_queue();
        }

        let mut first_error = None;
        if had_consumer {
            if let Err(err) = self.broker.disconnect_consumer().await {
                warn!(error = %err, "consumer disconnect failed");
                first_error.get_or_insert(connection_error(err));
            }
        }
        if std::mem::take(&mut lifecycle.producer_connected) {
            if let Err(err) = self.broker.disconnect_producer().await {
                warn!(error = %err, "producer disconnect failed");
                first_error.get_or_insert(connection_error(err));
            }
        }

        info!(subscriptions = drained.len(), "pubsub adapter closed");
        first_error.map_or(Ok(()), Err)
    }

    async fn lock_open(&self) -> PubSubResult<MutexGuard<'_, Lifecycle>> {
        let lifecycle = self.lifecycle.lock().await;
        if self.is_closed() {
            return Err(PubSubError::Closed);
        }
        Ok(lifecycle)
    }

    async fn ensure_producer(&self) -> PubSubResult<()> {
        let mut lifecycle = self.lock_open().await?;
        if !lifecycle.producer_connected {
            self.broker.connect_producer().await.map_err(|err| {
                warn!(error = %err, "producer connection failed");
                connection_error(err)
            })?;
            lifecycle.producer_connected = true;
            info!(pubsub = %self.config.name, brokers = %self.config.brokers(), "producer connected");
        }
        Ok(())
    }

    /// Attach the consumer if this is the first subscription. Returns the held lifecycle lock
    /// so the caller registers its subscription before anyone can close.
    async fn ensure_consumer(&self) -> PubSubResult<MutexGuard<'_, Lifecycle>> {
        let mut lifecycle = self.lock_open().await?;
        if lifecycle.consumer.is_none() {
            let stream = self
                .broker
                .connect_consumer(self.router.topics())
                .await
                .map_err(|err| {
                    warn!(error = %err, "consumer connection failed");
                    connection_error(err)
                })?;
            let dispatcher = DeliveryDispatcher::new(self.router.clone(), self.registry.clone());
            lifecycle.consumer = Some(DispatchWorker::spawn(
                format!("{}-dispatch", self.config.name),
                stream,
                dispatcher,
            ));
            info!(
                pubsub = %self.config.name,
                topics = ?self.config.topics,
                "consumer attached"
            );
        }
        Ok(lifecycle)
    }
}

fn connection_error(err: BrokerError) -> PubSubError {
    PubSubError::connection(err.to_string())
}
