//! Delivery dispatcher: fans each inbound record out to the channel's subscribers.
//!
//! The dispatcher is the only reader of the consumer's record stream (the worker that owns
//! the stream calls [`DeliveryDispatcher::dispatch`] once per record, in stream order). For
//! each record it:
//!
//! 1. decodes channel + payload through the [`ChannelRouter`]
//! 2. snapshots the channel's subscriptions from the [`SubscriptionRegistry`]
//! 3. invokes callback handlers synchronously, isolating errors and panics
//! 4. hands the payload to iterator queues (resolving a pending `next()` or buffering)
//!
//! Delivery of one record completes before the next record is looked at, so each subscriber
//! sees a single topic-partition's messages in broker order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use kafka_pubsub_core::{Channel, PubSubResult};

use crate::envelope::DecodedMessage;
use crate::record::InboundRecord;
use crate::registry::{SubscriptionMode, SubscriptionRegistry};
use crate::router::ChannelRouter;

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub channel: Channel,
    /// Subscribers that accepted the message (handler returned `Ok`, or queued).
    pub delivered: usize,
    /// Callback handlers that returned an error or panicked.
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct DeliveryDispatcher {
    router: Arc<ChannelRouter>,
    registry: Arc<SubscriptionRegistry>,
}

impl DeliveryDispatcher {
    pub fn new(router: Arc<ChannelRouter>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { router, registry }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Decode and deliver one record.
    ///
    /// A record that cannot be decoded is logged and dropped; the error is returned for the
    /// caller's bookkeeping only.
    pub fn dispatch(&self, record: InboundRecord) -> PubSubResult<DispatchReport> {
        let message = match self.router.decode(&record) {
            Ok(m) => m,
            Err(err) => {
                warn!(topic = %record.topic, key = ?record.key, error = %err, "dropping malformed record");
                return Err(err);
            }
        };

        Ok(self.deliver(message))
    }

    /// Deliver an already-decoded message to every live subscriber of its channel.
    pub fn deliver(&self, message: DecodedMessage) -> DispatchReport {
        let (channel, payload) = message.into_parts();
        let mut report = DispatchReport {
            channel,
            delivered: 0,
            failed: 0,
        };

        for sub in self.registry.snapshot(&report.channel) {
            match sub.mode() {
                SubscriptionMode::Callback(handler) => {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| handler.handle(payload.clone())));
                    match outcome {
                        Ok(Ok(())) => report.delivered += 1,
                        Ok(Err(err)) => {
                            report.failed += 1;
                            warn!(
                                channel = %report.channel,
                                subscription_id = %sub.id(),
                                error = ?err,
                                "subscriber handler failed"
                            );
                        }
                        Err(panic) => {
                            report.failed += 1;
                            error!(
                                channel = %report.channel,
                                subscription_id = %sub.id(),
                                panic = panic_message(&panic),
                                "subscriber handler panicked"
                            );
                        }
                    }
                }
                SubscriptionMode::Iterator(queue) => {
                    if queue.push(payload.clone()) {
                        report.delivered += 1;
                    }
                }
            }
        }

        debug!(
            channel = %report.channel,
            delivered = report.delivered,
            failed = report.failed,
            "record dispatched"
        );
        report
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use kafka_pubsub_core::{PubSubError, TopicSet};
    use serde_json::{Value as JsonValue, json};

    use crate::iterator::ChannelIterator;
    use crate::router::CHANNEL_HEADER;

    fn setup() -> (DeliveryDispatcher, Arc<SubscriptionRegistry>) {
        let router = Arc::new(ChannelRouter::new(TopicSet::new(["t1", "t2"]).unwrap(), true));
        let registry = Arc::new(SubscriptionRegistry::new());
        (DeliveryDispatcher::new(router, registry.clone()), registry)
    }

    fn record(channel: &str, body: &str) -> InboundRecord {
        InboundRecord::new("t1", body.as_bytes().to_vec()).with_header(CHANNEL_HEADER, channel)
    }

    fn ch(name: &str) -> Channel {
        Channel::new(name).unwrap()
    }

    fn collector() -> (Arc<Mutex<Vec<JsonValue>>>, impl Fn(JsonValue) -> crate::HandlerResult + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |payload: JsonValue| -> crate::HandlerResult {
            sink.lock().unwrap().push(payload);
            Ok(())
        })
    }

    #[test]
    fn delivers_only_to_matching_channel() {
        let (dispatcher, registry) = setup();
        let (hits, handler) = collector();
        let (misses, other) = collector();
        registry.add_callback(ch("ch"), handler);
        registry.add_callback(ch("other"), other);

        let report = dispatcher.dispatch(record("ch", r#"{"id":"x"}"#)).unwrap();

        assert_eq!(report.channel, ch("ch"));
        assert_eq!(report.delivered, 1);
        assert_eq!(*hits.lock().unwrap(), vec![json!({"id": "x"})]);
        assert!(misses.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_stop_fan_out() {
        let (dispatcher, registry) = setup();
        registry.add_callback(ch("ch"), |_| Err(anyhow::anyhow!("handler exploded")));
        registry.add_callback(ch("ch"), |_| panic!("handler panicked"));
        let (hits, handler) = collector();
        registry.add_callback(ch("ch"), handler);

        let report = dispatcher.dispatch(record("ch", "{}")).unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(hits.lock().unwrap().len(), 1);
    }

    #[test]
    fn malformed_record_is_reported_and_dropped() {
        let (dispatcher, registry) = setup();
        let (hits, handler) = collector();
        registry.add_callback(ch("ch"), handler);

        let err = dispatcher.dispatch(record("ch", "not json")).unwrap_err();
        assert!(matches!(err, PubSubError::MalformedRecord(_)));

        // The next good record still goes through.
        dispatcher.dispatch(record("ch", "1")).unwrap();
        assert_eq!(*hits.lock().unwrap(), vec![json!(1)]);
    }

    #[test]
    fn unsubscribing_mid_fan_out_keeps_other_subscribers() {
        let (dispatcher, registry) = setup();
        let victim = Arc::new(Mutex::new(None));
        let reg = registry.clone();
        let victim_slot = victim.clone();
        registry.add_callback(ch("ch"), move |_| {
            if let Some(id) = victim_slot.lock().unwrap().take() {
                reg.remove(id);
            }
            Ok(())
        });
        let (hits, handler) = collector();
        let b = registry.add_callback(ch("ch"), handler);
        let (_, doomed) = collector();
        let a = registry.add_callback(ch("ch"), doomed);
        *victim.lock().unwrap() = Some(a);

        dispatcher.dispatch(record("ch", r#"{"n":1}"#)).unwrap();

        assert_eq!(hits.lock().unwrap().len(), 1);
        assert!(registry.contains(b));
        assert!(!registry.contains(a));
    }

    #[tokio::test]
    async fn iterator_and_callback_share_one_fan_out() {
        let (dispatcher, registry) = setup();
        let (hits, handler) = collector();
        registry.add_callback(ch("ch"), handler);
        let it = ChannelIterator::open(registry.clone(), ch("ch"));

        for i in 0..3 {
            dispatcher.dispatch(record("ch", &format!(r#"{{"i":{i}}}"#))).unwrap();
        }

        assert_eq!(hits.lock().unwrap().len(), 3);
        for i in 0..3 {
            assert_eq!(it.next().await.unwrap(), Some(json!({ "i": i })));
        }
    }

    #[test]
    fn closed_iterator_is_not_counted() {
        let (dispatcher, registry) = setup();
        let it = ChannelIterator::open(registry.clone(), ch("ch"));
        let snapshot = registry.snapshot(&ch("ch"));
        it.close();

        // A pass that snapshotted before the close still refuses the push.
        if let SubscriptionMode::Iterator(queue) = snapshot[0].mode() {
            assert!(!queue.push(json!(1)));
        }
        let report = dispatcher.dispatch(record("ch", "{}")).unwrap();
        assert_eq!(report.delivered, 0);
    }
}
