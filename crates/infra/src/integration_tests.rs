//! Integration tests for the full adapter pipeline.
//!
//! Tests: publish → Router → Broker → DispatchWorker → Dispatcher → subscribers
//!
//! Verifies:
//! - Messages reach exactly the subscribers of their channel, in order
//! - Target-topic selection and the channel carrier (body field or header)
//! - Lifecycle: lazy connections, single consumer, idempotent close, errors surfaced

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{Value as JsonValue, json};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use kafka_pubsub_core::{PubSubError, SubscriptionId};
    use kafka_pubsub_events::{
        BrokerStats, CHANNEL_HEADER, HandlerResult, InMemoryBroker, InboundRecord,
    };

    use crate::{KafkaPubSub, PubSubConfig};

    const WAIT: Duration = Duration::from_secs(1);

    fn setup_with(config: PubSubConfig) -> (KafkaPubSub<Arc<InMemoryBroker>>, Arc<InMemoryBroker>) {
        kafka_pubsub_observability::init_pretty();
        let broker = Arc::new(InMemoryBroker::new());
        let pubsub = KafkaPubSub::new(config.with_name("it"), broker.clone()).unwrap();
        (pubsub, broker)
    }

    fn setup() -> (KafkaPubSub<Arc<InMemoryBroker>>, Arc<InMemoryBroker>) {
        setup_with(PubSubConfig::new(["t1", "t2"]))
    }

    fn forwarder() -> (
        mpsc::UnboundedReceiver<JsonValue>,
        impl Fn(JsonValue) -> HandlerResult + Send + Sync + 'static,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (rx, move |payload: JsonValue| -> HandlerResult {
            tx.send(payload)?;
            Ok(())
        })
    }

    async fn received(rx: &mut mpsc::UnboundedReceiver<JsonValue>) -> JsonValue {
        timeout(WAIT, rx.recv())
            .await
            .expect("no message delivered in time")
            .expect("handler dropped")
    }

    async fn nothing_more(rx: &mut mpsc::UnboundedReceiver<JsonValue>) {
        // A closed channel (handler dropped on unsubscribe) also counts as nothing more.
        let extra = timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(!matches!(extra, Ok(Some(_))), "unexpected extra delivery: {extra:?}");
    }

    #[tokio::test]
    async fn callback_receives_published_payload() {
        let (pubsub, _broker) = setup();
        let (mut rx, handler) = forwarder();
        pubsub.subscribe("ch", handler).await.unwrap();

        pubsub.publish("ch", json!({"id": "x"})).await.unwrap();

        assert_eq!(received(&mut rx).await, json!({"id": "x"}));
        nothing_more(&mut rx).await;
    }

    #[tokio::test]
    async fn iterator_yields_messages_in_publish_order_then_finishes() {
        let (pubsub, _broker) = setup();
        let it = pubsub.subscribe_iter("ch2").await.unwrap();

        for i in 0..10 {
            pubsub
                .publish("ch2", json!({ "id": format!("iter-{i}") }))
                .await
                .unwrap();
        }
        for i in 0..10 {
            let next = timeout(WAIT, it.next()).await.unwrap().unwrap();
            assert_eq!(next, Some(json!({ "id": format!("iter-{i}") })));
        }

        it.close();
        assert_eq!(it.next().await.unwrap(), None);
        assert_eq!(pubsub.subscription_count(), 0);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let (pubsub, _broker) = setup();
        let (mut a, handler_a) = forwarder();
        let (mut b, handler_b) = forwarder();
        pubsub.subscribe("a", handler_a).await.unwrap();
        pubsub.subscribe("b", handler_b).await.unwrap();

        pubsub.publish("a", json!({"to": "a"})).await.unwrap();

        assert_eq!(received(&mut a).await, json!({"to": "a"}));
        nothing_more(&mut b).await;
    }

    #[tokio::test]
    async fn target_topic_picks_destination_and_is_stripped() {
        let (pubsub, broker) = setup();
        let (mut rx, handler) = forwarder();
        pubsub.subscribe("ch", handler).await.unwrap();

        pubsub
            .publish("ch", json!({"_targetTopic": "t2", "n": 1}))
            .await
            .unwrap();

        let sent = broker.sent_records();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "t2");
        let body: JsonValue = serde_json::from_slice(&sent[0].payload).unwrap();
        assert!(body.get("_targetTopic").is_none());

        assert_eq!(received(&mut rx).await, json!({"n": 1}));
    }

    #[tokio::test]
    async fn header_mode_keeps_payload_untouched() {
        let (pubsub, broker) = setup_with(PubSubConfig::new(["t1", "t2"]).with_headers(true));
        let (mut rx, handler) = forwarder();
        pubsub.subscribe("ch", handler).await.unwrap();

        pubsub.publish("ch", json!({"id": "x"})).await.unwrap();
        pubsub.publish("ch", json!([1, 2, 3])).await.unwrap();

        let sent = broker.sent_records();
        assert_eq!(sent[0].headers.get(CHANNEL_HEADER).map(Vec::as_slice), Some(&b"ch"[..]));
        assert_eq!(
            serde_json::from_slice::<JsonValue>(&sent[0].payload).unwrap(),
            json!({"id": "x"})
        );
        assert_eq!(received(&mut rx).await, json!({"id": "x"}));
        assert_eq!(received(&mut rx).await, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn header_mode_routes_target_topic_and_strips_it() {
        let (pubsub, broker) = setup_with(PubSubConfig::new(["t1", "t2"]).with_headers(true));
        let (mut rx, handler) = forwarder();
        pubsub.subscribe("ch", handler).await.unwrap();

        pubsub
            .publish("ch", json!({"_targetTopic": "t2", "id": "x"}))
            .await
            .unwrap();

        let sent = broker.sent_records();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "t2");
        assert_eq!(sent[0].headers.get(CHANNEL_HEADER).map(Vec::as_slice), Some(&b"ch"[..]));
        assert_eq!(
            serde_json::from_slice::<JsonValue>(&sent[0].payload).unwrap(),
            json!({"id": "x"})
        );

        assert_eq!(received(&mut rx).await, json!({"id": "x"}));
        nothing_more(&mut rx).await;
    }

    #[tokio::test]
    async fn user_channel_field_is_refused_in_body_mode() {
        let (pubsub, broker) = setup();

        let err = pubsub
            .publish("ch", json!({"_channel": "user-data", "id": 1}))
            .await
            .unwrap_err();

        assert!(matches!(err, PubSubError::Validation(_)));
        assert!(broker.sent_records().is_empty());
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_other_subscribers_or_later_messages() {
        let (pubsub, _broker) = setup();
        pubsub
            .subscribe("ch", |_| Err(anyhow::anyhow!("handler rejected message")))
            .await
            .unwrap();
        let (mut rx, handler) = forwarder();
        pubsub.subscribe("ch", handler).await.unwrap();

        pubsub.publish("ch", json!({"n": 1})).await.unwrap();
        pubsub.publish("ch", json!({"n": 2})).await.unwrap();

        assert_eq!(received(&mut rx).await, json!({"n": 1}));
        assert_eq!(received(&mut rx).await, json!({"n": 2}));
        timeout(WAIT, async {
            while pubsub.worker_stats().await.map_or(0, |s| s.records) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(pubsub.worker_stats().await.unwrap().handler_failures, 2);
    }

    #[tokio::test]
    async fn malformed_records_are_skipped() {
        let (pubsub, broker) = setup();
        let (mut rx, handler) = forwarder();
        pubsub.subscribe("ch", handler).await.unwrap();

        assert!(broker.inject(InboundRecord::new("t1", b"{not json".to_vec())).await);
        pubsub.publish("ch", json!({"ok": true})).await.unwrap();

        assert_eq!(received(&mut rx).await, json!({"ok": true}));
        assert_eq!(pubsub.worker_stats().await.unwrap().malformed, 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_ignores_unknown_ids() {
        let (pubsub, _broker) = setup();
        let (mut rx, handler) = forwarder();
        let id = pubsub.subscribe("ch", handler).await.unwrap();

        pubsub.unsubscribe(id);
        pubsub.unsubscribe(id);
        pubsub.unsubscribe(SubscriptionId::new());
        pubsub.publish("ch", json!({"late": true})).await.unwrap();

        nothing_more(&mut rx).await;
        assert_eq!(pubsub.subscription_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribing_an_iterator_finishes_it() {
        let (pubsub, _broker) = setup();
        let it = pubsub.subscribe_iter("ch").await.unwrap();

        pubsub.unsubscribe(it.id());

        assert!(it.is_closed());
        assert_eq!(it.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn consumer_connects_once_for_many_subscriptions() {
        let (pubsub, broker) = setup();
        for channel in ["a", "b", "a"] {
            pubsub.subscribe(channel, |_| Ok(())).await.unwrap();
        }
        let _it = pubsub.subscribe_iter("c").await.unwrap();

        assert_eq!(broker.stats().consumer_connects, 1);
        assert_eq!(broker.stats().producer_connects, 0);
        assert_eq!(pubsub.subscription_count(), 4);
    }

    #[tokio::test]
    async fn subscribe_connection_failure_leaves_no_subscription() {
        let (pubsub, broker) = setup();
        broker.fail_next_connect("broker unreachable");

        let err = pubsub.subscribe("ch", |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, PubSubError::Connection(_)));
        assert_eq!(pubsub.subscription_count(), 0);

        // The next attempt connects.
        pubsub.subscribe("ch", |_| Ok(())).await.unwrap();
        assert!(broker.is_consumer_connected());
    }

    #[tokio::test]
    async fn publish_failures_are_surfaced() {
        let (pubsub, broker) = setup();

        broker.fail_next_connect("broker unreachable");
        let err = pubsub.publish("ch", json!({})).await.unwrap_err();
        assert!(matches!(err, PubSubError::Connection(_)));

        broker.fail_next_send("not enough replicas");
        let err = pubsub.publish("ch", json!({})).await.unwrap_err();
        assert!(matches!(err, PubSubError::Publish(_)));

        pubsub.publish("ch", json!({})).await.unwrap();
        assert_eq!(broker.stats().producer_connects, 1);
    }

    #[tokio::test]
    async fn invalid_publish_is_rejected_before_connecting() {
        let (pubsub, broker) = setup();

        let err = pubsub.publish("", json!({})).await.unwrap_err();
        assert!(matches!(err, PubSubError::Validation(_)));
        let err = pubsub.publish("ch", json!("plain string")).await.unwrap_err();
        assert!(matches!(err, PubSubError::Validation(_)));

        assert!(!broker.is_producer_connected());
    }

    #[tokio::test]
    async fn close_wakes_pending_iterators() {
        let (pubsub, _broker) = setup();
        let it = Arc::new(pubsub.subscribe_iter("ch").await.unwrap());
        let reader = it.clone();
        let pending = tokio::spawn(async move { reader.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        pubsub.close().await.unwrap();

        let got = timeout(WAIT, pending).await.unwrap().unwrap();
        assert_eq!(got.unwrap(), None);
        assert!(it.is_closed());
        assert_eq!(pubsub.subscription_count(), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_disconnects_once() {
        let (pubsub, broker) = setup();
        pubsub.subscribe("ch", |_| Ok(())).await.unwrap();
        pubsub.publish("ch", json!({})).await.unwrap();

        pubsub.close().await.unwrap();
        pubsub.close().await.unwrap();

        let stats = broker.stats();
        assert_eq!(stats.consumer_disconnects, 1);
        assert_eq!(stats.producer_disconnects, 1);
        assert!(pubsub.is_closed());
    }

    #[tokio::test]
    async fn close_finishes_teardown_then_reports_first_disconnect_error() {
        let (pubsub, broker) = setup();
        let it = pubsub.subscribe_iter("ch").await.unwrap();
        pubsub.publish("ch", json!({})).await.unwrap();
        broker.fail_next_disconnect("consumer group leave timed out");

        let err = pubsub.close().await.unwrap_err();

        assert!(matches!(err, PubSubError::Connection(_)));
        assert!(pubsub.is_closed());
        assert!(it.is_closed());
        assert_eq!(pubsub.subscription_count(), 0);
        // The consumer disconnect failed; the producer was still disconnected.
        let stats = broker.stats();
        assert_eq!(stats.consumer_disconnects, 0);
        assert_eq!(stats.producer_disconnects, 1);

        // Teardown ran once; a second close does not retry.
        pubsub.close().await.unwrap();
        assert_eq!(broker.stats().producer_disconnects, 1);
    }

    #[tokio::test]
    async fn close_without_connections_touches_nothing() {
        let (pubsub, broker) = setup();

        pubsub.close().await.unwrap();

        assert_eq!(broker.stats(), BrokerStats::default());
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let (pubsub, broker) = setup();
        pubsub.close().await.unwrap();

        assert_eq!(
            pubsub.publish("ch", json!({})).await.unwrap_err(),
            PubSubError::Closed
        );
        assert_eq!(
            pubsub.subscribe("ch", |_| Ok(())).await.unwrap_err(),
            PubSubError::Closed
        );
        assert!(matches!(
            pubsub.subscribe_iter("ch").await,
            Err(PubSubError::Closed)
        ));
        assert_eq!(broker.stats().consumer_connects, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_publishers_share_one_producer() {
        let (pubsub, broker) = setup();
        let pubsub = Arc::new(pubsub);
        let it = pubsub.subscribe_iter("ch").await.unwrap();

        let mut tasks = Vec::new();
        for worker in 0..4 {
            let pubsub = pubsub.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..5 {
                    pubsub
                        .publish("ch", json!({"worker": worker, "n": n}))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut per_worker: Vec<Vec<i64>> = vec![Vec::new(); 4];
        for _ in 0..20 {
            let msg = timeout(WAIT, it.next()).await.unwrap().unwrap().unwrap();
            let w = msg["worker"].as_u64().unwrap() as usize;
            per_worker[w].push(msg["n"].as_i64().unwrap());
        }

        // Each publisher's messages arrive in its own publish order.
        for seen in per_worker {
            assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        }
        assert_eq!(broker.stats().producer_connects, 1);
    }
}
