//! Pull adapter: iterator-mode subscriptions.
//!
//! Each iterator subscription owns an [`IteratorQueue`]: an unbounded buffer plus a single
//! waiter slot. The delivery dispatcher pushes into the queue; the consumer pulls with
//! [`ChannelIterator::next`].
//!
//! ```text
//!            push (dispatcher)                     next (consumer)
//!   waiter? ──yes──► resolve waiter        buffer? ──yes──► pop front
//!      │                                      │
//!      no                                     no
//!      ▼                                      ▼
//!   append to buffer                      park in waiter slot, await
//! ```
//!
//! Closing resolves the waiter with the terminal signal, discards the buffer, and makes every
//! later `next` return `Ok(None)` immediately.
//!
//! A `next` call cancelled while parked (e.g. under `select!` or `timeout`) loses nothing: a
//! message already handed to its waiter goes back to the front of the buffer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use kafka_pubsub_core::{Channel, PubSubError, PubSubResult, SubscriptionId};

use crate::registry::{SubscriptionMode, SubscriptionRegistry};

#[derive(Debug, Default)]
struct QueueState {
    buffer: VecDeque<JsonValue>,
    /// `None` sent through the waiter is the terminal signal.
    waiter: Option<oneshot::Sender<Option<JsonValue>>>,
    closed: bool,
}

/// Buffer + waiter slot shared between the dispatcher and one [`ChannelIterator`].
#[derive(Debug, Default)]
pub struct IteratorQueue {
    state: Mutex<QueueState>,
}

impl IteratorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a message to the consumer: resolve the pending waiter or append to the buffer.
    ///
    /// Returns `false` if the queue is closed (the message is discarded).
    pub fn push(&self, payload: JsonValue) -> bool {
        let mut state = self.state();
        if state.closed {
            return false;
        }

        if let Some(waiter) = state.waiter.take() {
            match waiter.send(Some(payload)) {
                Ok(()) => return true,
                // The `next` future was dropped before we got here; keep the message.
                Err(returned) => {
                    if let Some(payload) = returned {
                        state.buffer.push_back(payload);
                    }
                    return true;
                }
            }
        }

        state.buffer.push_back(payload);
        true
    }

    /// Pull the next message, waiting if none is buffered.
    ///
    /// `Ok(None)` is the terminal signal. A second call while one is still waiting returns
    /// [`PubSubError::CallerContract`].
    pub async fn next(&self) -> PubSubResult<Option<JsonValue>> {
        let rx = {
            let mut state = self.state();
            if state.closed {
                return Ok(None);
            }
            if let Some(payload) = state.buffer.pop_front() {
                return Ok(Some(payload));
            }
            if state.waiter.as_ref().is_some_and(|w| !w.is_closed()) {
                return Err(PubSubError::caller_contract(
                    "next() called while a previous next() is still pending",
                ));
            }

            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };

        let mut pending = PendingNext {
            queue: self,
            rx: Some(rx),
        };
        let delivered = match pending.rx.as_mut() {
            Some(rx) => rx.await,
            None => Ok(None),
        };
        pending.rx = None;

        // A dropped sender means the queue was torn down without an explicit signal.
        Ok(delivered.unwrap_or(None))
    }

    /// Put back a message that was handed to a `next` call which was cancelled before it
    /// returned. It was the oldest message, so it goes to the front.
    fn requeue(&self, payload: JsonValue) {
        let mut state = self.state();
        if !state.closed {
            state.buffer.push_front(payload);
        }
    }

    /// Close the queue. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.buffer.clear();
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(None);
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Number of messages delivered but not yet pulled.
    pub fn buffered(&self) -> usize {
        self.state().buffer.len()
    }

    pub fn has_waiter(&self) -> bool {
        self.state().waiter.as_ref().is_some_and(|w| !w.is_closed())
    }
}

/// Receiving half of a parked `next` call. If the call is dropped mid-wait, a message
/// already sent to it is returned to the queue.
struct PendingNext<'a> {
    queue: &'a IteratorQueue,
    rx: Option<oneshot::Receiver<Option<JsonValue>>>,
}

impl Drop for PendingNext<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(Some(payload)) = rx.try_recv() {
                self.queue.requeue(payload);
            }
        }
    }
}

/// Pull-based subscription to one channel.
///
/// `next()` yields messages in delivery order; `close()` ends the subscription. Both take
/// `&self`, so an iterator shared behind an `Arc` can be closed from another task while a
/// `next()` is pending: the pending call then resolves with `Ok(None)`.
///
/// Dropping the iterator closes it.
#[derive(Debug)]
pub struct ChannelIterator {
    id: SubscriptionId,
    channel: Channel,
    queue: Arc<IteratorQueue>,
    registry: Arc<SubscriptionRegistry>,
}

impl ChannelIterator {
    /// Register a new iterator subscription on `channel`.
    pub fn open(registry: Arc<SubscriptionRegistry>, channel: Channel) -> Self {
        let queue = Arc::new(IteratorQueue::new());
        let id = registry.add(channel.clone(), SubscriptionMode::Iterator(queue.clone()));
        Self {
            id,
            channel,
            queue,
            registry,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Wait for the next message. `Ok(None)` once the iterator is closed.
    pub async fn next(&self) -> PubSubResult<Option<JsonValue>> {
        self.queue.next().await
    }

    /// Remove the subscription, wake a pending `next()` with the terminal signal and drop any
    /// buffered messages. Safe to call repeatedly.
    pub fn close(&self) {
        self.registry.remove(self.id);
        if self.queue.close() {
            tracing::debug!(subscription_id = %self.id, channel = %self.channel, "iterator closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn buffered(&self) -> usize {
        self.queue.buffered()
    }

    /// Consume the iterator as a `Stream` that ends when the subscription closes.
    pub fn into_stream(self) -> impl Stream<Item = JsonValue> + Send + 'static {
        futures::stream::unfold(self, |it| async move {
            match it.next().await {
                Ok(Some(payload)) => Some((payload, it)),
                _ => None,
            }
        })
    }
}

impl Drop for ChannelIterator {
    fn drop(&mut self) {
        self.close();
    }
}
