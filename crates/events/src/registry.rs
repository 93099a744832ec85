//! Subscription registry: every live logical subscription, keyed by channel.
//!
//! The registry is the only shared mutable structure touched by both the subscribe path and
//! the delivery path. All access goes through one `RwLock`; delivery never runs user code
//! under it. Instead it takes a **snapshot** of the channel's subscriptions (cheap `Arc`
//! clones) and fans out over the snapshot, so:
//!
//! - a subscription added during a pass is not visited by that pass
//! - a subscription removed during a pass may still be visited once (iterator queues refuse
//!   pushes after close, so nothing leaks to a closed iterator)
//! - removing one subscription never makes a pass skip or revisit another

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value as JsonValue;

use kafka_pubsub_core::{Channel, SubscriptionId};

use crate::handler::{HandlerResult, MessageHandler};
use crate::iterator::IteratorQueue;

/// How a subscription consumes messages.
#[derive(Clone)]
pub enum SubscriptionMode {
    /// Push: the handler is invoked synchronously on the delivery path.
    Callback(Arc<dyn MessageHandler>),
    /// Pull: messages are queued for a [`ChannelIterator`](crate::ChannelIterator).
    Iterator(Arc<IteratorQueue>),
}

impl core::fmt::Debug for SubscriptionMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback"),
            Self::Iterator(q) => f.debug_tuple("Iterator").field(q).finish(),
        }
    }
}

/// A live logical subscription. Owned by the registry; callers hold only the id.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    channel: Channel,
    mode: SubscriptionMode,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn mode(&self) -> &SubscriptionMode {
        &self.mode
    }

    pub fn is_iterator(&self) -> bool {
        matches!(self.mode, SubscriptionMode::Iterator(_))
    }

    /// Close the iterator queue behind this subscription, if it has one.
    pub fn close_queue(&self) {
        if let SubscriptionMode::Iterator(queue) = &self.mode {
            queue.close();
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    by_channel: HashMap<Channel, Vec<Arc<Subscription>>>,
    index: HashMap<SubscriptionId, Channel>,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscription. Always succeeds with a fresh id.
    pub fn add(&self, channel: Channel, mode: SubscriptionMode) -> SubscriptionId {
        let id = SubscriptionId::new();
        let sub = Arc::new(Subscription {
            id,
            channel: channel.clone(),
            mode,
        });

        let mut state = self.write();
        state.index.insert(id, channel.clone());
        state.by_channel.entry(channel).or_default().push(sub);
        id
    }

    pub fn add_callback<F>(&self, channel: Channel, handler: F) -> SubscriptionId
    where
        F: Fn(JsonValue) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(channel, SubscriptionMode::Callback(Arc::new(handler)))
    }

    pub fn add_handler(&self, channel: Channel, handler: Arc<dyn MessageHandler>) -> SubscriptionId {
        self.add(channel, SubscriptionMode::Callback(handler))
    }

    /// Remove a subscription. Unknown ids are a no-op (`None`).
    pub fn remove(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let mut state = self.write();
        let channel = state.index.remove(&id)?;

        let subs = state.by_channel.get_mut(&channel)?;
        let pos = subs.iter().position(|s| s.id == id)?;
        let removed = subs.remove(pos);
        if subs.is_empty() {
            state.by_channel.remove(&channel);
        }
        Some(removed)
    }

    /// The subscriptions currently registered on `channel`, in registration order.
    pub fn snapshot(&self, channel: &Channel) -> Vec<Arc<Subscription>> {
        self.read()
            .by_channel
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Visit every subscription on `channel` once, without holding the registry lock.
    pub fn for_each(&self, channel: &Channel, mut f: impl FnMut(&Subscription)) {
        for sub in self.snapshot(channel) {
            f(&sub);
        }
    }

    /// Remove and return every subscription.
    pub fn drain(&self) -> Vec<Arc<Subscription>> {
        let mut state = self.write();
        state.index.clear();
        state.by_channel.drain().flat_map(|(_, subs)| subs).collect()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.read().index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_for(&self, channel: &Channel) -> usize {
        self.read().by_channel.get(channel).map_or(0, Vec::len)
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.read().by_channel.keys().cloned().collect()
    }
}
