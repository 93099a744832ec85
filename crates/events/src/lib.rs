//! Channel pub/sub mechanics: routing, subscription registry, delivery and pull adapter.
//!
//! Nothing in this crate opens a network connection. Broker access goes through the
//! [`BrokerClient`] facade; the in-memory implementation backs tests and local development.

pub mod broker;
pub mod dispatcher;
pub mod envelope;
pub mod handler;
pub mod in_memory_broker;
pub mod iterator;
pub mod record;
pub mod registry;
pub mod router;

pub use broker::{BrokerClient, BrokerError, RecordStream};
pub use dispatcher::{DeliveryDispatcher, DispatchReport};
pub use envelope::DecodedMessage;
pub use handler::{HandlerResult, MessageHandler};
pub use in_memory_broker::{BrokerStats, InMemoryBroker};
pub use iterator::ChannelIterator;
pub use record::{Headers, InboundRecord, OutboundRecord};
pub use registry::{Subscription, SubscriptionMode, SubscriptionRegistry};
pub use router::{CHANNEL_FIELD, CHANNEL_HEADER, ChannelRouter, TARGET_TOPIC_FIELD};
