//! `kafka-pubsub-core`: value types shared by the pub/sub adapter.
//!
//! This crate contains **pure** primitives (no broker, no async runtime).

pub mod channel;
pub mod error;
pub mod id;
pub mod value_object;

pub use channel::{Channel, TopicSet};
pub use error::{PubSubError, PubSubResult};
pub use id::SubscriptionId;
pub use value_object::ValueObject;
