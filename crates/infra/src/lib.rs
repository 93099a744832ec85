//! Infrastructure layer: adapter lifecycle, configuration, broker clients.

pub mod broker;
pub mod config;
pub mod pubsub;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use config::PubSubConfig;
pub use pubsub::KafkaPubSub;
