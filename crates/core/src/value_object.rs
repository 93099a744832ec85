//! Value object trait: equality by value, not identity.
//!
//! `Channel` and `TopicSet` are value objects: two channels with the same name are the same
//! channel, regardless of which subscription or publish call produced them.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. Subscriptions, by contrast,
/// have identity (`SubscriptionId`): two callback subscriptions on the same channel are
/// different subscriptions.
///
/// ## Design Constraints
///
/// The trait requires:
/// - **Clone**: value objects are freely copied into records, routes and log fields
/// - **PartialEq**: compared by their attribute values
/// - **Debug**: printable in logs and test failures
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
