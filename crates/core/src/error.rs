//! Adapter error model.

use thiserror::Error;

/// Result type used across the adapter.
pub type PubSubResult<T> = Result<T, PubSubError>;

/// Adapter-level error.
///
/// Operation-scoped failures (`Connection`, `Publish`, `Validation`, `Closed`,
/// `CallerContract`) are returned to the caller of that operation. Dispatch-scoped
/// failures (`Handler`, `MalformedRecord`) are logged at the dispatch boundary and
/// never reach unrelated subscribers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PubSubError {
    /// The broker was unreachable or the connection dropped while it was being established.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// The broker rejected (or failed to acknowledge) an outbound record.
    #[error("publish failed: {0}")]
    Publish(String),

    /// An inbound record could not be decoded into a channel + payload pair.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A callback subscriber failed while handling a message.
    #[error("subscriber handler failed: {0}")]
    Handler(String),

    /// The caller broke a usage contract (e.g. a second concurrent `next()`).
    #[error("caller contract violated: {0}")]
    CallerContract(String),

    /// Input or configuration failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The adapter was closed.
    #[error("pubsub adapter is closed")]
    Closed,
}

impl PubSubError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRecord(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn caller_contract(msg: impl Into<String>) -> Self {
        Self::CallerContract(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether this error was raised on the shared delivery path rather than by an
    /// operation the caller invoked.
    pub fn is_dispatch_scoped(&self) -> bool {
        matches!(self, Self::Handler(_) | Self::MalformedRecord(_))
    }
}
