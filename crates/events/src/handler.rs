use serde_json::Value as JsonValue;

/// Result of a callback subscriber handling one message.
pub type HandlerResult = anyhow::Result<()>;

/// Callback invoked synchronously by the delivery dispatcher for each message on the
/// subscribed channel.
///
/// ## Error isolation
///
/// An `Err` (or a panic) from one handler is logged at the dispatch boundary and otherwise
/// ignored: other subscribers of the same message still receive it, and the dispatcher moves
/// on to the next record.
///
/// ## Blocking
///
/// Handlers run on the single delivery path. A slow handler delays delivery of the current
/// record to the remaining subscribers and of every later record; hand long work off to a
/// task or use an iterator subscription instead.
///
/// Closures of the form `Fn(JsonValue) -> HandlerResult` implement this trait.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, payload: JsonValue) -> HandlerResult;
}

impl<F> MessageHandler for F
where
    F: Fn(JsonValue) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, payload: JsonValue) -> HandlerResult {
        self(payload)
    }
}
