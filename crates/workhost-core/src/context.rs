use std::sync::Arc;
use tokio::sync::broadcast;

use crate::channel::MessagePort;

/// Lifecycle transitions of an owning context that can end a bound worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEvent {
    /// The context is about to reload or navigate away.
    WillReload,
    /// The context's underlying surface closed.
    Closed,
}

/// A long-lived external entity (typically a UI surface) that requested a
/// worker and may own its lifetime.
pub trait OwningContext: Send + Sync {
    fn id(&self) -> u64;

    /// True once the context has been torn down. A destroyed context can
    /// no longer receive ports.
    fn is_destroyed(&self) -> bool;

    /// Hands a channel endpoint to the context, out of band from the
    /// worker's message stream. The channel name and nonce let the context
    /// pair the endpoint with its original request.
    fn deliver_port(&self, channel: &str, nonce: &str, port: MessagePort);

    fn lifecycle(&self) -> broadcast::Receiver<ContextEvent>;
}

/// Looks up owning contexts by id.
pub trait ContextRegistry: Send + Sync {
    fn resolve(&self, id: u64) -> Option<Arc<dyn OwningContext>>;
}
