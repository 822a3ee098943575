use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::event_sourcing::core::EventEnvelope;

/// Consumer of published envelopes.
///
/// Handlers run on the publisher's task and must not block for long. A
/// panicking handler is not caught by the bus.
pub trait EventHandler: Send + Sync {
    fn handle(&self, envelope: &EventEnvelope);
}

impl<F> EventHandler for F
where
    F: Fn(&EventEnvelope) + Send + Sync,
{
    fn handle(&self, envelope: &EventEnvelope) {
        self(envelope)
    }
}

/// Event type name -> set of handlers.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to every name in `event_names`. Adding the same
    /// handler (same `Arc`) to a name twice is a no-op.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>, event_names: &[&str]) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for event_name in event_names {
            let subscribed = handlers.entry((*event_name).to_string()).or_default();
            if !subscribed.iter().any(|h| same_handler(h, &handler)) {
                subscribed.push(Arc::clone(&handler));
            }
        }
    }

    /// Invoke every handler registered for the envelope's event name.
    ///
    /// Handlers are snapshotted first so they may subscribe further handlers
    /// without deadlocking the bus.
    pub fn publish_event(&self, envelope: &EventEnvelope) {
        let subscribed: Vec<Arc<dyn EventHandler>> = {
            let handlers = self
                .handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match handlers.get(envelope.event_name()) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        tracing::debug!(
            event_name = %envelope.event_name(),
            aggregate_id = %envelope.aggregate_id(),
            version = ?envelope.version(),
            handlers = subscribed.len(),
            "Publishing event"
        );

        for handler in subscribed {
            handler.handle(envelope);
        }
    }

    pub fn handler_count(&self, event_name: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_name)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_map()
            .entries(handlers.iter().map(|(name, list)| (name, list.len())))
            .finish()
    }
}

/// Identity by allocation, ignoring vtable pointers.
fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
