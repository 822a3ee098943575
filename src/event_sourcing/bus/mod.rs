// ============================================================================
// Event Bus - In-process Publish/Subscribe
// ============================================================================
//
// Process-local, synchronous, best-effort delivery of persisted envelopes to
// read models and other consumers.
//
// ============================================================================

pub mod event_bus;

pub use event_bus::{EventBus, EventHandler};
