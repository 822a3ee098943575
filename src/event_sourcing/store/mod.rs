// ============================================================================
// Event Sourcing Store - Generic Persistence Layer
// ============================================================================
//
// The `EventRepository` contract plus its two backends. Every backend
// stores opaque (name, payload, headers) records; nothing here knows about
// concrete aggregate or event types.
//
// ============================================================================

pub mod event_store;
pub mod memory;
pub mod postgres;

pub use event_store::{EventRepository, ReadDirection, ReadQuery, ReadSpec};
pub use memory::InMemoryEventRepository;
pub use postgres::PgEventRepository;
