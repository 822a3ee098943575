// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// Aggregate contract, event/envelope types, the two registries used on the
// load path, and the error taxonomy. Nothing here knows about a particular
// domain or backend.
//
// ============================================================================

pub mod aggregate;
pub mod error;
pub mod event;
pub mod event_factory;
pub mod stream_namer;

// Re-export core types for convenience
pub use aggregate::{AggregateBase, AggregateRoot, Transitions};
pub use error::{EsError, Result, UsageError};
pub use event::{
    DomainEvent, Event, EventEnvelope, RawEvent, AGGREGATE_ID_HEADER, CORRELATION_ID_HEADER,
    TIMESTAMP_HEADER,
};
pub use event_factory::EventFactory;
pub use stream_namer::{type_hash_id, StreamNamer};
