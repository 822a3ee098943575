//! Event-sourced aggregates over a pluggable, append-only event store.
//!
//! - [`event_sourcing`] holds the generic infrastructure: aggregates, the
//!   event factory and stream namer registries, the event bus, the
//!   [`EventRepository`](event_sourcing::EventRepository) backends and the
//!   [`DomainRepository`](event_sourcing::DomainRepository).
//! - [`domain`] holds concrete aggregates built on it.

pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod metrics;
pub mod utils;
