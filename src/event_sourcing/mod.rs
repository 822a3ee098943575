// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable event sourcing infrastructure.
// Domain-specific code is in src/domain/
//
// ============================================================================

// Core abstractions (aggregate, event, registries, errors)
pub mod core;
// Persistence backends
pub mod store;
// In-process publish/subscribe
pub mod bus;
// Load/Save orchestration
pub mod repository;

pub use self::bus::*;
pub use self::core::*;
pub use self::repository::*;
pub use self::store::*;
