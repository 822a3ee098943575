// ============================================================================
// Domain Layer
// ============================================================================
//
// Aggregates built on the generic event sourcing infrastructure.
//
// ============================================================================

pub mod order;
