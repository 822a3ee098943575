// ============================================================================
// Repository - Aggregate persistence orchestration
// ============================================================================

pub mod domain_repository;

pub use domain_repository::DomainRepository;
