use crate::event_sourcing::core::{AggregateRoot, EsError, Result};
use crate::event_sourcing::repository::DomainRepository;
use crate::utils::retry::RetryConfig;

use super::aggregate::Order;
use super::commands::OrderCommand;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Command -> load Order -> behaviour -> save -> publish
//
// Conflicting writers are resolved by reloading and re-running the command,
// bounded by `retry`.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderCommandHandler {
    repository: DomainRepository,
    retry: RetryConfig,
}

impl OrderCommandHandler {
    pub fn new(repository: DomainRepository, retry: RetryConfig) -> Self {
        Self { repository, retry }
    }

    /// Handle a command and persist resulting events.
    /// Returns the order's stream version after the save.
    #[tracing::instrument(skip(self, command), fields(command = command.name()))]
    pub async fn handle(&self, order_id: &str, command: OrderCommand) -> Result<i64> {
        let order = self
            .repository
            .execute::<Order, _>(order_id, self.retry.clone(), |order| {
                // Missing orders surface as not found, not as a rejected command
                if order.original_version() == 0 && !command.creates() {
                    return Err(EsError::AggregateNotFound {
                        aggregate_type: Order::AGGREGATE_TYPE.to_string(),
                        aggregate_id: order.id().to_string(),
                    });
                }
                order.handle(command.clone())
            })
            .await?;

        tracing::debug!(version = order.current_version(), "Order command handled");
        Ok(order.current_version())
    }

    pub async fn load(&self, order_id: &str) -> Result<Order> {
        self.repository.load::<Order>(order_id).await
    }
}
