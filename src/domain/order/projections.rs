use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use crate::event_sourcing::bus::EventHandler;
use crate::event_sourcing::core::EventEnvelope;

use super::events::*;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Summary View - In-memory read model
// ============================================================================
//
// Subscribed to the event bus. Each instance owns its storage; clones share
// it. Envelopes at or below the last version seen for an order are skipped,
// so re-delivery does not double count.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSummary {
    pub order_id: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub item_count: usize,
    pub total_quantity: i64,
    pub tracking_number: Option<String>,
    pub version: i64,
}

#[derive(Debug, Clone, Default)]
pub struct OrderSummaryView {
    orders: Arc<RwLock<HashMap<String, OrderSummary>>>,
}

impl OrderSummaryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, order_id: &str) -> Option<OrderSummary> {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(order_id)
            .cloned()
    }

    /// All orders, sorted by id.
    pub fn all(&self) -> Vec<OrderSummary> {
        let mut orders: Vec<OrderSummary> = self
            .orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        orders
    }

    pub fn count_by_status(&self, status: OrderStatus) -> usize {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|o| o.status == status)
            .count()
    }

    fn apply(&self, envelope: &EventEnvelope) {
        let order_id = envelope.aggregate_id().to_string();
        let version = envelope.version().unwrap_or_default();
        let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(created) = envelope.data::<OrderCreated>() {
            orders.entry(order_id.clone()).or_insert_with(|| OrderSummary {
                order_id,
                customer_id: created.customer_id,
                status: OrderStatus::Created,
                item_count: created.items.len(),
                total_quantity: created.items.iter().map(|i| i64::from(i.quantity)).sum(),
                tracking_number: None,
                version,
            });
            return;
        }

        let Some(summary) = orders.get_mut(&order_id) else {
            tracing::warn!(
                order_id = %order_id,
                event_name = %envelope.event_name(),
                "Event for unknown order, skipping"
            );
            return;
        };
        if version <= summary.version {
            return;
        }
        summary.version = version;

        if let Some(updated) = envelope.data::<OrderItemsUpdated>() {
            summary.item_count = updated.items.len();
            summary.total_quantity = updated.items.iter().map(|i| i64::from(i.quantity)).sum();
        } else if envelope.data::<OrderConfirmed>().is_some() {
            summary.status = OrderStatus::Confirmed;
        } else if let Some(shipped) = envelope.data::<OrderShipped>() {
            summary.status = OrderStatus::Shipped;
            summary.tracking_number = Some(shipped.tracking_number.clone());
        } else if envelope.data::<OrderDelivered>().is_some() {
            summary.status = OrderStatus::Delivered;
        } else if envelope.data::<OrderCancelled>().is_some() {
            summary.status = OrderStatus::Cancelled;
        }
    }
}

impl EventHandler for OrderSummaryView {
    fn handle(&self, envelope: &EventEnvelope) {
        self.apply(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderItem;

    fn persisted(order_id: &str, version: i64, event: impl crate::event_sourcing::core::Event) -> EventEnvelope {
        EventEnvelope::new(order_id, event).with_version(version)
    }

    #[test]
    fn test_view_follows_lifecycle() {
        let view = OrderSummaryView::new();
        let customer_id = Uuid::new_v4();

        view.handle(&persisted(
            "o1",
            1,
            OrderCreated {
                customer_id,
                items: vec![OrderItem::new(Uuid::new_v4(), 4)],
            },
        ));
        view.handle(&persisted("o1", 2, OrderConfirmed::default()));
        view.handle(&persisted(
            "o1",
            3,
            OrderShipped {
                tracking_number: "TRK-1".to_string(),
                ..Default::default()
            },
        ));

        let summary = view.get("o1").unwrap();
        assert_eq!(summary.customer_id, customer_id);
        assert_eq!(summary.status, OrderStatus::Shipped);
        assert_eq!(summary.total_quantity, 4);
        assert_eq!(summary.tracking_number.as_deref(), Some("TRK-1"));
        assert_eq!(summary.version, 3);
    }

    #[test]
    fn test_redelivery_is_ignored() {
        let view = OrderSummaryView::new();
        view.handle(&persisted("o1", 1, OrderCreated::default()));
        view.handle(&persisted("o1", 2, OrderCancelled::default()));
        view.handle(&persisted("o1", 2, OrderConfirmed::default()));

        assert_eq!(view.get("o1").unwrap().status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_views_do_not_share_state() {
        let first = OrderSummaryView::new();
        let second = OrderSummaryView::new();
        first.handle(&persisted("o1", 1, OrderCreated::default()));

        assert!(first.get("o1").is_some());
        assert!(second.get("o1").is_none());
        assert_eq!(first.count_by_status(OrderStatus::Created), 1);
    }
}
