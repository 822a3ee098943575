use std::sync::LazyLock;
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::event_sourcing::core::{AggregateBase, AggregateRoot, Event, Result, Transitions};
use super::value_objects::{OrderItem, OrderStatus};
use super::events::*;
use super::commands::OrderCommand;
use super::errors::OrderError;

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// Behaviour methods check the business rules against current state and only
// then raise an event. State changes happen exclusively in the transition
// table below, so replay and live commands run the same code.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct Order {
    base: AggregateBase,

    // Current State (derived from events); `None` until OrderCreated
    status: Option<OrderStatus>,
    customer_id: Option<Uuid>,
    items: Vec<OrderItem>,

    // Audit Trail
    confirmed_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,

    tracking_number: Option<String>,
    carrier: Option<String>,
    cancelled_reason: Option<String>,
}

static ORDER_TRANSITIONS: LazyLock<Transitions<Order>> = LazyLock::new(|| {
    Transitions::<Order>::new(Order::AGGREGATE_TYPE)
        .on::<OrderCreated>(|order, e| {
            order.status = Some(OrderStatus::Created);
            order.customer_id = Some(e.customer_id);
            order.items = e.items.clone();
        })
        .on::<OrderItemsUpdated>(|order, e| order.items = e.items.clone())
        .on::<OrderConfirmed>(|order, e| {
            order.status = Some(OrderStatus::Confirmed);
            order.confirmed_at = Some(e.confirmed_at);
        })
        .on::<OrderShipped>(|order, e| {
            order.status = Some(OrderStatus::Shipped);
            order.tracking_number = Some(e.tracking_number.clone());
            order.carrier = Some(e.carrier.clone());
        })
        .on::<OrderDelivered>(|order, e| {
            order.status = Some(OrderStatus::Delivered);
            order.delivered_at = Some(e.delivered_at);
        })
        .on::<OrderCancelled>(|order, e| {
            order.status = Some(OrderStatus::Cancelled);
            order.cancelled_reason = e.reason.clone();
        })
});

impl Order {
    pub fn status(&self) -> Option<OrderStatus> {
        self.status
    }

    pub fn customer_id(&self) -> Option<Uuid> {
        self.customer_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn carrier(&self) -> Option<&str> {
        self.carrier.as_deref()
    }

    pub fn cancelled_reason(&self) -> Option<&str> {
        self.cancelled_reason.as_deref()
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    /// Total number of units across all items.
    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|i| i64::from(i.quantity)).sum()
    }

    // ------------------------------------------------------------------------
    // Behaviour
    // ------------------------------------------------------------------------

    pub fn create(&mut self, customer_id: Uuid, items: Vec<OrderItem>) -> Result<()> {
        if self.status.is_some() {
            return Err(OrderError::AlreadyCreated.into());
        }
        validate_items(&items)?;

        self.raise(OrderCreated { customer_id, items })
    }

    pub fn update_items(&mut self, items: Vec<OrderItem>, reason: Option<String>) -> Result<()> {
        match self.current_status()? {
            OrderStatus::Created => {}
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled.into()),
            other => return Err(OrderError::InvalidStatusTransition(other).into()),
        }
        validate_items(&items)?;

        self.raise(OrderItemsUpdated { items, reason })
    }

    pub fn confirm(&mut self) -> Result<()> {
        match self.current_status()? {
            OrderStatus::Created => {}
            OrderStatus::Confirmed => return Err(OrderError::AlreadyConfirmed.into()),
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled.into()),
            other => return Err(OrderError::InvalidStatusTransition(other).into()),
        }

        self.raise(OrderConfirmed {
            confirmed_at: Utc::now(),
        })
    }

    pub fn ship(&mut self, tracking_number: String, carrier: String) -> Result<()> {
        match self.current_status()? {
            OrderStatus::Confirmed => {}
            OrderStatus::Created => return Err(OrderError::NotConfirmed.into()),
            other => return Err(OrderError::InvalidStatusTransition(other).into()),
        }
        if tracking_number.trim().is_empty() {
            return Err(OrderError::MissingTrackingNumber.into());
        }

        self.raise(OrderShipped {
            tracking_number,
            carrier,
            shipped_at: Utc::now(),
        })
    }

    pub fn deliver(&mut self, signature: Option<String>) -> Result<()> {
        if self.current_status()? != OrderStatus::Shipped {
            return Err(OrderError::NotShipped.into());
        }

        self.raise(OrderDelivered {
            delivered_at: Utc::now(),
            signature,
        })
    }

    pub fn cancel(&mut self, reason: Option<String>, cancelled_by: Option<Uuid>) -> Result<()> {
        match self.current_status()? {
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled.into()),
            OrderStatus::Delivered => {
                return Err(OrderError::InvalidStatusTransition(OrderStatus::Delivered).into())
            }
            // Created, Confirmed or Shipped
            _ => {}
        }

        self.raise(OrderCancelled {
            reason,
            cancelled_by,
        })
    }

    /// Dispatch a command to the matching behaviour method.
    pub fn handle(&mut self, command: OrderCommand) -> Result<()> {
        match command {
            OrderCommand::CreateOrder { customer_id, items } => self.create(customer_id, items),
            OrderCommand::UpdateItems { items, reason } => self.update_items(items, reason),
            OrderCommand::ConfirmOrder => self.confirm(),
            OrderCommand::ShipOrder {
                tracking_number,
                carrier,
            } => self.ship(tracking_number, carrier),
            OrderCommand::DeliverOrder { signature } => self.deliver(signature),
            OrderCommand::CancelOrder {
                reason,
                cancelled_by,
            } => self.cancel(reason, cancelled_by),
        }
    }

    fn current_status(&self) -> Result<OrderStatus, OrderError> {
        self.status.ok_or(OrderError::NotCreated)
    }
}

fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyItems);
    }
    if let Some(item) = items.iter().find(|item| item.quantity <= 0) {
        return Err(OrderError::InvalidQuantity(item.quantity));
    }
    Ok(())
}

// ============================================================================
// AggregateRoot Implementation
// ============================================================================

impl AggregateRoot for Order {
    const AGGREGATE_TYPE: &'static str = "Order";

    fn new(id: &str) -> Self {
        Self {
            base: AggregateBase::new(id),
            status: None,
            customer_id: None,
            items: Vec::new(),
            confirmed_at: None,
            delivered_at: None,
            tracking_number: None,
            carrier: None,
            cancelled_reason: None,
        }
    }

    fn base(&self) -> &AggregateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AggregateBase {
        &mut self.base
    }

    fn when(&mut self, event: &dyn Event) -> Result<()> {
        ORDER_TRANSITIONS.apply(self, event)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{DomainEvent, EsError};

    fn items() -> Vec<OrderItem> {
        vec![OrderItem::new(Uuid::new_v4(), 2), OrderItem::new(Uuid::new_v4(), 1)]
    }

    fn created() -> Order {
        let mut order = Order::new("order-1");
        order.create(Uuid::new_v4(), items()).unwrap();
        order
    }

    #[test]
    fn test_create_raises_event() {
        let order = created();

        assert_eq!(order.status(), Some(OrderStatus::Created));
        assert_eq!(order.total_quantity(), 3);
        assert_eq!(order.current_version(), 1);
        assert_eq!(order.original_version(), 0);
        assert_eq!(order.changes().len(), 1);
        assert_eq!(order.changes()[0].event_name(), OrderCreated::NAME);
    }

    #[test]
    fn test_create_twice_is_rejected() {
        let mut order = created();
        let err = order.create(Uuid::new_v4(), items()).unwrap_err();

        assert!(matches!(err, EsError::Validation(_)));
        assert_eq!(order.changes().len(), 1);
    }

    #[test]
    fn test_rejected_command_changes_nothing() {
        let mut order = created();

        let err = order
            .update_items(vec![OrderItem::new(Uuid::new_v4(), 0)], None)
            .unwrap_err();

        assert_eq!(err.to_string(), "validation failed: Invalid item quantity: 0");
        assert_eq!(order.total_quantity(), 3);
        assert_eq!(order.current_version(), 1);
    }

    #[test]
    fn test_full_lifecycle() {
        let mut order = created();
        order.confirm().unwrap();
        order
            .ship("1Z999".to_string(), "UPS".to_string())
            .unwrap();
        order.deliver(Some("J. Doe".to_string())).unwrap();

        assert_eq!(order.status(), Some(OrderStatus::Delivered));
        assert_eq!(order.tracking_number(), Some("1Z999"));
        assert!(order.delivered_at().is_some());
        assert_eq!(order.current_version(), 4);
    }

    #[test]
    fn test_ship_requires_confirmation() {
        let mut order = created();
        let err = order.ship("T".to_string(), "C".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "validation failed: Order must be confirmed before shipping");
    }

    #[test]
    fn test_commands_on_missing_order_fail() {
        let mut order = Order::new("ghost");
        assert!(order.confirm().is_err());
        assert!(order.cancel(None, None).is_err());
        assert!(order.changes().is_empty());
    }

    #[test]
    fn test_cannot_cancel_delivered_order() {
        let mut order = created();
        order.confirm().unwrap();
        order.ship("T".to_string(), "C".to_string()).unwrap();
        order.deliver(None).unwrap();

        assert!(order.cancel(Some("late".to_string()), None).is_err());
    }

    #[test]
    fn test_replay_matches_live_state() {
        let mut live = created();
        live.confirm().unwrap();
        live.cancel(Some("changed mind".to_string()), None).unwrap();

        let mut replayed = Order::new("order-1");
        replayed.rebuild_from_events(live.changes().to_vec()).unwrap();

        assert_eq!(replayed.status(), Some(OrderStatus::Cancelled));
        assert_eq!(replayed.cancelled_reason(), Some("changed mind"));
        assert_eq!(replayed.items(), live.items());
        assert_eq!(replayed.current_version(), 3);
        assert_eq!(replayed.original_version(), 3);
        assert!(replayed.changes().is_empty());
    }

    #[test]
    fn test_handle_dispatches_commands() {
        let mut order = Order::new("order-2");
        order
            .handle(OrderCommand::CreateOrder {
                customer_id: Uuid::new_v4(),
                items: items(),
            })
            .unwrap();
        order.handle(OrderCommand::ConfirmOrder).unwrap();

        assert_eq!(order.status(), Some(OrderStatus::Confirmed));
    }
}
