use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::event_sourcing::core::DomainEvent;
use super::value_objects::OrderItem;

// ============================================================================
// Order Events - Domain Events for Order Aggregate
// ============================================================================
//
// Each event is its own type, registered in the factory under `NAME`.
// `Default` gives the factory its zero value to unmarshal into.
//
// ============================================================================

/// Every order event name, for factory and bus registration.
pub const ORDER_EVENT_NAMES: [&str; 6] = [
    OrderCreated::NAME,
    OrderItemsUpdated::NAME,
    OrderConfirmed::NAME,
    OrderShipped::NAME,
    OrderDelivered::NAME,
    OrderCancelled::NAME,
];

/// Order Created - Initial event in order lifecycle
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrderCreated {
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
}

impl DomainEvent for OrderCreated {
    const NAME: &'static str = "OrderCreated";
}

/// Order Items Updated - Order contents modified
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrderItemsUpdated {
    pub items: Vec<OrderItem>,
    pub reason: Option<String>,
}

impl DomainEvent for OrderItemsUpdated {
    const NAME: &'static str = "OrderItemsUpdated";
}

/// Order Confirmed - Order accepted for fulfillment
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrderConfirmed {
    pub confirmed_at: DateTime<Utc>,
}

impl DomainEvent for OrderConfirmed {
    const NAME: &'static str = "OrderConfirmed";
}

/// Order Shipped - Order dispatched to customer
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrderShipped {
    pub tracking_number: String,
    pub carrier: String,
    pub shipped_at: DateTime<Utc>,
}

impl DomainEvent for OrderShipped {
    const NAME: &'static str = "OrderShipped";
}

/// Order Delivered - Order successfully delivered
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrderDelivered {
    pub delivered_at: DateTime<Utc>,
    pub signature: Option<String>,
}

impl DomainEvent for OrderDelivered {
    const NAME: &'static str = "OrderDelivered";
}

/// Order Cancelled - Order lifecycle ended
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrderCancelled {
    pub reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
}

impl DomainEvent for OrderCancelled {
    const NAME: &'static str = "OrderCancelled";
}
