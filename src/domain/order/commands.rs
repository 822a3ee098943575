use uuid::Uuid;
use super::value_objects::OrderItem;

/// Intent against a single order. The order id travels next to the command,
/// see [`OrderCommandHandler::handle`](super::OrderCommandHandler::handle).
#[derive(Debug, Clone, PartialEq)]
pub enum OrderCommand {
    CreateOrder {
        customer_id: Uuid,
        items: Vec<OrderItem>,
    },
    UpdateItems {
        items: Vec<OrderItem>,
        reason: Option<String>,
    },
    ConfirmOrder,
    ShipOrder {
        tracking_number: String,
        carrier: String,
    },
    DeliverOrder {
        signature: Option<String>,
    },
    CancelOrder {
        reason: Option<String>,
        cancelled_by: Option<Uuid>,
    },
}

impl OrderCommand {
    /// Stable label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::CreateOrder { .. } => "CreateOrder",
            OrderCommand::UpdateItems { .. } => "UpdateItems",
            OrderCommand::ConfirmOrder => "ConfirmOrder",
            OrderCommand::ShipOrder { .. } => "ShipOrder",
            OrderCommand::DeliverOrder { .. } => "DeliverOrder",
            OrderCommand::CancelOrder { .. } => "CancelOrder",
        }
    }

    /// Only `CreateOrder` may run against an order with no history.
    pub fn creates(&self) -> bool {
        matches!(self, OrderCommand::CreateOrder { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        let create = OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            items: vec![OrderItem::new(Uuid::new_v4(), 1)],
        };
        assert_eq!(create.name(), "CreateOrder");
        assert!(create.creates());

        let cancel = OrderCommand::CancelOrder {
            reason: None,
            cancelled_by: None,
        };
        assert_eq!(cancel.name(), "CancelOrder");
        assert!(!cancel.creates());
    }
}
