// ============================================================================
// Order Domain
// ============================================================================
//
// A small order lifecycle built on the event sourcing toolkit:
//
//   Created -> Confirmed -> Shipped -> Delivered
//      \__________\___________\_______> Cancelled
//
// The register_* helpers wire the domain into a factory, a stream namer and
// an event bus.
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;
pub mod projections;

use std::sync::Arc;

use crate::event_sourcing::bus::{EventBus, EventHandler};
use crate::event_sourcing::core::{type_hash_id, AggregateRoot, EventFactory, Result, StreamNamer};

pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
pub use projections::*;

/// Register every order event with the factory.
pub fn register_order_events(factory: &mut EventFactory) -> Result<()> {
    factory.register::<OrderCreated>()?;
    factory.register::<OrderItemsUpdated>()?;
    factory.register::<OrderConfirmed>()?;
    factory.register::<OrderShipped>()?;
    factory.register::<OrderDelivered>()?;
    factory.register::<OrderCancelled>()?;
    Ok(())
}

/// Orders live in `order#{id}` streams.
pub fn register_order_stream(namer: &mut StreamNamer) -> Result<()> {
    namer.register_delegate(type_hash_id, &[Order::AGGREGATE_TYPE])
}

/// Subscribe `view` to every order event.
pub fn subscribe_order_view(bus: &EventBus, view: &OrderSummaryView) {
    let handler: Arc<dyn EventHandler> = Arc::new(view.clone());
    bus.add_handler(handler, &ORDER_EVENT_NAMES);
}
