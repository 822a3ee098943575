use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use aggregate_es::config::{Backend, Config};
use aggregate_es::domain::order::{
    register_order_events, register_order_stream, subscribe_order_view, OrderCommand,
    OrderCommandHandler, OrderItem, OrderSummaryView,
};
use aggregate_es::event_sourcing::{
    DomainRepository, EventBus, EventFactory, EventRepository, InMemoryEventRepository,
    PgEventRepository, StreamNamer,
};
use aggregate_es::metrics::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,aggregate_es=debug")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(backend = ?config.backend, "🚀 Starting event sourcing demo");

    // === 1. Event store backend ===
    let store: Arc<dyn EventRepository> = match config.backend {
        Backend::Memory => Arc::new(InMemoryEventRepository::new()),
        Backend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;
            let pg = PgEventRepository::connect(url, config.max_connections).await?;
            pg.migrate().await?;
            Arc::new(pg)
        }
    };

    // === 2. Registries, bus and read model ===
    let mut factory = EventFactory::new();
    register_order_events(&mut factory)?;

    let mut namer = StreamNamer::new();
    register_order_stream(&mut namer)?;

    let bus = Arc::new(EventBus::new());
    let view = OrderSummaryView::new();
    subscribe_order_view(&bus, &view);

    let metrics = Arc::new(Metrics::new()?);

    let mut repository =
        DomainRepository::new(store, bus, Arc::new(namer), Arc::new(factory))
            .with_metrics(metrics.clone());
    if let Some(timeout) = config.operation_timeout {
        repository = repository.with_operation_timeout(timeout);
    }

    let handler = OrderCommandHandler::new(repository, config.retry.clone());

    // === 3. Order lifecycle ===
    let order_id = Uuid::new_v4().to_string();
    let customer_id = Uuid::new_v4();

    let version = handler
        .handle(
            &order_id,
            OrderCommand::CreateOrder {
                customer_id,
                items: vec![
                    OrderItem::new(Uuid::new_v4(), 2),
                    OrderItem::new(Uuid::new_v4(), 1),
                ],
            },
        )
        .await?;
    tracing::info!(order_id = %order_id, version, "✅ Order created");

    handler
        .handle(
            &order_id,
            OrderCommand::UpdateItems {
                items: vec![OrderItem::new(Uuid::new_v4(), 5)],
                reason: Some("Customer changed quantity".to_string()),
            },
        )
        .await?;
    handler.handle(&order_id, OrderCommand::ConfirmOrder).await?;
    handler
        .handle(
            &order_id,
            OrderCommand::ShipOrder {
                tracking_number: "1Z999AA10123456784".to_string(),
                carrier: "UPS".to_string(),
            },
        )
        .await?;
    let version = handler
        .handle(
            &order_id,
            OrderCommand::DeliverOrder {
                signature: Some("J. Doe".to_string()),
            },
        )
        .await?;
    tracing::info!(order_id = %order_id, version, "✅ Order delivered");

    // A rejected command leaves the stream untouched
    if let Err(e) = handler
        .handle(
            &order_id,
            OrderCommand::CancelOrder {
                reason: Some("Too late".to_string()),
                cancelled_by: None,
            },
        )
        .await
    {
        tracing::warn!(error = %e, "❌ Cancel rejected");
    }

    // === 4. Read back ===
    let order = handler.load(&order_id).await?;
    tracing::info!(
        order_id = %order_id,
        status = ?order.status(),
        total_quantity = order.total_quantity(),
        "📦 Order rebuilt from its stream"
    );

    for summary in view.all() {
        tracing::info!(?summary, "📊 Read model");
    }

    println!("{}", metrics.render()?);

    tracing::info!("🎉 Demo complete!");
    Ok(())
}
