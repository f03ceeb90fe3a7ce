use std::env;
use std::sync::{Arc, OnceLock};

use herald_core::{AllNotifications, Mediator, Registry};
use tracing::{info, warn};

mod behaviors;
mod config;
mod handlers;
mod messages;
mod paths;
mod scenarios;

use behaviors::{LoggingBehavior, StreamLogging, TimingBehavior, ValidateOrder};
use config::HeraldConfig;
use handlers::{
    AuditTrail, CounterHandler, CreateOrderHandler, EmailHandler, ErrorLog, Inventory,
    InventoryHandler, PingHandler, Statistics, StatisticsHandler,
};
use messages::{Auditable, Counter, CreateOrder, ErrorObserved, OrderPlaced, Ping};

/// Shared state the demo inspects once the scenarios have run.
pub struct Demo {
    pub mediator: Mediator,
    pub inventory: Arc<Inventory>,
    pub statistics: Arc<Statistics>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let config = HeraldConfig::load()?;
    info!(
        strategy = ?config.dispatch.publish_strategy,
        strict_handlers = config.dispatch.strict_handlers,
        "herald demo starting"
    );

    let demo = build(&config)?;
    scenarios::run(&demo, &config.demo).await?;

    let statistics = serde_json::to_string(&demo.statistics.snapshot())?;
    info!(
        %statistics,
        reserved = demo.inventory.reserved(),
        cached_pipelines = demo.mediator.cached_pipelines(),
        "herald demo finished"
    );
    Ok(())
}

fn build(config: &HeraldConfig) -> Result<Demo, herald_core::RegistryError> {
    let inventory = Arc::new(Inventory::default());
    let statistics = Arc::new(Statistics::default());
    let slot = Arc::new(OnceLock::new());

    let mut builder = Registry::builder();
    builder
        .request_handler::<Ping, _>(PingHandler)
        .request_handler::<CreateOrder, _>(CreateOrderHandler)
        .stream_handler::<Counter, _>(CounterHandler)
        .notification_handler::<OrderPlaced, _>(InventoryHandler(Arc::clone(&inventory)))
        .notification_handler::<OrderPlaced, _>(EmailHandler)
        .notification_handler::<ErrorObserved, _>(ErrorLog)
        .capability_handler::<Auditable, _>(AuditTrail)
        .capability_handler::<AllNotifications, _>(StatisticsHandler(Arc::clone(&statistics)))
        .generic_behavior(LoggingBehavior::new(Arc::clone(&slot)))
        .generic_behavior(TimingBehavior)
        .behavior::<CreateOrder, _>(ValidateOrder)
        .generic_stream_behavior(StreamLogging);

    let registry = builder.build_with(&config.dispatch)?;
    let mediator = Mediator::from_config(registry, &config.dispatch);
    if slot.set(mediator.downgrade()).is_err() {
        warn!("logging behavior already bound to a mediator");
    }

    Ok(Demo {
        mediator,
        inventory,
        statistics,
    })
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(filter_directive(|key| env::var(key).ok()))
}

/// `HERALD_LOG`, then `RUST_LOG`, verbatim; otherwise `debug` when
/// `HERALD_DEBUG` is set and `info` when not.
fn filter_directive(var: impl Fn(&str) -> Option<String>) -> String {
    if let Some(filter) = var("HERALD_LOG").or_else(|| var("RUST_LOG")) {
        return filter;
    }
    let debug = var("HERALD_DEBUG").is_some_and(|value| config::parse_bool(&value));
    if debug { "debug" } else { "info" }.to_string()
}
