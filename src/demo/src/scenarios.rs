use std::any::type_name;

use futures::future::join_all;
use futures::stream::StreamExt;
use herald_core::{
    AnyMessage, AnyResponse, CancellationToken, DispatchError, Dispatched, PublishError,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DemoConfig;
use crate::messages::{Counter, CreateOrder, LineItem, OrderPlaced, Ping, Pong};
use crate::Demo;

/// Run every scenario in order. Faults the scenarios provoke on purpose are
/// logged; anything else aborts the run.
pub async fn run(demo: &Demo, config: &DemoConfig) -> Result<(), DispatchError> {
    pings(demo).await?;
    orders(demo, config).await?;
    concurrent_pings(demo, config.concurrent_pings).await?;
    counters(demo, config).await?;
    opaque(demo).await?;
    Ok(())
}

async fn pings(demo: &Demo) -> Result<(), DispatchError> {
    let pong = demo.mediator.send(Ping::new("Ping")).await?;
    info!(reply = %pong.reply, "typed send");

    let response = demo.mediator.send_dyn(Box::new(Ping::new("Opaque ping"))).await?;
    let pong = downcast::<Pong>(response)?;
    info!(reply = %pong.reply, "opaque send");
    Ok(())
}

async fn orders(demo: &Demo, config: &DemoConfig) -> Result<(), DispatchError> {
    let confirmation = demo
        .mediator
        .send(CreateOrder {
            customer: config.customer.clone(),
            items: vec![LineItem::new("tea", 2, 450), LineItem::new("scone", 3, 275)],
        })
        .await?;
    info!(
        order = %confirmation.order_id,
        total_cents = confirmation.total_cents,
        "order created"
    );
    demo.mediator
        .publish(OrderPlaced {
            order_id: confirmation.order_id,
            customer: config.customer.clone(),
            total_cents: confirmation.total_cents,
        })
        .await;

    match demo
        .mediator
        .send(CreateOrder {
            customer: config.customer.clone(),
            items: Vec::new(),
        })
        .await
    {
        Err(DispatchError::Validation(reason)) => info!(%reason, "empty order rejected"),
        Err(err) => return Err(err),
        Ok(confirmation) => warn!(order = %confirmation.order_id, "empty order was accepted"),
    }

    let report = demo
        .mediator
        .try_publish(
            OrderPlaced {
                order_id: Uuid::new_v4(),
                customer: "walk-in".to_string(),
                total_cents: 900,
            },
            &CancellationToken::new(),
        )
        .await;
    match report {
        Ok(()) => warn!("walk-in order reached a mailbox"),
        Err(PublishError::HandlersFailed { failures, .. }) => {
            for failure in &failures {
                info!(handler = failure.handler, error = %failure.error, "walk-in order not delivered");
            }
        }
        Err(PublishError::Dispatch(err)) => return Err(err),
    }
    Ok(())
}

async fn concurrent_pings(demo: &Demo, count: usize) -> Result<(), DispatchError> {
    let tasks = (0..count).map(|index| {
        let mediator = demo.mediator.clone();
        tokio::spawn(async move { mediator.send(Ping::new(format!("Ping {index}"))).await })
    });

    let mut replies = 0usize;
    for joined in join_all(tasks).await {
        let outcome = joined.map_err(|err| DispatchError::Panicked(err.to_string()))?;
        outcome?;
        replies += 1;
    }
    info!(sent = count, replies, "concurrent pings answered");
    Ok(())
}

async fn counters(demo: &Demo, config: &DemoConfig) -> Result<(), DispatchError> {
    let counter = Counter {
        start: 1,
        count: config.counter_items,
        interval_ms: config.counter_interval_ms,
    };

    let mut values = Vec::new();
    let mut stream = demo.mediator.create_stream(counter.clone())?;
    while let Some(item) = stream.next().await {
        values.push(item?);
    }
    info!(?values, "counter drained");

    let cancel = CancellationToken::new();
    let mut stream = demo.mediator.create_stream_with_cancel(counter, cancel.clone())?;
    let mut pulled = 0u64;
    while pulled < config.cancel_after {
        match stream.next().await {
            Some(item) => {
                item?;
                pulled += 1;
            }
            None => break,
        }
    }
    cancel.cancel();
    let after_cancel = stream.count().await;
    info!(pulled, after_cancel, "counter cancelled");
    Ok(())
}

/// Dispatch a mixed batch without naming any message type at the call site.
async fn opaque(demo: &Demo) -> Result<(), DispatchError> {
    let batch: Vec<Box<dyn AnyMessage>> = vec![
        Box::new(Ping::new("Batched ping")),
        Box::new(OrderPlaced {
            order_id: Uuid::new_v4(),
            customer: "grace@example.com".to_string(),
            total_cents: 1200,
        }),
        Box::new(Counter {
            start: 10,
            count: 3,
            interval_ms: 0,
        }),
    ];

    let cancel = CancellationToken::new();
    for message in batch {
        let name = message.type_name();
        match demo.mediator.dispatch_dyn(message, &cancel).await? {
            Dispatched::Response(response) => {
                let pong = downcast::<Pong>(response)?;
                info!(message = name, reply = %pong.reply, "opaque response");
            }
            Dispatched::Published(report) => {
                info!(message = name, handlers = report.handlers, "opaque publish");
            }
            Dispatched::Stream(stream) => {
                let items = stream.count().await;
                info!(message = name, items, "opaque stream");
            }
        }
    }
    Ok(())
}

fn downcast<T: 'static>(response: AnyResponse) -> Result<T, DispatchError> {
    response
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| DispatchError::TypeMismatch {
            expected: type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use herald_core::DispatchConfig;

    use super::*;
    use crate::config::HeraldConfig;

    fn config() -> HeraldConfig {
        HeraldConfig {
            demo: DemoConfig {
                concurrent_pings: 16,
                counter_items: 4,
                counter_interval_ms: 5,
                cancel_after: 2,
                ..DemoConfig::default()
            },
            dispatch: DispatchConfig::default(),
            ..HeraldConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_scenario_completes() {
        let config = config();
        let demo = crate::build(&config).unwrap();

        run(&demo, &config.demo).await.unwrap();

        // Two placed orders from the order scenario plus one from the batch.
        assert_eq!(demo.inventory.reserved(), 3);
        let snapshot = demo.statistics.snapshot();
        assert_eq!(snapshot.by_type.get("OrderPlaced"), Some(&3));
        // Only the rejected empty order faults a request; the walk-in mail
        // failure stays inside the publish report.
        assert_eq!(snapshot.by_type.get("ErrorObserved"), Some(&1));
    }

    #[tokio::test]
    async fn strict_build_accepts_demo_registry() {
        let mut config = config();
        config.dispatch.strict_handlers = true;
        assert!(crate::build(&config).is_ok());
    }
}
