use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use herald_core::{
    AnyMessage, CancellationToken, DispatchError, DynNotificationHandler, ItemStream,
    NotificationHandler, RequestHandler, StreamHandler,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::messages::{
    CreateOrder, Counter, ErrorObserved, OrderConfirmation, OrderPlaced, Ping, Pong,
};

pub struct PingHandler;

impl RequestHandler<Ping> for PingHandler {
    fn handle<'a>(
        &'a self,
        request: &'a Ping,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Pong, DispatchError>> {
        Box::pin(async move {
            Ok(Pong {
                id: request.id,
                reply: format!("{} Pong", request.message),
            })
        })
    }
}

pub struct CreateOrderHandler;

impl RequestHandler<CreateOrder> for CreateOrderHandler {
    fn handle<'a>(
        &'a self,
        request: &'a CreateOrder,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<OrderConfirmation, DispatchError>> {
        Box::pin(async move {
            let total_cents = request
                .items
                .iter()
                .map(|item| u64::from(item.quantity) * item.unit_cents)
                .sum();
            Ok(OrderConfirmation {
                order_id: Uuid::new_v4(),
                total_cents,
            })
        })
    }
}

/// Counts up from `start`, pausing between items. Stops early when the
/// caller cancels.
pub struct CounterHandler;

impl StreamHandler<Counter> for CounterHandler {
    fn handle(&self, request: Arc<Counter>, cancel: CancellationToken) -> ItemStream<u64> {
        let interval = Duration::from_millis(request.interval_ms);
        stream::unfold(0u64, move |produced| {
            let request = Arc::clone(&request);
            let cancel = cancel.clone();
            async move {
                if produced >= request.count {
                    return None;
                }
                if produced > 0 {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                Some((Ok(request.start + produced), produced + 1))
            }
        })
        .boxed()
    }
}

/// Stock reservations made for placed orders.
#[derive(Default)]
pub struct Inventory {
    reserved: AtomicU64,
}

impl Inventory {
    pub fn reserved(&self) -> u64 {
        self.reserved.load(Ordering::Relaxed)
    }
}

pub struct InventoryHandler(pub Arc<Inventory>);

impl NotificationHandler<OrderPlaced> for InventoryHandler {
    fn handle<'a>(
        &'a self,
        notification: &'a OrderPlaced,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            let total = self.0.reserved.fetch_add(1, Ordering::Relaxed) + 1;
            info!(order = %notification.order_id, reserved = total, "stock reserved");
            Ok(())
        })
    }
}

/// Sends the confirmation mail. Customers without a mailbox fail delivery.
pub struct EmailHandler;

impl NotificationHandler<OrderPlaced> for EmailHandler {
    fn handle<'a>(
        &'a self,
        notification: &'a OrderPlaced,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            if !notification.customer.contains('@') {
                return Err(DispatchError::handler(format!(
                    "no mailbox for customer {}",
                    notification.customer
                )));
            }
            info!(order = %notification.order_id, to = %notification.customer, "confirmation sent");
            Ok(())
        })
    }
}

/// Observes every auditable notification.
pub struct AuditTrail;

impl DynNotificationHandler for AuditTrail {
    fn name(&self) -> &'static str {
        "audit_trail"
    }

    fn handle<'a>(
        &'a self,
        notification: &'a dyn AnyMessage,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            info!(notification = ?notification, "audit");
            Ok(())
        })
    }
}

pub struct ErrorLog;

impl NotificationHandler<ErrorObserved> for ErrorLog {
    fn handle<'a>(
        &'a self,
        notification: &'a ErrorObserved,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            warn!(request = notification.request, error = %notification.error, "request failed");
            Ok(())
        })
    }
}

/// Catch-all collector counting every published notification.
#[derive(Default)]
pub struct Statistics {
    total: AtomicU64,
    by_type: Mutex<BTreeMap<&'static str, u64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    pub total: u64,
    pub by_type: BTreeMap<&'static str, u64>,
}

impl Statistics {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            total: self.total.load(Ordering::SeqCst),
            by_type: self
                .by_type
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

pub struct StatisticsHandler(pub Arc<Statistics>);

impl DynNotificationHandler for StatisticsHandler {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn handle<'a>(
        &'a self,
        notification: &'a dyn AnyMessage,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            self.0.total.fetch_add(1, Ordering::SeqCst);
            let name = short_name(notification.type_name());
            *self
                .0
                .by_type
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(name)
                .or_default() += 1;
            Ok(())
        })
    }
}

fn short_name(type_name: &'static str) -> &'static str {
    type_name.rsplit("::").next().unwrap_or(type_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::LineItem;

    #[tokio::test]
    async fn order_total_sums_line_items() {
        let order = CreateOrder {
            customer: "ada@example.com".into(),
            items: vec![LineItem::new("tea", 2, 350), LineItem::new("cup", 1, 1200)],
        };
        let confirmation = CreateOrderHandler
            .handle(&order, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(confirmation.total_cents, 1900);
    }

    #[tokio::test(start_paused = true)]
    async fn counter_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        let request = Arc::new(Counter {
            start: 10,
            count: 100,
            interval_ms: 50,
        });
        let mut items = CounterHandler.handle(request, cancel.clone());

        assert_eq!(items.next().await.unwrap().unwrap(), 10);
        assert_eq!(items.next().await.unwrap().unwrap(), 11);
        cancel.cancel();
        assert!(items.next().await.is_none());
    }

    #[tokio::test]
    async fn statistics_count_by_short_type_name() {
        let stats = Arc::new(Statistics::default());
        let handler = StatisticsHandler(stats.clone());
        let cancel = CancellationToken::new();
        let observed = ErrorObserved {
            request: "Ping",
            error: "boom".into(),
        };
        handler.handle(&observed, &cancel).await.unwrap();
        handler.handle(&observed, &cancel).await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.by_type.get("ErrorObserved"), Some(&2));
    }

    #[tokio::test]
    async fn email_requires_a_mailbox() {
        let placed = OrderPlaced {
            order_id: Uuid::new_v4(),
            customer: "walk-in".into(),
            total_cents: 0,
        };
        let err = EmailHandler
            .handle(&placed, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("walk-in"));
    }
}
