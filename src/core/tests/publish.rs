mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use herald_core::{
    AllNotifications, AnyMessage, CancellationToken, Capability, DispatchConfig, DispatchError,
    Dispatched, DynNotificationHandler, FaultPolicy, Mediator, Message, Notification,
    NotificationHandler, PublishError, PublishMode, Registry, RegistryBuilder,
    SequentialPublisher,
};

use common::{entries, init_tracing, record, Journal};

// ── Messages ─────────────────────────────────────────────────────────

struct Auditable;

#[derive(Debug, Clone)]
struct OrderPlaced {
    id: u32,
}

impl Message for OrderPlaced {
    fn capabilities() -> Vec<Capability> {
        vec![Capability::of::<Auditable>()]
    }
}

impl Notification for OrderPlaced {}

#[derive(Debug)]
struct Heartbeat;

impl Message for Heartbeat {}

impl Notification for Heartbeat {}

#[derive(Debug)]
struct Unobserved;

impl Message for Unobserved {}

impl Notification for Unobserved {}

// ── Handlers ─────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Mode {
    Ok,
    Fail,
    Panic,
}

struct Observer {
    label: &'static str,
    mode: Mode,
    journal: Journal,
    calls: Arc<AtomicUsize>,
}

impl Observer {
    fn new(label: &'static str, mode: Mode, journal: &Journal) -> Self {
        Self {
            label,
            mode,
            journal: journal.clone(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn observe(&self) -> Result<(), DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        record(&self.journal, self.label);
        match self.mode {
            Mode::Ok => Ok(()),
            Mode::Fail => Err(DispatchError::handler(format!("{} is down", self.label))),
            Mode::Panic => panic!("{} lost its mind", self.label),
        }
    }
}

impl NotificationHandler<OrderPlaced> for Observer {
    fn handle<'a>(
        &'a self,
        _notification: &'a OrderPlaced,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.observe()
        })
    }
}

impl DynNotificationHandler for Observer {
    fn name(&self) -> &'static str {
        self.label
    }

    fn handle<'a>(
        &'a self,
        _notification: &'a dyn AnyMessage,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move { self.observe() })
    }
}

/// Counts every notification it sees, by concrete type name.
#[derive(Default)]
struct Statistics {
    total: AtomicUsize,
    orders: AtomicUsize,
    order_ids: AtomicUsize,
}

struct StatisticsHandler(Arc<Statistics>);

impl DynNotificationHandler for StatisticsHandler {
    fn handle<'a>(
        &'a self,
        notification: &'a dyn AnyMessage,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            self.0.total.fetch_add(1, Ordering::SeqCst);
            if let Some(order) = notification.downcast_ref::<OrderPlaced>() {
                self.0.orders.fetch_add(1, Ordering::SeqCst);
                self.0.order_ids.fetch_add(order.id as usize, Ordering::SeqCst);
            }
            Ok(())
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn builder() -> RegistryBuilder {
    init_tracing();
    Registry::builder()
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn publish_reaches_every_handler_despite_faults() {
    let journal = Journal::default();
    let first = Observer::new("first", Mode::Ok, &journal);
    let broken = Observer::new("broken", Mode::Fail, &journal);
    let panicky = Observer::new("panicky", Mode::Panic, &journal);
    let last = Observer::new("last", Mode::Ok, &journal);
    let counters: Vec<_> = [&first, &broken, &panicky, &last]
        .iter()
        .map(|o| o.calls.clone())
        .collect();

    let mut builder = builder();
    builder.notification_handler::<OrderPlaced, _>(first);
    builder.notification_handler::<OrderPlaced, _>(broken);
    builder.notification_handler::<OrderPlaced, _>(panicky);
    builder.notification_handler::<OrderPlaced, _>(last);
    let mediator = Mediator::new(builder.build().unwrap());

    // returns unit: nothing for the caller to observe
    mediator.publish(OrderPlaced { id: 1 }).await;

    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
    assert_eq!(entries(&journal).len(), 4);
}

#[tokio::test]
async fn try_publish_aggregates_every_fault() {
    let journal = Journal::default();
    let mut builder = builder();
    builder.notification_handler::<OrderPlaced, _>(Observer::new("ok", Mode::Ok, &journal));
    builder.capability_handler::<Auditable, _>(Observer::new("audit", Mode::Fail, &journal));
    builder.capability_handler::<AllNotifications, _>(Observer::new("stats", Mode::Panic, &journal));
    let mediator = Mediator::new(builder.build().unwrap());

    let err = mediator
        .try_publish(OrderPlaced { id: 2 }, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PublishError::HandlersFailed {
            handlers, failures, ..
        } => {
            assert_eq!(handlers, 3);
            let names: Vec<_> = failures.iter().map(|f| f.handler).collect();
            assert_eq!(names, vec!["audit", "stats"]);
            assert!(matches!(failures[1].error, DispatchError::Panicked(_)));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn publishing_without_handlers_is_a_no_op() {
    let mut builder = builder();
    builder.declare_notification::<Unobserved>();
    let mediator = Mediator::new(builder.build().unwrap());

    mediator.publish(Unobserved).await;
    mediator
        .try_publish(Unobserved, &CancellationToken::new())
        .await
        .unwrap();

    let outcome = mediator
        .dispatch_dyn(Box::new(Unobserved), &CancellationToken::new())
        .await
        .unwrap();
    match outcome {
        Dispatched::Published(report) => {
            assert_eq!(report.handlers, 0);
            assert!(report.is_success());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn handlers_resolve_concrete_then_capability_then_catch_all() {
    let journal = Journal::default();
    let mut builder = builder();
    builder.capability_handler::<AllNotifications, _>(Observer::new("stats", Mode::Ok, &journal));
    builder.capability_handler::<Auditable, _>(Observer::new("audit", Mode::Ok, &journal));
    builder.notification_handler::<OrderPlaced, _>(Observer::new("ledger", Mode::Ok, &journal));
    builder.notification_handler::<OrderPlaced, _>(Observer::new("mailer", Mode::Ok, &journal));
    let mediator = Mediator::with_strategy(
        builder.build().unwrap(),
        SequentialPublisher::new(FaultPolicy::Continue),
    );

    mediator.publish(OrderPlaced { id: 3 }).await;
    assert_eq!(entries(&journal), vec!["ledger", "mailer", "audit", "stats"]);

    // a notification without capabilities only reaches the catch-all
    mediator.publish(Heartbeat).await;
    assert_eq!(entries(&journal).last().map(String::as_str), Some("stats"));
    assert_eq!(entries(&journal).len(), 5);
}

#[tokio::test]
async fn fail_fast_strategy_stops_at_first_fault() {
    let journal = Journal::default();
    let skipped = Observer::new("skipped", Mode::Ok, &journal);
    let skipped_calls = skipped.calls.clone();
    let mut builder = builder();
    builder.notification_handler::<OrderPlaced, _>(Observer::new("first", Mode::Ok, &journal));
    builder.notification_handler::<OrderPlaced, _>(Observer::new("broken", Mode::Fail, &journal));
    builder.notification_handler::<OrderPlaced, _>(skipped);
    let config = DispatchConfig {
        publish_strategy: PublishMode::SequentialFailFast,
        ..DispatchConfig::default()
    };
    let mediator = Mediator::from_config(builder.build().unwrap(), &config);
    assert_eq!(mediator.strategy_name(), "sequential_fail_fast");

    let err = mediator
        .try_publish(OrderPlaced { id: 4 }, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        format!("1 of 3 handlers for {} failed", std::any::type_name::<OrderPlaced>())
    );
    assert_eq!(entries(&journal), vec!["first", "broken"]);
    assert_eq!(skipped_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_publish_invokes_nothing_under_any_strategy() {
    for mode in [
        PublishMode::Concurrent,
        PublishMode::Sequential,
        PublishMode::SequentialFailFast,
    ] {
        let journal = Journal::default();
        let mut builder = builder();
        builder.notification_handler::<OrderPlaced, _>(Observer::new("ledger", Mode::Ok, &journal));
        builder.notification_handler::<OrderPlaced, _>(Observer::new("mailer", Mode::Ok, &journal));
        let mediator = Mediator::from_parts(Arc::new(builder.build().unwrap()), mode.strategy());
        let cancel = CancellationToken::new();
        cancel.cancel();

        mediator.publish_with_cancel(OrderPlaced { id: 5 }, &cancel).await;

        assert!(entries(&journal).is_empty(), "{mode:?} invoked handlers");
    }
}

#[tokio::test]
async fn opaque_publish_reaches_the_same_handlers() {
    let journal = Journal::default();
    let mut builder = builder();
    builder.notification_handler::<OrderPlaced, _>(Observer::new("ledger", Mode::Ok, &journal));
    builder.capability_handler::<Auditable, _>(Observer::new("audit", Mode::Ok, &journal));
    let mediator = Mediator::with_strategy(builder.build().unwrap(), SequentialPublisher::default());

    mediator.publish(OrderPlaced { id: 6 }).await;
    let typed = entries(&journal);
    mediator.publish_dyn(Box::new(OrderPlaced { id: 6 })).await;
    let all = entries(&journal);

    assert_eq!(typed, vec!["ledger", "audit"]);
    assert_eq!(&all[2..], &typed[..]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn catch_all_statistics_survive_concurrent_fan_out() {
    let stats = Arc::new(Statistics::default());
    let journal = Journal::default();
    let mut builder = builder();
    builder.notification_handler::<OrderPlaced, _>(Observer::new("ledger", Mode::Ok, &journal));
    builder.declare_notification::<Heartbeat>();
    builder.capability_handler::<AllNotifications, _>(StatisticsHandler(stats.clone()));
    builder.capability_handler::<AllNotifications, _>(StatisticsHandler(stats.clone()));
    let mediator = Mediator::new(builder.build().unwrap());

    let tasks: Vec<_> = (0..100)
        .map(|id| {
            let mediator = mediator.clone();
            tokio::spawn(async move {
                mediator.publish(OrderPlaced { id }).await;
                mediator.publish_dyn(Box::new(Heartbeat)).await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    // two collectors, two notifications per task
    assert_eq!(stats.total.load(Ordering::SeqCst), 400);
    assert_eq!(stats.orders.load(Ordering::SeqCst), 200);
    // every order id seen once per collector
    assert_eq!(stats.order_ids.load(Ordering::SeqCst), 2 * (0..100).sum::<usize>());
    assert_eq!(entries(&journal).len(), 100);
}

#[tokio::test]
async fn undeclared_capability_only_notification_is_unknown_to_dispatch_dyn() {
    let stats = Arc::new(Statistics::default());
    let mut builder = builder();
    builder.capability_handler::<AllNotifications, _>(StatisticsHandler(stats.clone()));
    let mediator = Mediator::new(builder.build().unwrap());

    // typed and opaque publish still reach the catch-all
    mediator.publish(Heartbeat).await;
    mediator.publish_dyn(Box::new(Heartbeat)).await;
    assert_eq!(stats.total.load(Ordering::SeqCst), 2);

    let err = mediator
        .dispatch_dyn(Box::new(Heartbeat), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnknownMessageType { .. }));
}
