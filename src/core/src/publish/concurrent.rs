use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use herald_message::{AnyMessage, DispatchError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{panic_message, HandlerFailure, PublishStrategy};
use crate::handler::DynNotificationHandler;

/// Spawns every handler as its own task and waits for all of them.
///
/// A failing or panicking handler never cuts its siblings short; its fault
/// is collected once every task has finished. Nothing is spawned once the
/// dispatch is cancelled. Requires a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrentPublisher;

impl PublishStrategy for ConcurrentPublisher {
    fn name(&self) -> &'static str {
        "concurrent"
    }

    fn publish<'a>(
        &'a self,
        handlers: &'a [Arc<dyn DynNotificationHandler>],
        notification: Arc<dyn AnyMessage>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Vec<HandlerFailure>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                debug!(skipped = handlers.len(), "publish cancelled");
                return Vec::new();
            }
            let tasks: Vec<_> = handlers
                .iter()
                .map(|handler| {
                    let handler = Arc::clone(handler);
                    let notification = Arc::clone(&notification);
                    let cancel = cancel.clone();
                    tokio::spawn(async move { handler.handle(&*notification, &cancel).await })
                })
                .collect();

            let outcomes = join_all(tasks).await;

            handlers
                .iter()
                .zip(outcomes)
                .filter_map(|(handler, outcome)| {
                    let error = match outcome {
                        Ok(Ok(())) => return None,
                        Ok(Err(error)) => error,
                        Err(join) if join.is_panic() => {
                            DispatchError::Panicked(panic_message(join.into_panic()))
                        }
                        Err(_) => DispatchError::Cancelled,
                    };
                    Some(HandlerFailure::new(handler.name(), error))
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::publish::testing::{Journal, Outcome, Probe, Tick};

    #[tokio::test]
    async fn runs_every_handler_even_when_some_fail() {
        let journal = Journal::default();
        let probes = [
            Probe::new("first", Outcome::Ok, &journal),
            Probe::new("broken", Outcome::Fail, &journal),
            Probe::new("panicky", Outcome::Panic, &journal),
            Probe::new("last", Outcome::Ok, &journal),
        ];
        let counters: Vec<_> = probes.iter().map(|p| p.calls.clone()).collect();
        let handlers: Vec<Arc<dyn DynNotificationHandler>> = probes
            .into_iter()
            .map(|p| Arc::new(p) as Arc<dyn DynNotificationHandler>)
            .collect();

        let failures = ConcurrentPublisher
            .publish(&handlers, Arc::new(Tick), &CancellationToken::new())
            .await;

        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
        let failed: Vec<_> = failures.iter().map(|f| f.handler).collect();
        assert_eq!(failed, vec!["broken", "panicky"]);
        assert!(matches!(failures[1].error, DispatchError::Panicked(ref msg) if msg == "panicky panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_overlap_in_time() {
        let journal = Journal::default();
        let handlers: Vec<Arc<dyn DynNotificationHandler>> = vec![
            Arc::new(Probe::new("slow", Outcome::Ok, &journal).delayed(100)),
            Arc::new(Probe::new("fast", Outcome::Ok, &journal).delayed(10)),
        ];

        let started = tokio::time::Instant::now();
        let failures = ConcurrentPublisher
            .publish(&handlers, Arc::new(Tick), &CancellationToken::new())
            .await;

        assert!(failures.is_empty());
        assert!(started.elapsed() < Duration::from_millis(110));
        assert_eq!(*journal.lock().unwrap(), vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn cancelled_publish_spawns_nothing() {
        let journal = Journal::default();
        let probes = [
            Probe::new("first", Outcome::Ok, &journal),
            Probe::new("second", Outcome::Ok, &journal),
        ];
        let counters: Vec<_> = probes.iter().map(|p| p.calls.clone()).collect();
        let handlers: Vec<Arc<dyn DynNotificationHandler>> = probes
            .into_iter()
            .map(|p| Arc::new(p) as Arc<dyn DynNotificationHandler>)
            .collect();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failures = ConcurrentPublisher
            .publish(&handlers, Arc::new(Tick), &cancel)
            .await;
        tokio::task::yield_now().await;

        assert!(failures.is_empty());
        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 0));
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_handler_set_is_a_no_op() {
        let failures = ConcurrentPublisher
            .publish(&[], Arc::new(Tick), &CancellationToken::new())
            .await;
        assert!(failures.is_empty());
    }
}
