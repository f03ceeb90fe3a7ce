use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use herald_message::{AnyMessage, DispatchError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{panic_message, HandlerFailure, PublishStrategy};
use crate::handler::DynNotificationHandler;

/// What a sequential publisher does after a handler faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    #[default]
    Continue,
    StopOnFirst,
}

/// Runs handlers one at a time in resolution order.
///
/// Stops before the next handler once the dispatch is cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialPublisher {
    policy: FaultPolicy,
}

impl SequentialPublisher {
    pub fn new(policy: FaultPolicy) -> Self {
        Self { policy }
    }
}

impl PublishStrategy for SequentialPublisher {
    fn name(&self) -> &'static str {
        match self.policy {
            FaultPolicy::Continue => "sequential",
            FaultPolicy::StopOnFirst => "sequential_fail_fast",
        }
    }

    fn publish<'a>(
        &'a self,
        handlers: &'a [Arc<dyn DynNotificationHandler>],
        notification: Arc<dyn AnyMessage>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Vec<HandlerFailure>> {
        Box::pin(async move {
            let mut failures = Vec::new();
            for (index, handler) in handlers.iter().enumerate() {
                if cancel.is_cancelled() {
                    debug!(skipped = handlers.len() - index, "publish cancelled");
                    break;
                }
                let outcome = AssertUnwindSafe(handler.handle(&*notification, cancel))
                    .catch_unwind()
                    .await;
                let error = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(error)) => error,
                    Err(payload) => DispatchError::Panicked(panic_message(payload)),
                };
                let stop = self.policy == FaultPolicy::StopOnFirst && !error.is_cancelled();
                failures.push(HandlerFailure::new(handler.name(), error));
                if stop {
                    debug!(
                        skipped = handlers.len() - index - 1,
                        "publish stopped at first fault"
                    );
                    break;
                }
            }
            failures
        })
    }
}
