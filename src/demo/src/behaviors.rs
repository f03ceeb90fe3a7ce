use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::stream::StreamExt;
use herald_core::{
    AnyItem, AnyMessage, AnyResponse, AnyStreamNext, CancellationToken, DispatchError,
    GenericBehavior, GenericStreamBehavior, ItemStream, Next, PipelineBehavior, RequestNext,
    WeakMediator,
};
use tracing::{debug, info, warn};

use crate::messages::{CreateOrder, ErrorObserved, OrderConfirmation};

/// Logs every request and publishes [`ErrorObserved`] for each fault before
/// handing the fault back to the caller unchanged.
pub struct LoggingBehavior {
    mediator: Arc<OnceLock<WeakMediator>>,
}

impl LoggingBehavior {
    /// `mediator` is filled in once the mediator owning this behavior exists.
    pub fn new(mediator: Arc<OnceLock<WeakMediator>>) -> Self {
        Self { mediator }
    }
}

impl GenericBehavior for LoggingBehavior {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn handle<'a>(
        &'a self,
        request: &'a dyn AnyMessage,
        cancel: &'a CancellationToken,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<AnyResponse, DispatchError>> {
        Box::pin(async move {
            debug!(request = ?request, "handling");
            let outcome = next.run().await;
            let observed = match &outcome {
                Ok(_) => {
                    debug!(request = request.type_name(), "handled");
                    None
                }
                Err(err) if err.is_cancelled() => {
                    debug!(request = request.type_name(), "cancelled");
                    None
                }
                Err(err) => Some(ErrorObserved {
                    request: request.type_name(),
                    error: err.to_string(),
                }),
            };
            if let Some(observed) = observed {
                match self.mediator.get().and_then(WeakMediator::upgrade) {
                    Some(mediator) => mediator.publish_with_cancel(observed, cancel).await,
                    None => warn!(request = observed.request, error = %observed.error, "request failed"),
                }
            }
            outcome
        })
    }
}

/// Measures how long the rest of the pipeline takes.
pub struct TimingBehavior;

impl GenericBehavior for TimingBehavior {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn handle<'a>(
        &'a self,
        request: &'a dyn AnyMessage,
        _cancel: &'a CancellationToken,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<AnyResponse, DispatchError>> {
        Box::pin(async move {
            let started = Instant::now();
            let outcome = next.run().await;
            debug!(
                request = request.type_name(),
                elapsed_us = started.elapsed().as_micros() as u64,
                ok = outcome.is_ok(),
                "timed"
            );
            outcome
        })
    }
}

/// Rejects orders that could not be fulfilled.
pub struct ValidateOrder;

impl PipelineBehavior<CreateOrder> for ValidateOrder {
    fn handle<'a>(
        &'a self,
        request: &'a CreateOrder,
        _cancel: &'a CancellationToken,
        next: RequestNext<'a, CreateOrder>,
    ) -> BoxFuture<'a, Result<OrderConfirmation, DispatchError>> {
        Box::pin(async move {
            if request.customer.trim().is_empty() {
                return Err(DispatchError::validation("customer is required"));
            }
            if request.items.is_empty() {
                return Err(DispatchError::validation("order has no items"));
            }
            if let Some(item) = request.items.iter().find(|item| item.quantity == 0) {
                return Err(DispatchError::validation(format!(
                    "quantity of {} must be positive",
                    item.sku
                )));
            }
            next.run().await
        })
    }
}

/// Logs when a stream opens and a running count as items pass through.
pub struct StreamLogging;

impl GenericStreamBehavior for StreamLogging {
    fn name(&self) -> &'static str {
        "stream_logging"
    }

    fn handle(
        &self,
        request: Arc<dyn AnyMessage>,
        _cancel: CancellationToken,
        next: AnyStreamNext,
    ) -> ItemStream<AnyItem> {
        let name = request.type_name();
        info!(request = name, "stream opened");
        let mut produced = 0usize;
        next.run()
            .inspect(move |_| {
                produced += 1;
                debug!(request = name, produced, "stream item");
            })
            .boxed()
    }
}
