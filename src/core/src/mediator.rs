use std::fmt;
use std::sync::{Arc, Weak};

use futures::stream::StreamExt;
use herald_message::{AnyMessage, DispatchError, MessageKind, MessageType, Notification, Request, StreamRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::config::DispatchConfig;
use crate::handler::{downcast_item, downcast_response, AnyItem, AnyResponse, ItemStream};
use crate::pipeline::PipelineComposer;
use crate::publish::{ConcurrentPublisher, PublishError, PublishReport, PublishStrategy};
use crate::registry::HandlerLookup;

/// Outcome of [`Mediator::dispatch_dyn`], one variant per message kind.
pub enum Dispatched {
    Response(AnyResponse),
    Published(PublishReport),
    Stream(ItemStream<AnyItem>),
}

impl Dispatched {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Response(_) => MessageKind::Request,
            Self::Published(_) => MessageKind::Notification,
            Self::Stream(_) => MessageKind::Stream,
        }
    }
}

impl fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(_) => f.write_str("Dispatched::Response(..)"),
            Self::Published(report) => f.debug_tuple("Dispatched::Published").field(report).finish(),
            Self::Stream(_) => f.write_str("Dispatched::Stream(..)"),
        }
    }
}

struct Inner {
    lookup: Arc<dyn HandlerLookup>,
    strategy: Arc<dyn PublishStrategy>,
    composer: PipelineComposer,
}

/// Entry point routing requests, notifications and stream requests to the
/// handlers a [`HandlerLookup`] resolves.
///
/// Statically typed and opaque call sites share one code path: both look the
/// message up by its concrete `TypeId` and run the same cached pipeline, so
/// they see the same stages in the same order and the same faults.
///
/// Cloning is cheap; clones share the lookup, the publish strategy and the
/// pipeline caches.
#[derive(Clone)]
pub struct Mediator {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`Mediator`], for handlers and behaviors that
/// dispatch through the mediator they are registered with.
#[derive(Clone)]
pub struct WeakMediator {
    inner: Weak<Inner>,
}

impl WeakMediator {
    /// `None` once every [`Mediator`] clone has been dropped.
    pub fn upgrade(&self) -> Option<Mediator> {
        self.inner.upgrade().map(|inner| Mediator { inner })
    }
}

impl fmt::Debug for WeakMediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakMediator")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Mediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mediator")
            .field("strategy", &self.inner.strategy.name())
            .field("cached_pipelines", &self.inner.composer.cached())
            .finish_non_exhaustive()
    }
}

impl Mediator {
    /// Mediator publishing with [`ConcurrentPublisher`].
    pub fn new(lookup: impl HandlerLookup) -> Self {
        Self::with_strategy(lookup, ConcurrentPublisher)
    }

    pub fn with_strategy(lookup: impl HandlerLookup, strategy: impl PublishStrategy) -> Self {
        Self::from_parts(Arc::new(lookup), Arc::new(strategy))
    }

    pub fn from_config(lookup: impl HandlerLookup, config: &DispatchConfig) -> Self {
        Self::from_parts(Arc::new(lookup), config.publish_strategy.strategy())
    }

    pub fn from_parts(lookup: Arc<dyn HandlerLookup>, strategy: Arc<dyn PublishStrategy>) -> Self {
        debug!(strategy = strategy.name(), "mediator created");
        Self {
            inner: Arc::new(Inner {
                lookup,
                strategy,
                composer: PipelineComposer::default(),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakMediator {
        WeakMediator {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn lookup(&self) -> &dyn HandlerLookup {
        self.inner.lookup.as_ref()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.inner.strategy.name()
    }

    pub async fn send<R: Request>(&self, request: R) -> Result<R::Response, DispatchError> {
        self.send_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run `request` through its pipeline and return the handler's response,
    /// or the first fault raised on the way.
    pub async fn send_with_cancel<R: Request>(
        &self,
        request: R,
        cancel: &CancellationToken,
    ) -> Result<R::Response, DispatchError> {
        let response = self.invoke(&request, cancel).await?;
        downcast_response::<R::Response>(response)
    }

    pub async fn send_dyn(&self, request: Box<dyn AnyMessage>) -> Result<AnyResponse, DispatchError> {
        self.send_dyn_with_cancel(request, &CancellationToken::new()).await
    }

    /// Opaque counterpart of [`Mediator::send_with_cancel`]. The response is
    /// returned boxed and can be downcast to the request's response type.
    pub async fn send_dyn_with_cancel(
        &self,
        request: Box<dyn AnyMessage>,
        cancel: &CancellationToken,
    ) -> Result<AnyResponse, DispatchError> {
        self.invoke(request.as_ref(), cancel).await
    }

    async fn invoke(
        &self,
        request: &dyn AnyMessage,
        cancel: &CancellationToken,
    ) -> Result<AnyResponse, DispatchError> {
        let pipeline = self
            .inner
            .composer
            .request(self.lookup(), request.concrete_type_id(), || request.message_type())
            .inspect_err(|err| {
                warn!(request = request.type_name(), error = %err, "request not dispatchable")
            })?;
        let span = debug_span!("send", request = pipeline.message_type(), stages = pipeline.len());
        pipeline.invoke(request, cancel).instrument(span).await
    }

    /// Deliver `notification` to every handler observing it. Handler faults
    /// are logged and never returned.
    pub async fn publish<N: Notification>(&self, notification: N) {
        self.publish_with_cancel(notification, &CancellationToken::new())
            .await
    }

    pub async fn publish_with_cancel<N: Notification>(&self, notification: N, cancel: &CancellationToken) {
        self.publish_shared(Arc::new(notification), cancel).await
    }

    pub async fn publish_dyn(&self, notification: Box<dyn AnyMessage>) {
        self.publish_dyn_with_cancel(notification, &CancellationToken::new())
            .await
    }

    pub async fn publish_dyn_with_cancel(&self, notification: Box<dyn AnyMessage>, cancel: &CancellationToken) {
        self.publish_shared(Arc::from(notification), cancel).await
    }

    /// Like [`Mediator::publish_with_cancel`], but returns the aggregated
    /// handler faults instead of only logging them.
    pub async fn try_publish<N: Notification>(
        &self,
        notification: N,
        cancel: &CancellationToken,
    ) -> Result<(), PublishError> {
        let report = self.deliver(Arc::new(notification), cancel).await?;
        log_failures(&report);
        report.into_result()
    }

    async fn publish_shared(&self, notification: Arc<dyn AnyMessage>, cancel: &CancellationToken) {
        let name = notification.type_name();
        match self.deliver(notification, cancel).await {
            Ok(report) => log_failures(&report),
            Err(err) => warn!(notification = name, error = %err, "notification not published"),
        }
    }

    async fn deliver(
        &self,
        notification: Arc<dyn AnyMessage>,
        cancel: &CancellationToken,
    ) -> Result<PublishReport, DispatchError> {
        let route = self.inner.composer.route(
            self.lookup(),
            notification.concrete_type_id(),
            || notification.message_type(),
        )?;
        let handlers = route.handlers();
        if handlers.is_empty() {
            trace!(notification = route.message_type(), "no handlers");
            return Ok(PublishReport {
                message_type: route.message_type(),
                handlers: 0,
                failures: Vec::new(),
            });
        }

        let span = debug_span!(
            "publish",
            notification = route.message_type(),
            handlers = handlers.len(),
            strategy = self.inner.strategy.name()
        );
        let failures = self
            .inner
            .strategy
            .publish(handlers, notification, cancel)
            .instrument(span)
            .await;
        Ok(PublishReport {
            message_type: route.message_type(),
            handlers: handlers.len(),
            failures,
        })
    }

    pub fn create_stream<R: StreamRequest>(&self, request: R) -> Result<ItemStream<R::Item>, DispatchError> {
        self.create_stream_with_cancel(request, CancellationToken::new())
    }

    /// Resolve the stream pipeline of `request` and return its item stream.
    ///
    /// Nothing runs until the stream is polled. Once `cancel` fires the
    /// stream ends without yielding further items.
    pub fn create_stream_with_cancel<R: StreamRequest>(
        &self,
        request: R,
        cancel: CancellationToken,
    ) -> Result<ItemStream<R::Item>, DispatchError> {
        let items = self.open(Arc::new(request), cancel)?;
        Ok(items.map(downcast_item::<R::Item>).boxed())
    }

    pub fn create_stream_dyn(&self, request: Box<dyn AnyMessage>) -> Result<ItemStream<AnyItem>, DispatchError> {
        self.create_stream_dyn_with_cancel(request, CancellationToken::new())
    }

    pub fn create_stream_dyn_with_cancel(
        &self,
        request: Box<dyn AnyMessage>,
        cancel: CancellationToken,
    ) -> Result<ItemStream<AnyItem>, DispatchError> {
        self.open(Arc::from(request), cancel)
    }

    fn open(&self, request: Arc<dyn AnyMessage>, cancel: CancellationToken) -> Result<ItemStream<AnyItem>, DispatchError> {
        let pipeline = self
            .inner
            .composer
            .stream(self.lookup(), request.concrete_type_id(), || request.message_type())
            .inspect_err(|err| {
                warn!(request = request.type_name(), error = %err, "stream request not dispatchable")
            })?;
        debug!(request = pipeline.message_type(), stages = pipeline.len(), "stream opened");
        Ok(pipeline.open(request, cancel))
    }

    /// Dispatch a message whose kind is only known from its registration.
    ///
    /// Types the lookup has never seen fault with
    /// [`DispatchError::UnknownMessageType`]; notifications observed only by
    /// capability handlers need [`crate::RegistryBuilder::declare_notification`].
    pub async fn dispatch_dyn(
        &self,
        message: Box<dyn AnyMessage>,
        cancel: &CancellationToken,
    ) -> Result<Dispatched, DispatchError> {
        match self.lookup().kind_of(message.concrete_type_id()) {
            Some(MessageKind::Request) => self
                .send_dyn_with_cancel(message, cancel)
                .await
                .map(Dispatched::Response),
            Some(MessageKind::Notification) => {
                let report = self.deliver(Arc::from(message), cancel).await?;
                log_failures(&report);
                Ok(Dispatched::Published(report))
            }
            Some(MessageKind::Stream) => self
                .create_stream_dyn_with_cancel(message, cancel.clone())
                .map(Dispatched::Stream),
            None => Err(DispatchError::UnknownMessageType {
                message_type: message.type_name(),
            }),
        }
    }

    /// Names of the stages a request of type `R` runs through, outermost
    /// behavior first and handler last.
    pub fn pipeline_stages<R: Request>(&self) -> Result<Vec<&'static str>, DispatchError> {
        let message_type = MessageType::of::<R>();
        let pipeline = self
            .inner
            .composer
            .request(self.lookup(), message_type.id(), || message_type)?;
        Ok(pipeline.stages())
    }

    pub fn stream_stages<R: StreamRequest>(&self) -> Result<Vec<&'static str>, DispatchError> {
        let message_type = MessageType::of::<R>();
        let pipeline = self
            .inner
            .composer
            .stream(self.lookup(), message_type.id(), || message_type)?;
        Ok(pipeline.stages())
    }

    /// Number of composed pipelines and notification routes cached so far.
    pub fn cached_pipelines(&self) -> usize {
        self.inner.composer.cached()
    }
}

fn log_failures(report: &PublishReport) {
    for failure in &report.failures {
        if failure.error.is_cancelled() {
            debug!(
                notification = report.message_type,
                handler = failure.handler,
                "notification handler cancelled"
            );
            continue;
        }
        warn!(
            notification = report.message_type,
            handler = failure.handler,
            error = %failure.error,
            "notification handler failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;
    use herald_message::Message;

    use super::*;
    use crate::handler::RequestHandler;
    use crate::registry::Registry;

    #[derive(Debug)]
    struct Lookup(u32);

    impl Message for Lookup {}

    impl Request for Lookup {
        type Response = u32;
    }

    #[derive(Debug)]
    struct Orphan;

    impl Message for Orphan {}

    impl Request for Orphan {
        type Response = ();
    }

    struct Plus;

    impl RequestHandler<Lookup> for Plus {
        fn handle<'a>(
            &'a self,
            request: &'a Lookup,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<u32, DispatchError>> {
            Box::pin(async move { Ok(request.0 + 1) })
        }
    }

    fn mediator() -> Mediator {
        let mut builder = Registry::builder();
        builder.request_handler::<Lookup, _>(Plus);
        Mediator::new(builder.build().unwrap())
    }

    #[tokio::test]
    async fn composes_each_pipeline_once() {
        let mediator = mediator();
        assert_eq!(mediator.send(Lookup(1)).await.unwrap(), 2);
        assert_eq!(mediator.send(Lookup(2)).await.unwrap(), 3);
        assert_eq!(mediator.cached_pipelines(), 1);
    }

    #[tokio::test]
    async fn configuration_faults_are_not_cached() {
        let mediator = mediator();
        for _ in 0..2 {
            let err = mediator.send(Orphan).await.unwrap_err();
            assert!(matches!(err, DispatchError::NoHandler { .. }));
        }
        assert_eq!(mediator.cached_pipelines(), 0);
    }

    #[tokio::test]
    async fn unknown_opaque_message_is_rejected() {
        let mediator = mediator();
        let err = mediator
            .dispatch_dyn(Box::new(Orphan), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownMessageType { .. }));
    }

    #[test]
    fn clones_share_state() {
        let mediator = mediator();
        let stages = mediator.clone().pipeline_stages::<Lookup>().unwrap();
        assert_eq!(stages.len(), 1);
        assert!(stages[0].ends_with("Plus"));
        assert_eq!(mediator.cached_pipelines(), 1);
        assert_eq!(mediator.strategy_name(), "concurrent");
    }

    #[test]
    fn weak_handle_does_not_keep_mediator_alive() {
        let mediator = mediator();
        let weak = mediator.downgrade();
        assert!(weak.upgrade().is_some());
        drop(mediator);
        assert!(weak.upgrade().is_none());
    }
}
