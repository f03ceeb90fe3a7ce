use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::stream::{self, StreamExt};
use herald_message::{AnyMessage, DispatchError, Request, StreamRequest};
use tokio_util::sync::CancellationToken;

use crate::handler::{
    box_item, downcast_item, downcast_response, downcast_shared, failed_stream, mismatch,
    AnyItem, AnyResponse, DynRequestHandler, DynStreamHandler, ItemStream,
};

/// Interceptor wrapping the handler of one request type.
///
/// A behavior either returns without calling `next` (short-circuit) or awaits
/// `next.run()` and may inspect or replace its result before returning.
pub trait PipelineBehavior<R: Request>: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        request: &'a R,
        cancel: &'a CancellationToken,
        next: RequestNext<'a, R>,
    ) -> BoxFuture<'a, Result<R::Response, DispatchError>>;
}

/// Interceptor applicable to any request type, optionally restricted to the
/// request types declaring a capability.
pub trait GenericBehavior: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    fn handle<'a>(
        &'a self,
        request: &'a dyn AnyMessage,
        cancel: &'a CancellationToken,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<AnyResponse, DispatchError>>;
}

/// The rest of a request pipeline, seen from inside one stage.
///
/// Stages are walked by position over a slice, so the chain length is a
/// property of the pipeline data rather than of nested closures.
pub struct Next<'a> {
    stages: &'a [Arc<dyn GenericBehavior>],
    handler: &'a dyn DynRequestHandler,
    request: &'a dyn AnyMessage,
    cancel: &'a CancellationToken,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        stages: &'a [Arc<dyn GenericBehavior>],
        handler: &'a dyn DynRequestHandler,
        request: &'a dyn AnyMessage,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            stages,
            handler,
            request,
            cancel,
        }
    }

    /// Stages still ahead, the terminal handler included.
    pub fn remaining(&self) -> usize {
        self.stages.len() + 1
    }

    /// Invoke the next stage, or the handler once all behaviors have run.
    ///
    /// Returns [`DispatchError::Cancelled`] without invoking anything when
    /// the dispatch has been cancelled.
    pub fn run(self) -> BoxFuture<'a, Result<AnyResponse, DispatchError>> {
        if self.cancel.is_cancelled() {
            return Box::pin(future::ready(Err(DispatchError::Cancelled)));
        }
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    ..self
                };
                stage.handle(self.request, self.cancel, next)
            }
            None => self.handler.handle(self.request, self.cancel),
        }
    }
}

/// Typed view of [`Next`] handed to a [`PipelineBehavior`].
pub struct RequestNext<'a, R> {
    inner: Next<'a>,
    _request: PhantomData<fn() -> R>,
}

impl<'a, R: Request> RequestNext<'a, R> {
    fn new(inner: Next<'a>) -> Self {
        Self {
            inner,
            _request: PhantomData,
        }
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining()
    }

    pub fn run(self) -> BoxFuture<'a, Result<R::Response, DispatchError>> {
        Box::pin(async move { downcast_response::<R::Response>(self.inner.run().await?) })
    }
}

pub(crate) struct ClosedBehavior<R, B> {
    behavior: B,
    _request: PhantomData<fn(R)>,
}

impl<R, B> ClosedBehavior<R, B> {
    pub(crate) fn new(behavior: B) -> Self {
        Self {
            behavior,
            _request: PhantomData,
        }
    }
}

impl<R: Request, B: PipelineBehavior<R>> GenericBehavior for ClosedBehavior<R, B> {
    fn name(&self) -> &'static str {
        type_name::<B>()
    }

    fn handle<'a>(
        &'a self,
        request: &'a dyn AnyMessage,
        cancel: &'a CancellationToken,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<AnyResponse, DispatchError>> {
        Box::pin(async move {
            let typed = request.downcast_ref::<R>().ok_or_else(mismatch::<R>)?;
            let response = self
                .behavior
                .handle(typed, cancel, RequestNext::new(next))
                .await?;
            Ok(Box::new(response) as AnyResponse)
        })
    }
}

/// Interceptor wrapping the item stream of one stream request type.
pub trait StreamBehavior<R: StreamRequest>: Send + Sync + 'static {
    fn handle(
        &self,
        request: Arc<R>,
        cancel: CancellationToken,
        next: StreamNext<R>,
    ) -> ItemStream<R::Item>;
}

/// Stream interceptor applicable to any stream request type.
pub trait GenericStreamBehavior: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    fn handle(
        &self,
        request: Arc<dyn AnyMessage>,
        cancel: CancellationToken,
        next: AnyStreamNext,
    ) -> ItemStream<AnyItem>;
}

/// The rest of a stream pipeline. Owned, so a behavior may defer calling
/// [`AnyStreamNext::run`] until its own stream is first polled.
pub struct AnyStreamNext {
    stages: Arc<[Arc<dyn GenericStreamBehavior>]>,
    position: usize,
    handler: Arc<dyn DynStreamHandler>,
    request: Arc<dyn AnyMessage>,
    cancel: CancellationToken,
}

impl AnyStreamNext {
    pub(crate) fn new(
        stages: Arc<[Arc<dyn GenericStreamBehavior>]>,
        handler: Arc<dyn DynStreamHandler>,
        request: Arc<dyn AnyMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stages,
            position: 0,
            handler,
            request,
            cancel,
        }
    }

    pub fn remaining(&self) -> usize {
        self.stages.len() - self.position + 1
    }

    /// Open the inner stream. Yields nothing once the dispatch is cancelled.
    pub fn run(self) -> ItemStream<AnyItem> {
        if self.cancel.is_cancelled() {
            return stream::empty().boxed();
        }
        match self.stages.get(self.position).cloned() {
            Some(stage) => {
                let request = Arc::clone(&self.request);
                let cancel = self.cancel.clone();
                let next = Self {
                    position: self.position + 1,
                    ..self
                };
                stage.handle(request, cancel, next)
            }
            None => self.handler.handle(self.request, self.cancel),
        }
    }
}

/// Typed view of [`AnyStreamNext`] handed to a [`StreamBehavior`].
pub struct StreamNext<R> {
    inner: AnyStreamNext,
    _request: PhantomData<fn() -> R>,
}

impl<R: StreamRequest> StreamNext<R> {
    fn new(inner: AnyStreamNext) -> Self {
        Self {
            inner,
            _request: PhantomData,
        }
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining()
    }

    pub fn run(self) -> ItemStream<R::Item> {
        self.inner.run().map(downcast_item::<R::Item>).boxed()
    }
}

pub(crate) struct ClosedStreamBehavior<R, B> {
    behavior: B,
    _request: PhantomData<fn(R)>,
}

impl<R, B> ClosedStreamBehavior<R, B> {
    pub(crate) fn new(behavior: B) -> Self {
        Self {
            behavior,
            _request: PhantomData,
        }
    }
}

impl<R: StreamRequest, B: StreamBehavior<R>> GenericStreamBehavior for ClosedStreamBehavior<R, B> {
    fn name(&self) -> &'static str {
        type_name::<B>()
    }

    fn handle(
        &self,
        request: Arc<dyn AnyMessage>,
        cancel: CancellationToken,
        next: AnyStreamNext,
    ) -> ItemStream<AnyItem> {
        match downcast_shared::<R>(request) {
            Ok(typed) => self
                .behavior
                .handle(typed, cancel, StreamNext::new(next))
                .map(box_item::<R::Item>)
                .boxed(),
            Err(err) => failed_stream(err),
        }
    }
}
