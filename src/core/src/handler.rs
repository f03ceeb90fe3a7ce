use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use herald_message::{AnyMessage, DispatchError, Notification, Request, StreamRequest};
use tokio_util::sync::CancellationToken;

/// Type-erased response travelling through a request pipeline.
pub type AnyResponse = Box<dyn Any + Send>;

/// Type-erased item travelling through a stream pipeline.
pub type AnyItem = Box<dyn Any + Send>;

/// Lazily pulled sequence produced by a stream handler.
pub type ItemStream<T> = BoxStream<'static, Result<T, DispatchError>>;

/// Handles exactly one request type and produces its response.
///
/// Handlers are shared between concurrent dispatches. Any state they keep
/// must be safe to update from several calls at once.
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        request: &'a R,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<R::Response, DispatchError>>;
}

/// Observes one notification type.
pub trait NotificationHandler<N: Notification>: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        notification: &'a N,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>>;
}

/// Produces the item sequence for one stream request type.
///
/// The returned stream must not do work before it is polled: items are
/// produced as the consumer pulls them.
pub trait StreamHandler<R: StreamRequest>: Send + Sync + 'static {
    fn handle(&self, request: Arc<R>, cancel: CancellationToken) -> ItemStream<R::Item>;
}

/// Request handler operating on opaque messages.
pub trait DynRequestHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn handle<'a>(
        &'a self,
        request: &'a dyn AnyMessage,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<AnyResponse, DispatchError>>;
}

/// Notification handler operating on opaque messages.
///
/// Implement this directly for observers registered against a capability,
/// such as a collector that receives every notification.
pub trait DynNotificationHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    fn handle<'a>(
        &'a self,
        notification: &'a dyn AnyMessage,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>>;
}

/// Stream handler operating on opaque messages.
pub trait DynStreamHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn handle(&self, request: Arc<dyn AnyMessage>, cancel: CancellationToken) -> ItemStream<AnyItem>;
}

pub(crate) fn mismatch<T: ?Sized>() -> DispatchError {
    DispatchError::TypeMismatch {
        expected: type_name::<T>(),
    }
}

/// Unboxes a response produced by an erased pipeline.
pub(crate) fn downcast_response<T: Send + 'static>(value: AnyResponse) -> Result<T, DispatchError> {
    value.downcast::<T>().map(|b| *b).map_err(|_| mismatch::<T>())
}

pub(crate) fn downcast_item<T: Send + 'static>(
    item: Result<AnyItem, DispatchError>,
) -> Result<T, DispatchError> {
    item.and_then(downcast_response::<T>)
}

pub(crate) fn box_item<T: Send + 'static>(item: Result<T, DispatchError>) -> Result<AnyItem, DispatchError> {
    item.map(|value| Box::new(value) as AnyItem)
}

/// Recovers the concrete request from a shared opaque message.
pub(crate) fn downcast_shared<R: Send + Sync + 'static>(
    request: Arc<dyn AnyMessage>,
) -> Result<Arc<R>, DispatchError> {
    request.into_any_arc().downcast::<R>().map_err(|_| mismatch::<R>())
}

pub(crate) fn failed_stream<T: Send + 'static>(err: DispatchError) -> ItemStream<T> {
    stream::once(async move { Err(err) }).boxed()
}

pub(crate) struct RequestAdapter<R, H> {
    handler: H,
    _request: PhantomData<fn(R)>,
}

impl<R, H> RequestAdapter<R, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _request: PhantomData,
        }
    }
}

impl<R: Request, H: RequestHandler<R>> DynRequestHandler for RequestAdapter<R, H> {
    fn name(&self) -> &'static str {
        type_name::<H>()
    }

    fn handle<'a>(
        &'a self,
        request: &'a dyn AnyMessage,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<AnyResponse, DispatchError>> {
        Box::pin(async move {
            let request = request.downcast_ref::<R>().ok_or_else(mismatch::<R>)?;
            let response = self.handler.handle(request, cancel).await?;
            Ok(Box::new(response) as AnyResponse)
        })
    }
}

pub(crate) struct NotificationAdapter<N, H> {
    handler: H,
    _notification: PhantomData<fn(N)>,
}

impl<N, H> NotificationAdapter<N, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _notification: PhantomData,
        }
    }
}

impl<N: Notification, H: NotificationHandler<N>> DynNotificationHandler for NotificationAdapter<N, H> {
    fn name(&self) -> &'static str {
        type_name::<H>()
    }

    fn handle<'a>(
        &'a self,
        notification: &'a dyn AnyMessage,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            let notification = notification.downcast_ref::<N>().ok_or_else(mismatch::<N>)?;
            self.handler.handle(notification, cancel).await
        })
    }
}

pub(crate) struct StreamAdapter<R, H> {
    handler: H,
    _request: PhantomData<fn(R)>,
}

impl<R, H> StreamAdapter<R, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _request: PhantomData,
        }
    }
}

impl<R: StreamRequest, H: StreamHandler<R>> DynStreamHandler for StreamAdapter<R, H> {
    fn name(&self) -> &'static str {
        type_name::<H>()
    }

    fn handle(&self, request: Arc<dyn AnyMessage>, cancel: CancellationToken) -> ItemStream<AnyItem> {
        match downcast_shared::<R>(request) {
            Ok(request) => self.handler.handle(request, cancel).map(box_item::<R::Item>).boxed(),
            Err(err) => failed_stream(err),
        }
    }
}
