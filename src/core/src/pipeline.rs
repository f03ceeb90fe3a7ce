use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use futures::stream::StreamExt;
use herald_message::{AnyMessage, DispatchError, MessageKind, MessageType};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::behavior::{AnyStreamNext, GenericBehavior, GenericStreamBehavior, Next};
use crate::handler::{AnyItem, AnyResponse, DynNotificationHandler, DynRequestHandler, DynStreamHandler, ItemStream};
use crate::registry::HandlerLookup;

/// Behaviors of one request type, in order, wrapped around its handler.
pub(crate) struct RequestPipeline {
    message_type: &'static str,
    behaviors: Vec<Arc<dyn GenericBehavior>>,
    handler: Arc<dyn DynRequestHandler>,
}

impl RequestPipeline {
    pub(crate) fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub(crate) fn len(&self) -> usize {
        self.behaviors.len() + 1
    }

    pub(crate) fn invoke<'a>(
        &'a self,
        request: &'a dyn AnyMessage,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<AnyResponse, DispatchError>> {
        Next::new(&self.behaviors, self.handler.as_ref(), request, cancel).run()
    }

    /// Stage names from outermost behavior to handler.
    pub(crate) fn stages(&self) -> Vec<&'static str> {
        self.behaviors
            .iter()
            .map(|behavior| behavior.name())
            .chain(std::iter::once(self.handler.name()))
            .collect()
    }
}

/// Stream behaviors of one stream request type wrapped around its handler.
pub(crate) struct StreamPipeline {
    message_type: &'static str,
    behaviors: Arc<[Arc<dyn GenericStreamBehavior>]>,
    handler: Arc<dyn DynStreamHandler>,
}

impl StreamPipeline {
    pub(crate) fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub(crate) fn len(&self) -> usize {
        self.behaviors.len() + 1
    }

    /// Compose a fresh item stream. It ends as soon as `cancel` fires, even
    /// while an item is being produced.
    pub(crate) fn open(&self, request: Arc<dyn AnyMessage>, cancel: CancellationToken) -> ItemStream<AnyItem> {
        let stop = cancel.clone().cancelled_owned();
        AnyStreamNext::new(Arc::clone(&self.behaviors), Arc::clone(&self.handler), request, cancel)
            .run()
            .take_until(stop)
            .boxed()
    }

    pub(crate) fn stages(&self) -> Vec<&'static str> {
        self.behaviors
            .iter()
            .map(|behavior| behavior.name())
            .chain(std::iter::once(self.handler.name()))
            .collect()
    }
}

/// Resolved observers of one notification type.
pub(crate) struct NotificationRoute {
    message_type: &'static str,
    handlers: Vec<Arc<dyn DynNotificationHandler>>,
}

impl NotificationRoute {
    pub(crate) fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub(crate) fn handlers(&self) -> &[Arc<dyn DynNotificationHandler>] {
        &self.handlers
    }
}

/// Memoizes composed values by message type.
///
/// Concurrent first use may build a value more than once; the first one
/// stored wins and every caller gets that one. Build failures are not stored.
pub(crate) struct PipelineCache<T> {
    entries: RwLock<HashMap<TypeId, Arc<T>>>,
}

impl<T> Default for PipelineCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> PipelineCache<T> {
    pub(crate) fn get_or_try_insert(
        &self,
        key: TypeId,
        build: impl FnOnce() -> Result<T, DispatchError>,
    ) -> Result<Arc<T>, DispatchError> {
        if let Some(hit) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(hit));
        }

        let built = Arc::new(build()?);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(entries.entry(key).or_insert(built)))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn expect_kind(
    lookup: &dyn HandlerLookup,
    message_type: &MessageType,
    requested: MessageKind,
) -> Result<(), DispatchError> {
    match lookup.kind_of(message_type.id()) {
        Some(registered) if registered != requested => Err(DispatchError::KindMismatch {
            message_type: message_type.name(),
            registered,
            requested,
        }),
        _ => Ok(()),
    }
}

/// Builds and caches the composed pipeline of every dispatched type.
#[derive(Default)]
pub(crate) struct PipelineComposer {
    requests: PipelineCache<RequestPipeline>,
    streams: PipelineCache<StreamPipeline>,
    routes: PipelineCache<NotificationRoute>,
}

impl PipelineComposer {
    /// `describe` is only called when `id` has no cached pipeline yet.
    pub(crate) fn request(
        &self,
        lookup: &dyn HandlerLookup,
        id: TypeId,
        describe: impl FnOnce() -> MessageType,
    ) -> Result<Arc<RequestPipeline>, DispatchError> {
        self.requests.get_or_try_insert(id, || {
            let message_type = describe();
            expect_kind(lookup, &message_type, MessageKind::Request)?;
            let handler = lookup.resolve_request_handler(&message_type)?;
            let behaviors = lookup.resolve_behaviors(&message_type);
            trace!(
                request = message_type.name(),
                behaviors = behaviors.len(),
                "request pipeline composed"
            );
            Ok(RequestPipeline {
                message_type: message_type.name(),
                behaviors,
                handler,
            })
        })
    }

    pub(crate) fn stream(
        &self,
        lookup: &dyn HandlerLookup,
        id: TypeId,
        describe: impl FnOnce() -> MessageType,
    ) -> Result<Arc<StreamPipeline>, DispatchError> {
        self.streams.get_or_try_insert(id, || {
            let message_type = describe();
            expect_kind(lookup, &message_type, MessageKind::Stream)?;
            let handler = lookup.resolve_stream_handler(&message_type)?;
            let behaviors = lookup.resolve_stream_behaviors(&message_type);
            trace!(
                request = message_type.name(),
                behaviors = behaviors.len(),
                "stream pipeline composed"
            );
            Ok(StreamPipeline {
                message_type: message_type.name(),
                behaviors: behaviors.into(),
                handler,
            })
        })
    }

    pub(crate) fn route(
        &self,
        lookup: &dyn HandlerLookup,
        id: TypeId,
        describe: impl FnOnce() -> MessageType,
    ) -> Result<Arc<NotificationRoute>, DispatchError> {
        self.routes.get_or_try_insert(id, || {
            let message_type = describe();
            expect_kind(lookup, &message_type, MessageKind::Notification)?;
            let handlers = lookup.resolve_notification_handlers(&message_type);
            trace!(
                notification = message_type.name(),
                handlers = handlers.len(),
                "notification route resolved"
            );
            Ok(NotificationRoute {
                message_type: message_type.name(),
                handlers,
            })
        })
    }

    pub(crate) fn cached(&self) -> usize {
        self.requests.len() + self.streams.len() + self.routes.len()
    }
}
