use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use herald_message::{
    AllNotifications, Capability, DispatchError, MessageKind, MessageType, Notification, Request,
    StreamRequest,
};
use thiserror::Error;
use tracing::debug;

use crate::behavior::{
    ClosedBehavior, ClosedStreamBehavior, GenericBehavior, GenericStreamBehavior,
    PipelineBehavior, StreamBehavior,
};
use crate::config::DispatchConfig;
use crate::handler::{
    DynNotificationHandler, DynRequestHandler, DynStreamHandler, NotificationAdapter,
    NotificationHandler, RequestAdapter, RequestHandler, StreamAdapter, StreamHandler,
};

/// Read-side lookup the dispatch core resolves handlers and behaviors from.
///
/// Implementations must be pure lookups: the same inputs resolve to the same
/// handlers for the lifetime of the value, which is what lets the core cache
/// composed pipelines by type.
pub trait HandlerLookup: Send + Sync + 'static {
    /// Kind a concrete message type was registered under, if any.
    fn kind_of(&self, type_id: TypeId) -> Option<MessageKind>;

    fn resolve_request_handler(
        &self,
        message_type: &MessageType,
    ) -> Result<Arc<dyn DynRequestHandler>, DispatchError>;

    /// Every handler observing `message_type`, possibly none.
    fn resolve_notification_handlers(
        &self,
        message_type: &MessageType,
    ) -> Vec<Arc<dyn DynNotificationHandler>>;

    fn resolve_stream_handler(
        &self,
        message_type: &MessageType,
    ) -> Result<Arc<dyn DynStreamHandler>, DispatchError>;

    /// Request behaviors applicable to `message_type`, in registration order.
    fn resolve_behaviors(&self, message_type: &MessageType) -> Vec<Arc<dyn GenericBehavior>>;

    /// Stream behaviors applicable to `message_type`, in registration order.
    fn resolve_stream_behaviors(
        &self,
        message_type: &MessageType,
    ) -> Vec<Arc<dyn GenericStreamBehavior>>;
}

/// Where a behavior is placed relative to those already registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BehaviorPosition {
    #[default]
    Append,
    Prepend,
}

/// Registration problems detected when building a [`Registry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{message_type} registered both as a {first} and as a {second}")]
    ConflictingKinds {
        message_type: &'static str,
        first: MessageKind,
        second: MessageKind,
    },

    #[error("{count} handlers registered for {kind} {message_type}, expected exactly one")]
    AmbiguousHandlers {
        message_type: &'static str,
        kind: MessageKind,
        count: usize,
    },
}

/// A request or stream type with more than one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousRegistration {
    pub message_type: &'static str,
    pub kind: MessageKind,
    pub handlers: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy)]
struct KindEntry {
    kind: MessageKind,
    name: &'static str,
}

#[derive(Clone, Copy)]
enum Applies {
    Type(TypeId),
    Capability(Capability),
    Any,
}

impl Applies {
    fn matches(&self, message_type: &MessageType) -> bool {
        match self {
            Self::Type(id) => *id == message_type.id(),
            Self::Capability(capability) => message_type.satisfies(capability),
            Self::Any => true,
        }
    }
}

struct BehaviorEntry<B: ?Sized> {
    applies: Applies,
    behavior: Arc<B>,
}

fn applicable<B: ?Sized>(entries: &[BehaviorEntry<B>], message_type: &MessageType) -> Vec<Arc<B>> {
    entries
        .iter()
        .filter(|entry| entry.applies.matches(message_type))
        .map(|entry| Arc::clone(&entry.behavior))
        .collect()
}

fn insert<B: ?Sized>(entries: &mut Vec<BehaviorEntry<B>>, entry: BehaviorEntry<B>, position: BehaviorPosition) {
    match position {
        BehaviorPosition::Append => entries.push(entry),
        BehaviorPosition::Prepend => entries.insert(0, entry),
    }
}

fn single<H: ?Sized>(
    handlers: Option<&Vec<Arc<H>>>,
    message_type: &MessageType,
) -> Result<Arc<H>, DispatchError> {
    match handlers.map(Vec::as_slice) {
        None | Some([]) => Err(DispatchError::NoHandler {
            message_type: message_type.name(),
        }),
        Some([handler]) => Ok(Arc::clone(handler)),
        Some(many) => Err(DispatchError::AmbiguousHandler {
            message_type: message_type.name(),
            count: many.len(),
        }),
    }
}

/// In-memory handler registry built once and then only read.
#[derive(Default)]
pub struct Registry {
    kinds: HashMap<TypeId, KindEntry>,
    requests: HashMap<TypeId, Vec<Arc<dyn DynRequestHandler>>>,
    streams: HashMap<TypeId, Vec<Arc<dyn DynStreamHandler>>>,
    /// keyed by concrete notification type or capability marker
    notifications: HashMap<TypeId, Vec<Arc<dyn DynNotificationHandler>>>,
    behaviors: Vec<BehaviorEntry<dyn GenericBehavior>>,
    stream_behaviors: Vec<BehaviorEntry<dyn GenericStreamBehavior>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Request and stream types that will fault with
    /// [`DispatchError::AmbiguousHandler`] when dispatched.
    pub fn ambiguous(&self) -> Vec<AmbiguousRegistration> {
        let requests = self.requests.iter().map(|(id, handlers)| {
            (*id, MessageKind::Request, handlers.iter().map(|h| h.name()).collect::<Vec<_>>())
        });
        let streams = self.streams.iter().map(|(id, handlers)| {
            (*id, MessageKind::Stream, handlers.iter().map(|h| h.name()).collect::<Vec<_>>())
        });
        let mut found: Vec<AmbiguousRegistration> = requests
            .chain(streams)
            .filter(|(_, _, handlers)| handlers.len() > 1)
            .map(|(id, kind, handlers)| AmbiguousRegistration {
                message_type: self.kinds.get(&id).map(|k| k.name).unwrap_or("<unknown>"),
                kind,
                handlers,
            })
            .collect();
        found.sort_by_key(|entry| entry.message_type);
        found
    }
}

impl HandlerLookup for Registry {
    fn kind_of(&self, type_id: TypeId) -> Option<MessageKind> {
        self.kinds.get(&type_id).map(|entry| entry.kind)
    }

    fn resolve_request_handler(
        &self,
        message_type: &MessageType,
    ) -> Result<Arc<dyn DynRequestHandler>, DispatchError> {
        single(self.requests.get(&message_type.id()), message_type)
    }

    /// Order: handlers of the concrete type, then handlers of each declared
    /// capability in declaration order, then [`AllNotifications`] handlers.
    /// Registration order holds within each group.
    fn resolve_notification_handlers(
        &self,
        message_type: &MessageType,
    ) -> Vec<Arc<dyn DynNotificationHandler>> {
        let mut keys = Vec::with_capacity(message_type.capabilities().len() + 2);
        keys.push(message_type.id());
        keys.extend(message_type.capabilities().iter().map(Capability::id));
        keys.push(TypeId::of::<AllNotifications>());

        let mut seen = Vec::with_capacity(keys.len());
        let mut handlers = Vec::new();
        for key in keys {
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            if let Some(found) = self.notifications.get(&key) {
                handlers.extend(found.iter().cloned());
            }
        }
        handlers
    }

    fn resolve_stream_handler(
        &self,
        message_type: &MessageType,
    ) -> Result<Arc<dyn DynStreamHandler>, DispatchError> {
        single(self.streams.get(&message_type.id()), message_type)
    }

    fn resolve_behaviors(&self, message_type: &MessageType) -> Vec<Arc<dyn GenericBehavior>> {
        applicable(&self.behaviors, message_type)
    }

    fn resolve_stream_behaviors(
        &self,
        message_type: &MessageType,
    ) -> Vec<Arc<dyn GenericStreamBehavior>> {
        applicable(&self.stream_behaviors, message_type)
    }
}

/// Registration surface producing a [`Registry`].
///
/// Handler counts are not checked while registering: a request type with no
/// handler or several handlers faults when it is first dispatched. Building
/// with [`DispatchConfig::strict_handlers`] rejects duplicates up front.
#[derive(Default)]
pub struct RegistryBuilder {
    registry: Registry,
    conflicts: Vec<RegistryError>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_kind(&mut self, id: TypeId, name: &'static str, kind: MessageKind) {
        match self.registry.kinds.get(&id) {
            Some(existing) if existing.kind != kind => {
                self.conflicts.push(RegistryError::ConflictingKinds {
                    message_type: name,
                    first: existing.kind,
                    second: kind,
                });
            }
            Some(_) => {}
            None => {
                self.registry.kinds.insert(id, KindEntry { kind, name });
            }
        }
    }

    pub fn request_handler<R, H>(&mut self, handler: H) -> &mut Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.dyn_request_handler::<R>(Arc::new(RequestAdapter::<R, H>::new(handler)))
    }

    /// Register an already type-erased handler for `R`.
    pub fn dyn_request_handler<R: Request>(&mut self, handler: Arc<dyn DynRequestHandler>) -> &mut Self {
        self.record_kind(TypeId::of::<R>(), type_name::<R>(), MessageKind::Request);
        debug!(request = type_name::<R>(), handler = handler.name(), "request handler registered");
        self.registry
            .requests
            .entry(TypeId::of::<R>())
            .or_default()
            .push(handler);
        self
    }

    pub fn stream_handler<R, H>(&mut self, handler: H) -> &mut Self
    where
        R: StreamRequest,
        H: StreamHandler<R>,
    {
        self.record_kind(TypeId::of::<R>(), type_name::<R>(), MessageKind::Stream);
        let handler: Arc<dyn DynStreamHandler> = Arc::new(StreamAdapter::<R, H>::new(handler));
        debug!(request = type_name::<R>(), handler = handler.name(), "stream handler registered");
        self.registry
            .streams
            .entry(TypeId::of::<R>())
            .or_default()
            .push(handler);
        self
    }

    pub fn notification_handler<N, H>(&mut self, handler: H) -> &mut Self
    where
        N: Notification,
        H: NotificationHandler<N>,
    {
        self.declare_notification::<N>();
        let handler: Arc<dyn DynNotificationHandler> =
            Arc::new(NotificationAdapter::<N, H>::new(handler));
        self.add_notification_handler(TypeId::of::<N>(), type_name::<N>(), handler)
    }

    /// Register an observer for every notification declaring capability `C`.
    /// Use [`AllNotifications`] to observe all notifications.
    pub fn capability_handler<C, H>(&mut self, handler: H) -> &mut Self
    where
        C: ?Sized + 'static,
        H: DynNotificationHandler,
    {
        self.add_notification_handler(TypeId::of::<C>(), type_name::<C>(), Arc::new(handler))
    }

    fn add_notification_handler(
        &mut self,
        key: TypeId,
        key_name: &'static str,
        handler: Arc<dyn DynNotificationHandler>,
    ) -> &mut Self {
        debug!(notification = key_name, handler = handler.name(), "notification handler registered");
        self.registry.notifications.entry(key).or_default().push(handler);
        self
    }

    /// Make `N` known to opaque dispatch even if it has no handler of its own
    /// (for example when only capability handlers observe it).
    pub fn declare_notification<N: Notification>(&mut self) -> &mut Self {
        self.record_kind(TypeId::of::<N>(), type_name::<N>(), MessageKind::Notification);
        self
    }

    pub fn behavior<R, B>(&mut self, behavior: B) -> &mut Self
    where
        R: Request,
        B: PipelineBehavior<R>,
    {
        self.behavior_at::<R, B>(behavior, BehaviorPosition::Append)
    }

    pub fn behavior_at<R, B>(&mut self, behavior: B, position: BehaviorPosition) -> &mut Self
    where
        R: Request,
        B: PipelineBehavior<R>,
    {
        let entry = BehaviorEntry {
            applies: Applies::Type(TypeId::of::<R>()),
            behavior: Arc::new(ClosedBehavior::<R, B>::new(behavior)) as Arc<dyn GenericBehavior>,
        };
        self.add_behavior(entry, position)
    }

    /// Register a behavior wrapping every request type.
    pub fn generic_behavior<B: GenericBehavior>(&mut self, behavior: B) -> &mut Self {
        self.generic_behavior_at(behavior, BehaviorPosition::Append)
    }

    pub fn generic_behavior_at<B: GenericBehavior>(
        &mut self,
        behavior: B,
        position: BehaviorPosition,
    ) -> &mut Self {
        let entry = BehaviorEntry {
            applies: Applies::Any,
            behavior: Arc::new(behavior) as Arc<dyn GenericBehavior>,
        };
        self.add_behavior(entry, position)
    }

    /// Register a behavior wrapping only request types declaring capability `C`.
    pub fn generic_behavior_for<C, B>(&mut self, behavior: B) -> &mut Self
    where
        C: ?Sized + 'static,
        B: GenericBehavior,
    {
        self.generic_behavior_for_at::<C, B>(behavior, BehaviorPosition::Append)
    }

    pub fn generic_behavior_for_at<C, B>(&mut self, behavior: B, position: BehaviorPosition) -> &mut Self
    where
        C: ?Sized + 'static,
        B: GenericBehavior,
    {
        let entry = BehaviorEntry {
            applies: Applies::Capability(Capability::of::<C>()),
            behavior: Arc::new(behavior) as Arc<dyn GenericBehavior>,
        };
        self.add_behavior(entry, position)
    }

    fn add_behavior(
        &mut self,
        entry: BehaviorEntry<dyn GenericBehavior>,
        position: BehaviorPosition,
    ) -> &mut Self {
        debug!(behavior = entry.behavior.name(), ?position, "request behavior registered");
        insert(&mut self.registry.behaviors, entry, position);
        self
    }

    pub fn stream_behavior<R, B>(&mut self, behavior: B) -> &mut Self
    where
        R: StreamRequest,
        B: StreamBehavior<R>,
    {
        self.stream_behavior_at::<R, B>(behavior, BehaviorPosition::Append)
    }

    pub fn stream_behavior_at<R, B>(&mut self, behavior: B, position: BehaviorPosition) -> &mut Self
    where
        R: StreamRequest,
        B: StreamBehavior<R>,
    {
        let entry = BehaviorEntry {
            applies: Applies::Type(TypeId::of::<R>()),
            behavior: Arc::new(ClosedStreamBehavior::<R, B>::new(behavior))
                as Arc<dyn GenericStreamBehavior>,
        };
        self.add_stream_behavior(entry, position)
    }

    /// Register a behavior wrapping every stream request type.
    pub fn generic_stream_behavior<B: GenericStreamBehavior>(&mut self, behavior: B) -> &mut Self {
        self.generic_stream_behavior_at(behavior, BehaviorPosition::Append)
    }

    pub fn generic_stream_behavior_at<B: GenericStreamBehavior>(
        &mut self,
        behavior: B,
        position: BehaviorPosition,
    ) -> &mut Self {
        let entry = BehaviorEntry {
            applies: Applies::Any,
            behavior: Arc::new(behavior) as Arc<dyn GenericStreamBehavior>,
        };
        self.add_stream_behavior(entry, position)
    }

    fn add_stream_behavior(
        &mut self,
        entry: BehaviorEntry<dyn GenericStreamBehavior>,
        position: BehaviorPosition,
    ) -> &mut Self {
        debug!(behavior = entry.behavior.name(), ?position, "stream behavior registered");
        insert(&mut self.registry.stream_behaviors, entry, position);
        self
    }

    /// Finish registration with lazy handler-count checks.
    pub fn build(self) -> Result<Registry, RegistryError> {
        self.build_with(&DispatchConfig::default())
    }

    pub fn build_with(mut self, config: &DispatchConfig) -> Result<Registry, RegistryError> {
        if !self.conflicts.is_empty() {
            return Err(self.conflicts.remove(0));
        }
        if config.strict_handlers {
            if let Some(first) = self.registry.ambiguous().into_iter().next() {
                return Err(RegistryError::AmbiguousHandlers {
                    message_type: first.message_type,
                    kind: first.kind,
                    count: first.handlers.len(),
                });
            }
        }
        debug!(
            message_types = self.registry.kinds.len(),
            behaviors = self.registry.behaviors.len(),
            stream_behaviors = self.registry.stream_behaviors.len(),
            "registry built"
        );
        Ok(self.registry)
    }
}
