mod behavior;
mod config;
mod handler;
mod mediator;
mod pipeline;
mod publish;
mod registry;

pub use behavior::{
    AnyStreamNext, GenericBehavior, GenericStreamBehavior, Next, PipelineBehavior, RequestNext,
    StreamBehavior, StreamNext,
};
pub use config::DispatchConfig;
pub use handler::{
    AnyItem, AnyResponse, DynNotificationHandler, DynRequestHandler, DynStreamHandler, ItemStream,
    NotificationHandler, RequestHandler, StreamHandler,
};
pub use mediator::{Dispatched, Mediator, WeakMediator};
pub use publish::{
    ConcurrentPublisher, FaultPolicy, HandlerFailure, PublishError, PublishMode, PublishReport,
    PublishStrategy, SequentialPublisher,
};
pub use registry::{
    AmbiguousRegistration, BehaviorPosition, HandlerLookup, Registry, RegistryBuilder, RegistryError,
};

pub use herald_message::{
    AllNotifications, AnyMessage, BoxError, Capability, DispatchError, Message, MessageKind,
    MessageType, Notification, Request, StreamRequest,
};
pub use tokio_util::sync::CancellationToken;
