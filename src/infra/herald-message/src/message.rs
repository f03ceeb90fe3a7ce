use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::{Capability, MessageType};

/// Base trait for every value the dispatch core can route.
///
/// A message is immutable once submitted and is identified by its concrete
/// type. Each message type implements exactly one of [`Request`],
/// [`Notification`] or [`StreamRequest`].
pub trait Message: fmt::Debug + Send + Sync + 'static {
    /// Capability markers this type belongs to, most specific first.
    fn capabilities() -> Vec<Capability>
    where
        Self: Sized,
    {
        Vec::new()
    }
}

/// A message handled by exactly one handler, producing one response.
pub trait Request: Message {
    type Response: Send + 'static;
}

/// A message broadcast to zero or more observers.
pub trait Notification: Message {}

/// A message whose single handler produces a lazily pulled sequence.
pub trait StreamRequest: Message {
    type Item: Send + 'static;
}

/// Object-safe view of a [`Message`] whose concrete type is only known at
/// runtime.
pub trait AnyMessage: fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// `TypeId` of the concrete message type behind the trait object.
    fn concrete_type_id(&self) -> TypeId;

    fn type_name(&self) -> &'static str;

    fn message_type(&self) -> MessageType;
}

impl<M: Message> AnyMessage for M {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn concrete_type_id(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn type_name(&self) -> &'static str {
        type_name::<M>()
    }

    fn message_type(&self) -> MessageType {
        MessageType::of::<M>()
    }
}

impl dyn AnyMessage {
    pub fn is<M: Message>(&self) -> bool {
        self.concrete_type_id() == TypeId::of::<M>()
    }

    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}
