use thiserror::Error;

use crate::MessageKind;

/// Boxed error raised by application handlers and behaviors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Faults produced while dispatching a message.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no handler registered for {message_type}")]
    NoHandler { message_type: &'static str },

    #[error("{count} handlers registered for {message_type}, expected exactly one")]
    AmbiguousHandler {
        message_type: &'static str,
        count: usize,
    },

    #[error("{message_type} is registered as a {registered}, not a {requested}")]
    KindMismatch {
        message_type: &'static str,
        registered: MessageKind,
        requested: MessageKind,
    },

    #[error("message type {message_type} is not registered")]
    UnknownMessageType { message_type: &'static str },

    #[error("pipeline produced a value that is not {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("dispatch cancelled")]
    Cancelled,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Handler(#[source] BoxError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Faults caused by how handlers were registered rather than by the
    /// message being dispatched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoHandler { .. }
                | Self::AmbiguousHandler { .. }
                | Self::KindMismatch { .. }
                | Self::UnknownMessageType { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
