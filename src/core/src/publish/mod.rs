use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use herald_message::{AnyMessage, DispatchError};
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::handler::DynNotificationHandler;

mod concurrent;
mod sequential;

pub use concurrent::ConcurrentPublisher;
pub use sequential::{FaultPolicy, SequentialPublisher};

/// Policy deciding how the resolved handlers of one notification run.
///
/// Strategies never fail: every handler fault, panics included, is returned
/// as a [`HandlerFailure`] for the publisher to report.
pub trait PublishStrategy: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn publish<'a>(
        &'a self,
        handlers: &'a [Arc<dyn DynNotificationHandler>],
        notification: Arc<dyn AnyMessage>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Vec<HandlerFailure>>;
}

/// Selects one of the built-in strategies from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Run all handlers as concurrent tasks and wait for every one.
    #[default]
    Concurrent,
    /// Run handlers one after another, continuing past faults.
    Sequential,
    /// Run handlers one after another, stopping at the first fault.
    SequentialFailFast,
}

impl PublishMode {
    pub fn strategy(&self) -> Arc<dyn PublishStrategy> {
        match self {
            Self::Concurrent => Arc::new(ConcurrentPublisher),
            Self::Sequential => Arc::new(SequentialPublisher::new(FaultPolicy::Continue)),
            Self::SequentialFailFast => Arc::new(SequentialPublisher::new(FaultPolicy::StopOnFirst)),
        }
    }
}

impl FromStr for PublishMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" => Ok(Self::Concurrent),
            "sequential" => Ok(Self::Sequential),
            "sequential_fail_fast" | "fail_fast" => Ok(Self::SequentialFailFast),
            other => Err(format!("unknown publish strategy: {other}")),
        }
    }
}

/// One notification handler that did not complete successfully.
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub error: DispatchError,
}

impl HandlerFailure {
    pub fn new(handler: &'static str, error: DispatchError) -> Self {
        Self { handler, error }
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.handler, self.error)
    }
}

/// Outcome of delivering one notification.
#[derive(Debug)]
pub struct PublishReport {
    pub message_type: &'static str,
    pub handlers: usize,
    pub failures: Vec<HandlerFailure>,
}

impl PublishReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<(), PublishError> {
        if self.failures.is_empty() {
            return Ok(());
        }
        Err(PublishError::HandlersFailed {
            message_type: self.message_type,
            handlers: self.handlers,
            failures: self.failures,
        })
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{count} of {handlers} handlers for {message_type} failed", count = .failures.len())]
    HandlersFailed {
        message_type: &'static str,
        handlers: usize,
        failures: Vec<HandlerFailure>,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes_from_env_strings() {
        assert_eq!("concurrent".parse::<PublishMode>(), Ok(PublishMode::Concurrent));
        assert_eq!(" Sequential ".parse::<PublishMode>(), Ok(PublishMode::Sequential));
        assert_eq!(
            "fail_fast".parse::<PublishMode>(),
            Ok(PublishMode::SequentialFailFast)
        );
        assert!("random".parse::<PublishMode>().is_err());
    }

    #[test]
    fn mode_builds_matching_strategy() {
        assert_eq!(PublishMode::Concurrent.strategy().name(), "concurrent");
        assert_eq!(PublishMode::Sequential.strategy().name(), "sequential");
        assert_eq!(
            PublishMode::SequentialFailFast.strategy().name(),
            "sequential_fail_fast"
        );
    }

    #[test]
    fn report_with_failures_becomes_error() {
        let report = PublishReport {
            message_type: "Tick",
            handlers: 3,
            failures: vec![HandlerFailure::new("audit", DispatchError::handler("down"))],
        };
        assert!(!report.is_success());
        let err = report.into_result().unwrap_err();
        assert_eq!(err.to_string(), "1 of 3 handlers for Tick failed");
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}
