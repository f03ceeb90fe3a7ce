use serde::Deserialize;

use crate::publish::PublishMode;

/// Dispatch core configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How notification handlers are invoked.
    pub publish_strategy: PublishMode,
    /// Reject request and stream types with more than one handler when the
    /// registry is built, instead of faulting on their first dispatch.
    pub strict_handlers: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            publish_strategy: PublishMode::Concurrent,
            strict_handlers: false,
        }
    }
}
