#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use herald_core::{AnyMessage, AnyResponse, CancellationToken, DispatchError, GenericBehavior, Next};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn record(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

pub fn clear(journal: &Journal) {
    journal.lock().unwrap().clear();
}

/// Records `label:before`, runs the rest of the pipeline, and records
/// `label:after` only when the inner stages succeeded.
pub struct Recorder {
    pub label: &'static str,
    pub journal: Journal,
}

impl Recorder {
    pub fn new(label: &'static str, journal: &Journal) -> Self {
        Self {
            label,
            journal: journal.clone(),
        }
    }
}

impl GenericBehavior for Recorder {
    fn name(&self) -> &'static str {
        self.label
    }

    fn handle<'a>(
        &'a self,
        _request: &'a dyn AnyMessage,
        _cancel: &'a CancellationToken,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<AnyResponse, DispatchError>> {
        Box::pin(async move {
            record(&self.journal, format!("{}:before", self.label));
            let response = next.run().await?;
            record(&self.journal, format!("{}:after", self.label));
            Ok(response)
        })
    }
}

/// Short-circuits every request with a validation fault.
pub struct Reject {
    pub label: &'static str,
    pub journal: Journal,
}

impl Reject {
    pub fn new(label: &'static str, journal: &Journal) -> Self {
        Self {
            label,
            journal: journal.clone(),
        }
    }
}

impl GenericBehavior for Reject {
    fn name(&self) -> &'static str {
        self.label
    }

    fn handle<'a>(
        &'a self,
        request: &'a dyn AnyMessage,
        _cancel: &'a CancellationToken,
        _next: Next<'a>,
    ) -> BoxFuture<'a, Result<AnyResponse, DispatchError>> {
        Box::pin(async move {
            record(&self.journal, format!("{}:reject", self.label));
            Err(DispatchError::validation(format!(
                "{} refused by {}",
                request.type_name(),
                self.label
            )))
        })
    }
}
