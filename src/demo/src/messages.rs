use herald_core::{Capability, Message, Notification, Request, StreamRequest};
use uuid::Uuid;

/// Capability of notifications that must leave an audit trail.
pub struct Auditable;

#[derive(Debug, Clone)]
pub struct Ping {
    pub id: Uuid,
    pub message: String,
}

impl Ping {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
        }
    }
}

impl Message for Ping {}

impl Request for Ping {
    type Response = Pong;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pong {
    pub id: Uuid,
    pub reply: String,
}

#[derive(Debug, Clone)]
pub struct LineItem {
    pub sku: String,
    pub quantity: u32,
    pub unit_cents: u64,
}

impl LineItem {
    pub fn new(sku: &str, quantity: u32, unit_cents: u64) -> Self {
        Self {
            sku: sku.to_string(),
            quantity,
            unit_cents,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub customer: String,
    pub items: Vec<LineItem>,
}

impl Message for CreateOrder {}

impl Request for CreateOrder {
    type Response = OrderConfirmation;
}

#[derive(Debug, Clone)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub total_cents: u64,
}

#[derive(Debug, Clone)]
pub struct OrderPlaced {
    pub order_id: Uuid,
    pub customer: String,
    pub total_cents: u64,
}

impl Message for OrderPlaced {
    fn capabilities() -> Vec<Capability> {
        vec![Capability::of::<Auditable>()]
    }
}

impl Notification for OrderPlaced {}

/// Published by the logging behavior whenever a request faults.
#[derive(Debug, Clone)]
pub struct ErrorObserved {
    pub request: &'static str,
    pub error: String,
}

impl Message for ErrorObserved {}

impl Notification for ErrorObserved {}

/// Streams `count` consecutive values starting at `start`, one every
/// `interval_ms`.
#[derive(Debug, Clone)]
pub struct Counter {
    pub start: u64,
    pub count: u64,
    pub interval_ms: u64,
}

impl Message for Counter {}

impl StreamRequest for Counter {
    type Item = u64;
}
