use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::Message;

/// The dispatch kind a message type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Notification,
    Stream,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Notification => "notification",
            Self::Stream => "stream request",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-level tag that places a message type into a family.
///
/// A capability is the identity of a marker type. Messages list the markers
/// they satisfy in [`Message::capabilities`]; handlers and behaviors can be
/// registered against a marker instead of a concrete message type.
#[derive(Clone, Copy)]
pub struct Capability {
    id: TypeId,
    name: &'static str,
}

impl Capability {
    pub fn of<C: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<C>(),
            name: type_name::<C>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Capability {}

impl Hash for Capability {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({})", self.name)
    }
}

/// Capability implicitly satisfied by every notification type.
///
/// Handlers registered against it observe all published notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllNotifications;

/// Runtime identity of a concrete message type.
#[derive(Clone)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
    capabilities: Vec<Capability>,
}

impl MessageType {
    pub fn of<M: Message>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: type_name::<M>(),
            capabilities: M::capabilities(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared capabilities, in the order the type lists them.
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// True when `capability` is this type itself or one it declares.
    pub fn satisfies(&self, capability: &Capability) -> bool {
        capability.id == self.id || self.capabilities.contains(capability)
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageType")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
