//! Envelope base fields and the tagged-union `Envelope` type.
//!
//! Kind discrimination happens by field presence (see [`crate::codec`]), not
//! by an explicit tag, because that is how the wire format works. The
//! variants themselves are plain structs so callers pattern-match on a
//! closed sum type rather than a subtype hierarchy (§9 of the design notes).

pub mod command;
pub mod message;
pub mod notification;
pub mod session;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::Node;

pub use command::{Command, Method, RequestCommand, ResponseCommand, Status};
pub use message::Message;
pub use notification::{Event, Notification};
pub use session::{
    Authentication, AuthenticationScheme, CompressionOption, EncryptionOption, SessionEnvelope,
    SessionState,
};

/// Fields embedded in every envelope kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeBase {
    /// Required for correlation of commands; optional otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Absent on receive means "from the immediate peer".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Node>,
    /// Absent on receive means "addressed to the receiver".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Node>,
    /// Per-procurationem delegate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pp: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl EnvelopeBase {
    pub fn id_or_empty(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }
}

/// A structured failure reason carried by `Notification::Failed` and
/// terminal `Session` envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: i32,
    pub description: String,
}

/// The closed set of envelope kinds exchanged over a LIME session.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Message(Message),
    Notification(Notification),
    RequestCommand(RequestCommand),
    ResponseCommand(ResponseCommand),
    Session(SessionEnvelope),
}

impl Envelope {
    pub fn base(&self) -> &EnvelopeBase {
        match self {
            Envelope::Message(m) => &m.base,
            Envelope::Notification(n) => &n.base,
            Envelope::RequestCommand(c) => &c.base,
            Envelope::ResponseCommand(c) => &c.base,
            Envelope::Session(s) => &s.base,
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Message(_) => EnvelopeKind::Message,
            Envelope::Notification(_) => EnvelopeKind::Notification,
            Envelope::RequestCommand(_) => EnvelopeKind::RequestCommand,
            Envelope::ResponseCommand(_) => EnvelopeKind::ResponseCommand,
            Envelope::Session(_) => EnvelopeKind::Session,
        }
    }
}

/// The kind an envelope was classified as, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Message,
    Notification,
    RequestCommand,
    ResponseCommand,
    Session,
}
