//! Command envelopes: `RequestCommand`/`ResponseCommand`, correlated by `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{EnvelopeBase, Reason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Set,
    Delete,
    Subscribe,
    Unsubscribe,
    Observe,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

/// Raw command fields as they appear on the wire, before the request/response
/// split is enforced. The codec produces this, then narrows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(flatten)]
    pub base: EnvelopeBase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("command envelope is missing a required id")]
    MissingId,
    #[error("request command is missing a method")]
    MissingMethod,
    #[error("response command is missing a status")]
    MissingStatus,
}

/// A command sent by the caller, discriminated by having `method` and no `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestCommand {
    pub base: EnvelopeBase,
    pub method: Method,
    pub uri: Option<String>,
    pub resource_type: Option<String>,
    pub resource: Option<Value>,
}

impl RequestCommand {
    pub fn new(id: impl Into<String>, method: Method, uri: impl Into<String>) -> Self {
        Self {
            base: EnvelopeBase {
                id: Some(id.into()),
                ..Default::default()
            },
            method,
            uri: Some(uri.into()),
            resource_type: None,
            resource: None,
        }
    }

    pub fn id(&self) -> &str {
        self.base.id_or_empty()
    }

    pub fn into_command(self) -> Command {
        Command {
            base: self.base,
            method: Some(self.method),
            uri: self.uri,
            status: None,
            resource_type: self.resource_type,
            resource: self.resource,
            reason: None,
        }
    }
}

impl TryFrom<Command> for RequestCommand {
    type Error = CommandError;

    fn try_from(raw: Command) -> Result<Self, Self::Error> {
        if raw.base.id.as_deref().unwrap_or("").is_empty() {
            return Err(CommandError::MissingId);
        }
        let method = raw.method.ok_or(CommandError::MissingMethod)?;
        Ok(RequestCommand {
            base: raw.base,
            method,
            uri: raw.uri,
            resource_type: raw.resource_type,
            resource: raw.resource,
        })
    }
}

/// A command reply, discriminated by carrying `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCommand {
    pub base: EnvelopeBase,
    pub status: Status,
    pub resource_type: Option<String>,
    pub resource: Option<Value>,
    pub reason: Option<Reason>,
}

impl ResponseCommand {
    pub fn success(id: impl Into<String>) -> Self {
        Self {
            base: EnvelopeBase {
                id: Some(id.into()),
                ..Default::default()
            },
            status: Status::Success,
            resource_type: None,
            resource: None,
            reason: None,
        }
    }

    pub fn failure(id: impl Into<String>, reason: Reason) -> Self {
        Self {
            base: EnvelopeBase {
                id: Some(id.into()),
                ..Default::default()
            },
            status: Status::Failure,
            resource_type: None,
            resource: None,
            reason: Some(reason),
        }
    }

    pub fn id(&self) -> &str {
        self.base.id_or_empty()
    }

    pub fn into_command(self) -> Command {
        Command {
            base: self.base,
            method: None,
            uri: None,
            status: Some(self.status),
            resource_type: self.resource_type,
            resource: self.resource,
            reason: self.reason,
        }
    }
}

impl TryFrom<Command> for ResponseCommand {
    type Error = CommandError;

    fn try_from(raw: Command) -> Result<Self, Self::Error> {
        if raw.base.id.as_deref().unwrap_or("").is_empty() {
            return Err(CommandError::MissingId);
        }
        let status = raw.status.ok_or(CommandError::MissingStatus)?;
        Ok(ResponseCommand {
            base: raw.base,
            status,
            resource_type: raw.resource_type,
            resource: raw.resource,
            reason: raw.reason,
        })
    }
}
