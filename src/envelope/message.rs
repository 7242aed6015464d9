//! Message envelope: a payload of an arbitrary MIME media type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EnvelopeBase;

/// A `Message` envelope carries an application payload tagged with a MIME
/// media type. `content` is left as a raw JSON value; the core does not
/// interpret payload schemas beyond what is needed to route the envelope
/// (§1 Non-goals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub base: EnvelopeBase,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl Message {
    pub fn new(media_type: impl Into<String>, content: Value) -> Self {
        Self {
            base: EnvelopeBase::default(),
            media_type: Some(media_type.into()),
            content: Some(content),
        }
    }
}
