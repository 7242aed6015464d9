//! Notification envelope: delivery-status signaling for a prior `Message`.

use serde::{Deserialize, Serialize};

use super::{EnvelopeBase, Reason};

/// Delivery-status events a receiving node reports back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Accepted,
    Dispatched,
    Received,
    Consumed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub base: EnvelopeBase,
    pub event: Event,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Notification {
    /// Builds a `failed` notification, enforcing the invariant that a
    /// `Failed` event always carries a reason.
    pub fn failed(reason: Reason) -> Self {
        Self {
            base: EnvelopeBase::default(),
            event: Event::Failed,
            reason: Some(reason),
        }
    }

    pub fn new(event: Event) -> Self {
        Self {
            base: EnvelopeBase::default(),
            event,
            reason: None,
        }
    }
}
