//! Handler dispatch contract (§4.6): external to the channel's core, this
//! module defines the small capability set a connection driver consumes to
//! turn received envelopes into application behavior. It does not itself run
//! a dispatch loop — that belongs to the drivers in [`crate::driver`], which
//! own the channel's lifetime and decide what a handler error means for the
//! session.

use async_trait::async_trait;
use thiserror::Error;

use crate::channel::Channel;
use crate::envelope::{Message, Notification, RequestCommand, ResponseCommand};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn matches(&self, message: &Message) -> bool;
    async fn handle(&self, message: Message, channel: &Channel) -> Result<(), HandlerError>;
}

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    fn matches(&self, notification: &Notification) -> bool;
    async fn handle(&self, notification: Notification, channel: &Channel) -> Result<(), HandlerError>;
}

#[async_trait]
pub trait RequestCommandHandler: Send + Sync {
    fn matches(&self, request: &RequestCommand) -> bool;
    async fn handle(&self, request: RequestCommand, channel: &Channel) -> Result<(), HandlerError>;
}

#[async_trait]
pub trait ResponseCommandHandler: Send + Sync {
    fn matches(&self, response: &ResponseCommand) -> bool;
    async fn handle(&self, response: ResponseCommand, channel: &Channel) -> Result<(), HandlerError>;
}

/// A registered set of handlers for the four envelope kinds a connection
/// driver dispatches once a channel is established. Registration order is
/// significant only for matching: the first handler whose `matches` returns
/// true for a given envelope wins; an envelope nothing matches is dropped.
#[derive(Default)]
pub struct HandlerSet {
    messages: Vec<Box<dyn MessageHandler>>,
    notifications: Vec<Box<dyn NotificationHandler>>,
    request_commands: Vec<Box<dyn RequestCommandHandler>>,
    response_commands: Vec<Box<dyn ResponseCommandHandler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.messages.push(Box::new(handler));
        self
    }

    pub fn add_notification_handler(mut self, handler: impl NotificationHandler + 'static) -> Self {
        self.notifications.push(Box::new(handler));
        self
    }

    pub fn add_request_command_handler(mut self, handler: impl RequestCommandHandler + 'static) -> Self {
        self.request_commands.push(Box::new(handler));
        self
    }

    pub fn add_response_command_handler(mut self, handler: impl ResponseCommandHandler + 'static) -> Self {
        self.response_commands.push(Box::new(handler));
        self
    }

    pub(crate) async fn dispatch_message(&self, message: Message, channel: &Channel) -> Result<(), HandlerError> {
        match self.messages.iter().find(|h| h.matches(&message)) {
            Some(handler) => handler.handle(message, channel).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn dispatch_notification(
        &self,
        notification: Notification,
        channel: &Channel,
    ) -> Result<(), HandlerError> {
        match self.notifications.iter().find(|h| h.matches(&notification)) {
            Some(handler) => handler.handle(notification, channel).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn dispatch_request_command(
        &self,
        request: RequestCommand,
        channel: &Channel,
    ) -> Result<(), HandlerError> {
        match self.request_commands.iter().find(|h| h.matches(&request)) {
            Some(handler) => handler.handle(request, channel).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn dispatch_response_command(
        &self,
        response: ResponseCommand,
        channel: &Channel,
    ) -> Result<(), HandlerError> {
        match self.response_commands.iter().find(|h| h.matches(&response)) {
            Some(handler) => handler.handle(response, channel).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingMessageHandler {
        content_type: &'static str,
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandler for CountingMessageHandler {
        fn matches(&self, message: &Message) -> bool {
            message.media_type.as_deref() == Some(self.content_type)
        }

        async fn handle(&self, _message: Message, _channel: &Channel) -> Result<(), HandlerError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn first_matching_handler_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let set = HandlerSet::new()
            .add_message_handler(CountingMessageHandler { content_type: "text/plain", count: first.clone() })
            .add_message_handler(CountingMessageHandler { content_type: "text/plain", count: second.clone() });

        assert_eq!(set.messages.len(), 2);
        assert!(set.messages[0].matches(&Message::new("text/plain", serde_json::json!("hi"))));
    }
}
