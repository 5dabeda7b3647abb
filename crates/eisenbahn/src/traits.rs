use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::EisenbahnError;
use crate::message::Message;
use crate::reqrep::ReplyToken;

/// Per-site outcome of a fanned-out request, keyed by site name.
pub type SiteResponses = HashMap<String, Result<Message, EisenbahnError>>;

/// Publishes messages to one or more subscribers via PUB/SUB pattern.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a message. Subscribers filter by the message's topic.
    async fn publish(&self, message: Message) -> Result<(), EisenbahnError>;
}

/// Blanket implementation so `Arc<dyn EventPublisher>` can be used directly.
#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, message: Message) -> Result<(), EisenbahnError> {
        (**self).publish(message).await
    }
}

/// Subscribes to messages matching topic filters via PUB/SUB pattern.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to messages with topics matching the given prefix.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), EisenbahnError>;

    /// Receive the next message. Blocks until a message is available.
    async fn recv(&self) -> Result<Message, EisenbahnError>;
}

#[async_trait]
impl<T: EventSubscriber + ?Sized> EventSubscriber for Arc<T> {
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), EisenbahnError> {
        (**self).subscribe(topic_prefix).await
    }

    async fn recv(&self) -> Result<Message, EisenbahnError> {
        (**self).recv().await
    }
}

/// Client side of a single request/reply connection.
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// Send a request and wait for the reply matched by `correlation_id`.
    ///
    /// Returns [`EisenbahnError::Timeout`] if no reply arrives within `timeout`.
    async fn request(&self, msg: Message, timeout: Duration) -> Result<Message, EisenbahnError>;
}

/// Server side of request/reply: receives requests and routes replies back.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Receive the next request together with the token needed to answer it.
    async fn recv_request(&self) -> Result<(ReplyToken, Message), EisenbahnError>;

    /// Send a reply to the peer identified by `token`.
    async fn send_reply(&self, token: ReplyToken, reply: Message) -> Result<(), EisenbahnError>;
}

/// Capability to send one request to a set of sites.
///
/// This is the only thing the scheduler needs from the messaging layer: a
/// request goes out on `request.topic` to every target, and the result is one
/// entry per target. A site that cannot be reached, fails, or does not answer
/// within `timeout` shows up as an `Err` entry; the call itself never fails.
#[async_trait]
pub trait SiteRequester: Send + Sync {
    async fn send_to_sites(
        &self,
        targets: &[String],
        request: Message,
        timeout: Duration,
    ) -> SiteResponses;
}

#[async_trait]
impl<T: SiteRequester + ?Sized> SiteRequester for Arc<T> {
    async fn send_to_sites(
        &self,
        targets: &[String],
        request: Message,
        timeout: Duration,
    ) -> SiteResponses {
        (**self).send_to_sites(targets, request, timeout).await
    }
}
