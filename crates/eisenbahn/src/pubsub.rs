//! PUB/SUB sockets for job lifecycle events.
//!
//! The component running jobs publishes `JobTerminated` events; the scheduler
//! subscribes to them to free admission slots.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use crate::error::EisenbahnError;
use crate::message::Message;
use crate::traits::{EventPublisher, EventSubscriber};
use crate::transport::Transport;

/// ZeroMQ PUB socket.
///
/// Messages are sent as two frames: the topic string (for subscriber-side
/// prefix filtering) followed by the MessagePack [`Message`] envelope.
pub struct ZmqPublisher {
    socket: Mutex<PubSocket>,
}

impl ZmqPublisher {
    /// Bind a PUB socket; subscribers connect to it.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, EisenbahnError> {
        transport
            .ensure_ipc_dir()
            .map_err(|e| EisenbahnError::Transport(e.to_string()))?;
        transport
            .remove_stale_socket()
            .map_err(|e| EisenbahnError::Transport(e.to_string()))?;
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding PUB socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl EventPublisher for ZmqPublisher {
    async fn publish(&self, message: Message) -> Result<(), EisenbahnError> {
        let topic = message.topic.clone();
        let envelope_bytes = message.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(topic.as_str());
        zmq_msg.push_back(envelope_bytes.into());

        let mut socket = self.socket.lock().await;
        socket.send(zmq_msg).await?;

        debug!(topic = %topic, "published message");
        Ok(())
    }
}

/// ZeroMQ SUB socket.
pub struct ZmqSubscriber {
    socket: Mutex<SubSocket>,
}

impl ZmqSubscriber {
    /// Connect to a bound PUB socket.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, EisenbahnError> {
        let mut socket = SubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting SUB socket");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl EventSubscriber for ZmqSubscriber {
    /// An empty prefix subscribes to every topic.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), EisenbahnError> {
        let mut socket = self.socket.lock().await;
        socket.subscribe(topic_prefix).await?;
        info!(topic_prefix = %topic_prefix, "subscribed to topic prefix");
        Ok(())
    }

    async fn recv(&self) -> Result<Message, EisenbahnError> {
        let mut socket = self.socket.lock().await;
        let zmq_msg = socket.recv().await?;

        // Expected: [topic, envelope]. A lone frame is treated as the envelope.
        let frames: Vec<_> = zmq_msg.iter().collect();
        let envelope: &[u8] = match frames.as_slice() {
            [_, envelope, ..] => envelope.as_ref(),
            [only] => only.as_ref(),
            [] => return Err(EisenbahnError::Transport("empty ZMQ message".into())),
        };

        let message = Message::from_bytes(envelope)?;
        debug!(topic = %message.topic, "received message");
        Ok(message)
    }
}
