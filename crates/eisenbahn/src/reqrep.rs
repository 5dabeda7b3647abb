//! Request/reply infrastructure using ZeroMQ DEALER/ROUTER sockets.
//!
//! - [`ZmqRequestClient`] wraps a DEALER socket; the scheduler holds one per site
//! - [`ZmqRequestServer`] wraps a ROUTER socket; each site agent binds one
//! - [`ReplyToken`] is an opaque handle carrying the ZMQ identity frame
//!
//! ## Framing (zeromq-rs 0.4)
//!
//! ROUTER pushes the peer identity as first frame on recv and pops it on send.
//! DEALER sends/receives raw application frames:
//! - DEALER sends: `[topic, envelope]`
//! - ROUTER receives: `[identity, topic, envelope]`
//! - ROUTER sends: `[identity, topic, envelope]`
//! - DEALER receives: `[topic, envelope]`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, RouterSocket, ZmqMessage};

use crate::error::EisenbahnError;
use crate::message::Message;
use crate::traits::{RequestHandler, RequestSender};
use crate::transport::Transport;

/// Opaque token carrying the ZMQ routing identity bytes.
///
/// Returned by [`RequestHandler::recv_request`] and passed back to
/// [`RequestHandler::send_reply`] so the reply reaches the right client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyToken {
    identity: Vec<u8>,
}

impl ReplyToken {
    pub fn new(identity: impl Into<Vec<u8>>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &[u8] {
        &self.identity
    }
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Message>>>>;

/// ZeroMQ DEALER-socket client for issuing requests and awaiting replies.
///
/// The socket is owned by a background task that multiplexes outbound
/// requests (fed through an mpsc channel) and inbound replies (dispatched by
/// `correlation_id`). Late replies for requests that already timed out are
/// dropped.
pub struct ZmqRequestClient {
    send_tx: mpsc::Sender<ZmqMessage>,
    pending: PendingMap,
    loop_handle: tokio::task::JoinHandle<()>,
}

impl ZmqRequestClient {
    /// Connect a DEALER socket to a ROUTER endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, EisenbahnError> {
        let mut socket = DealerSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting DEALER socket");
        socket.connect(&endpoint).await?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel::<ZmqMessage>(256);

        let loop_pending = Arc::clone(&pending);
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, send_rx, loop_pending).await;
        });

        Ok(Self {
            send_tx,
            pending,
            loop_handle,
        })
    }

    async fn event_loop(
        mut socket: DealerSocket,
        mut send_rx: mpsc::Receiver<ZmqMessage>,
        pending: PendingMap,
    ) {
        loop {
            tokio::select! {
                cmd = send_rx.recv() => {
                    match cmd {
                        Some(zmq_msg) => {
                            if let Err(e) = socket.send(zmq_msg).await {
                                warn!(error = %e, "DEALER send failed");
                            }
                        }
                        // Client handle dropped.
                        None => break,
                    }
                }
                result = socket.recv() => {
                    match result {
                        Ok(zmq_msg) => Self::dispatch_reply(&pending, zmq_msg).await,
                        Err(e) => {
                            debug!(error = %e, "DEALER recv loop ending");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Route an inbound reply to the caller waiting on its correlation id.
    async fn dispatch_reply(pending: &Mutex<HashMap<Uuid, oneshot::Sender<Message>>>, zmq_msg: ZmqMessage) {
        let frames: Vec<_> = zmq_msg.iter().collect();

        // Skip leading empty delimiter frames (depends on the ROUTER's framing).
        let data_frames: Vec<_> = frames
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();

        if data_frames.len() < 2 {
            warn!(
                raw_frame_count = frames.len(),
                data_frame_count = data_frames.len(),
                "unexpected frame count on DEALER recv"
            );
            return;
        }

        let message = match Message::from_bytes(data_frames[1].as_ref()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to decode reply envelope");
                return;
            }
        };

        let cid = message.correlation_id;
        match pending.lock().await.remove(&cid) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!(correlation_id = %cid, "dropping reply for unknown or expired request"),
        }
    }

    async fn enqueue_send(&self, msg: &Message) -> Result<(), EisenbahnError> {
        let envelope_bytes = msg.to_bytes()?;
        let mut zmq_msg = ZmqMessage::from(msg.topic.as_str());
        zmq_msg.push_back(envelope_bytes.into());

        self.send_tx
            .send(zmq_msg)
            .await
            .map_err(|_| EisenbahnError::Transport("client event loop closed".into()))
    }
}

impl Drop for ZmqRequestClient {
    fn drop(&mut self) {
        self.loop_handle.abort();
    }
}

#[async_trait]
impl RequestSender for ZmqRequestClient {
    async fn request(&self, msg: Message, timeout_dur: Duration) -> Result<Message, EisenbahnError> {
        let cid = msg.correlation_id;
        let (tx, rx) = oneshot::channel();

        self.pending.lock().await.insert(cid, tx);

        if let Err(e) = self.enqueue_send(&msg).await {
            self.pending.lock().await.remove(&cid);
            return Err(e);
        }
        debug!(correlation_id = %cid, topic = %msg.topic, "sent request");

        match tokio::time::timeout(timeout_dur, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&cid);
                Err(EisenbahnError::Transport(
                    "reply channel closed unexpectedly".into(),
                ))
            }
            Err(_) => {
                self.pending.lock().await.remove(&cid);
                Err(EisenbahnError::Timeout(timeout_dur))
            }
        }
    }
}

/// ZeroMQ ROUTER-socket server for receiving requests and sending replies.
pub struct ZmqRequestServer {
    socket: Mutex<RouterSocket>,
}

impl ZmqRequestServer {
    /// Bind a ROUTER socket on the given transport endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, EisenbahnError> {
        transport
            .ensure_ipc_dir()
            .map_err(|e| EisenbahnError::Transport(e.to_string()))?;
        transport
            .remove_stale_socket()
            .map_err(|e| EisenbahnError::Transport(e.to_string()))?;
        let mut socket = RouterSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding ROUTER socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl RequestHandler for ZmqRequestServer {
    async fn recv_request(&self) -> Result<(ReplyToken, Message), EisenbahnError> {
        let mut socket = self.socket.lock().await;
        let zmq_msg = socket.recv().await?;

        // [identity, ...whatever the DEALER sent]
        let frames: Vec<_> = zmq_msg.iter().collect();
        if frames.len() < 2 {
            return Err(EisenbahnError::Transport(format!(
                "expected at least 2 frames from ROUTER, got {}",
                frames.len()
            )));
        }

        let identity = frames[0].as_ref().to_vec();
        let data_frames: Vec<_> = frames[1..]
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();

        if data_frames.len() < 2 {
            return Err(EisenbahnError::Transport(format!(
                "expected [topic, envelope] after identity, got {} data frames",
                data_frames.len()
            )));
        }

        let message = Message::from_bytes(data_frames[1].as_ref())?;
        debug!(
            correlation_id = %message.correlation_id,
            topic = %message.topic,
            "received request"
        );

        Ok((ReplyToken { identity }, message))
    }

    async fn send_reply(&self, token: ReplyToken, reply: Message) -> Result<(), EisenbahnError> {
        let envelope_bytes = reply.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(token.identity);
        zmq_msg.push_back(reply.topic.as_bytes().to_vec().into());
        zmq_msg.push_back(envelope_bytes.into());

        let mut socket = self.socket.lock().await;
        socket.send(zmq_msg).await?;

        debug!(
            correlation_id = %reply.correlation_id,
            topic = %reply.topic,
            "sent reply"
        );
        Ok(())
    }
}
