//! Connection management for WebSocket clients.
//!
//! Each connection owns a bounded outbound queue drained by a writer task,
//! so delivering a message never waits on a slow socket. A client that lets
//! its queue fill up is disconnected instead of buffering without limit. The
//! manager maps participant ids to those queues.

use crate::dispatch::{Dispatcher, Outcome, Session};
use crate::error::ServerError;
use crate::messaging::{ClientMessage, ServerMessage};
use arena_core::{Participant, ParticipantId, ResourceId, ShutdownNotifier};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Messages a connection may have queued before it counts as too slow.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// An individual client connection.
#[derive(Debug)]
pub struct ClientConnection {
    pub remote_addr: SocketAddr,
    pub connected_at: SystemTime,
    sender: mpsc::Sender<ServerMessage>,
    /// Signalled when the connection is dropped for falling behind
    kick: Arc<Notify>,
}

/// Receiving side handed to a connection's task by [`ConnectionManager::register`].
#[derive(Debug)]
pub struct Outbound {
    pub messages: mpsc::Receiver<ServerMessage>,
    pub kicked: Arc<Notify>,
}

/// Registry of live connections keyed by participant id.
#[derive(Debug)]
pub struct ConnectionManager {
    connections: DashMap<ParticipantId, ClientConnection>,
    queue_capacity: usize,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::with_queue_capacity(OUTBOUND_QUEUE_CAPACITY)
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager whose per-connection queues hold `capacity` messages.
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity: capacity.max(1),
        }
    }

    /// Adds a connection and returns the receiving end of its outbound queue.
    pub fn register(&self, participant_id: ParticipantId, remote_addr: SocketAddr) -> Outbound {
        let (sender, messages) = mpsc::channel(self.queue_capacity);
        let kicked = Arc::new(Notify::new());
        self.connections.insert(
            participant_id,
            ClientConnection {
                remote_addr,
                connected_at: SystemTime::now(),
                sender,
                kick: kicked.clone(),
            },
        );
        Outbound { messages, kicked }
    }

    /// Drops a connection, closing its outbound queue.
    pub fn remove(&self, participant_id: ParticipantId) -> bool {
        self.connections.remove(&participant_id).is_some()
    }

    /// Queues a message for one participant. Returns whether it was queued.
    ///
    /// A participant whose queue is full is disconnected and the message is
    /// dropped.
    pub fn send(&self, participant_id: ParticipantId, message: ServerMessage) -> bool {
        let full = match self.connections.get(&participant_id) {
            Some(connection) => match connection.sender.try_send(message) {
                Ok(()) => return true,
                Err(TrySendError::Closed(_)) => return false,
                Err(TrySendError::Full(_)) => true,
            },
            None => return false,
        };

        if full {
            self.drop_slow(participant_id);
        }
        false
    }

    fn drop_slow(&self, participant_id: ParticipantId) {
        if let Some((_, connection)) = self.connections.remove(&participant_id) {
            warn!(
                "🐌 Disconnecting {} from {}: outbound queue full ({} messages)",
                participant_id, connection.remote_addr, self.queue_capacity
            );
            connection.kick.notify_one();
        }
    }

    /// Delivers the replies of `outcome` to `sender` and its broadcasts to
    /// their recipients.
    pub fn deliver(&self, sender: ParticipantId, outcome: Outcome) {
        for reply in outcome.replies {
            self.send(sender, reply);
        }
        for broadcast in outcome.broadcasts {
            for recipient in broadcast.recipients {
                if !self.send(recipient, broadcast.message.clone()) {
                    debug!("Dropped message for disconnected participant {}", recipient);
                }
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_connected(&self, participant_id: ParticipantId) -> bool {
        self.connections.contains_key(&participant_id)
    }
}

#[async_trait]
impl ShutdownNotifier for ConnectionManager {
    async fn notify_shutdown(
        &self,
        resource_id: &ResourceId,
        participants: &[Participant],
        reason: &str,
    ) {
        for participant in participants {
            let message = ServerMessage::GameShutdown {
                game_id: resource_id.clone(),
                reason: reason.to_string(),
            };
            if !self.send(participant.id, message) {
                warn!(
                    "Could not notify {} about shutdown of {}",
                    participant.display_name, resource_id
                );
            }
        }
    }
}

/// Serves one client from WebSocket handshake to close.
///
/// The participant is removed exactly once when the socket goes away,
/// whichever way that happens.
pub async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    connections: Arc<ConnectionManager>,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;
    let (mut ws_sink, mut ws_receiver) = ws_stream.split();

    let mut session = Session::new(ParticipantId::new());
    let participant_id = session.participant_id();
    let Outbound {
        messages: mut outbound,
        kicked,
    } = connections.register(participant_id, remote_addr);
    info!("🔗 Connection {} established from {}", participant_id, remote_addr);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode message for {}: {}", participant_id, e);
                    continue;
                }
            };
            if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                debug!("Write to {} failed: {}", participant_id, e);
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let mut too_slow = false;
    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = kicked.notified() => {
                too_slow = true;
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };

        match frame {
            Ok(Message::Text(text)) => {
                let outcome = match ClientMessage::parse(text.as_str()) {
                    Ok(message) => dispatcher.dispatch(&mut session, message).await,
                    Err(e) => {
                        debug!("Rejected frame from {}: {}", participant_id, e);
                        Outcome::reply(ServerMessage::error(e.to_string(), 400))
                    }
                };
                connections.deliver(participant_id, outcome);
            }
            Ok(Message::Binary(_)) => {
                connections.send(
                    participant_id,
                    ServerMessage::error("Binary frames are not supported", 400),
                );
            }
            Ok(Message::Close(_)) => {
                debug!("Connection {} requested close", participant_id);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error for connection {}: {}", participant_id, e);
                break;
            }
        }
    }

    let farewell = dispatcher.disconnect(&mut session).await;
    connections.remove(participant_id);
    connections.deliver(participant_id, farewell);

    // A client that stopped reading may never let the writer finish
    if too_slow {
        writer.abort();
    }
    match writer.await {
        Err(e) if !e.is_cancelled() => {
            warn!("Writer task for {} ended abnormally", participant_id)
        }
        _ => {}
    }

    info!("🔌 Connection {} from {} closed", participant_id, remote_addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Broadcast;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_deliver_routes_replies_and_broadcasts() {
        let manager = ConnectionManager::new();
        let (a, b) = (ParticipantId::new(), ParticipantId::new());
        let mut rx_a = manager.register(a, addr()).messages;
        let mut rx_b = manager.register(b, addr()).messages;

        let outcome = Outcome {
            replies: vec![ServerMessage::error("only for a", 400)],
            broadcasts: vec![Broadcast {
                recipients: vec![a, b],
                message: ServerMessage::PlayerLeft { player_id: a },
            }],
        };
        manager.deliver(a, outcome);

        assert!(matches!(rx_a.recv().await, Some(ServerMessage::Error { .. })));
        assert!(matches!(rx_a.recv().await, Some(ServerMessage::PlayerLeft { .. })));
        assert!(matches!(rx_b.recv().await, Some(ServerMessage::PlayerLeft { .. })));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_closes_queue() {
        let manager = ConnectionManager::new();
        let id = ParticipantId::new();
        let mut rx = manager.register(id, addr()).messages;
        assert_eq!(manager.connection_count(), 1);

        assert!(manager.remove(id));
        assert!(!manager.remove(id));
        assert!(!manager.send(id, ServerMessage::error("gone", 404)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_notice() {
        let manager = ConnectionManager::new();
        let id = ParticipantId::new();
        let mut rx = manager.register(id, addr()).messages;

        let participants = vec![Participant::new(id, "alice")];
        manager
            .notify_shutdown(&"arena-1".into(), &participants, "Server restart")
            .await;

        match rx.recv().await {
            Some(ServerMessage::GameShutdown { game_id, reason }) => {
                assert_eq!(game_id.as_str(), "arena-1");
                assert_eq!(reason, "Server restart");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_queue_disconnects_slow_client() {
        let manager = ConnectionManager::with_queue_capacity(3);
        let (slow, fast) = (ParticipantId::new(), ParticipantId::new());
        let Outbound {
            messages: mut slow_rx,
            kicked,
        } = manager.register(slow, addr());
        let mut fast_rx = manager.register(fast, addr()).messages;

        for n in 0..3 {
            assert!(manager.send(slow, ServerMessage::error(format!("m{n}"), 400)));
        }
        // The fourth message does not fit and costs the client its connection
        assert!(!manager.send(slow, ServerMessage::error("overflow", 400)));
        assert!(!manager.is_connected(slow));
        assert!(!manager.send(slow, ServerMessage::error("after", 400)));

        // Kick is delivered even though nobody was waiting yet
        tokio::time::timeout(std::time::Duration::from_secs(1), kicked.notified())
            .await
            .unwrap();

        let mut queued = 0;
        while slow_rx.recv().await.is_some() {
            queued += 1;
        }
        assert_eq!(queued, 3);

        // Other clients are unaffected
        assert!(manager.send(fast, ServerMessage::error("still here", 400)));
        assert!(fast_rx.recv().await.is_some());
        assert_eq!(manager.connection_count(), 1);
    }
}
