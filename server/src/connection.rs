//! Per-client connection handling
//!
//! A connection moves through `Connecting → Joined → Streaming → Closed`.
//! The handshake (Connecting) is done by `network`; this module takes over
//! with an upgraded socket, a resolved player and a session id.
//!
//! While streaming, a reader task turns inbound text frames into session
//! events and a writer task forwards every published snapshot to the client.
//! Whichever finishes first ends the connection and the other is aborted,
//! except that an idle or failed reader first has the writer send a close frame.
//! Roster cleanup is owned by a [`Membership`] guard so it happens exactly
//! once however the connection ends.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{Player, PlayerId, Session, SessionEvent, SessionId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::coordinator::Coordinator;
use crate::store::Subscription;

/// How long the writer gets to deliver a close frame before it is aborted
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
type WsStream<S> = SplitStream<WebSocketStream<S>>;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    ClientClosed,
    IdleTimeout,
    SessionClosed,
    Transport(String),
    Dispatch(String),
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::ClientClosed => write!(f, "client closed the connection"),
            Disconnect::IdleTimeout => write!(f, "idle timeout"),
            Disconnect::SessionClosed => write!(f, "session closed"),
            Disconnect::Transport(e) => write!(f, "transport error: {}", e),
            Disconnect::Dispatch(e) => write!(f, "dispatch failed: {}", e),
        }
    }
}

impl Disconnect {
    /// Close frame the server sends when it ends the connection itself
    fn close_frame(&self) -> Option<(CloseCode, &'static str)> {
        match self {
            Disconnect::IdleTimeout => Some((CloseCode::Away, "idle timeout")),
            Disconnect::Dispatch(_) => Some((CloseCode::Error, "failed to apply event")),
            Disconnect::ClientClosed | Disconnect::SessionClosed | Disconnect::Transport(_) => {
                None
            }
        }
    }
}

/// Holds a player's place in a session roster.
///
/// `release` removes the player through the coordinator. If the guard is
/// dropped without a completed release, the leave is spawned onto the runtime
/// instead. Leaving is idempotent, so a release interrupted halfway and then
/// repeated from `Drop` is harmless.
pub struct Membership {
    coordinator: Arc<Coordinator>,
    session_id: SessionId,
    player_id: PlayerId,
    released: bool,
}

impl Membership {
    pub fn new(coordinator: Arc<Coordinator>, session_id: SessionId, player_id: PlayerId) -> Self {
        Self {
            coordinator,
            session_id,
            player_id,
            released: false,
        }
    }

    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        leave(&self.coordinator, self.session_id, self.player_id).await;
        self.released = true;
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No runtime to remove player {} from session {}",
                self.player_id, self.session_id
            );
            return;
        };
        let coordinator = Arc::clone(&self.coordinator);
        let (session_id, player_id) = (self.session_id, self.player_id);
        runtime.spawn(async move {
            leave(&coordinator, session_id, player_id).await;
        });
    }
}

async fn leave(coordinator: &Coordinator, session_id: SessionId, player_id: PlayerId) {
    match coordinator.leave(&session_id, player_id).await {
        Ok(Some(_)) => debug!("Removed player {} from session {}", player_id, session_id),
        Ok(None) => {}
        Err(e) => error!(
            "Failed to remove player {} from session {}: {}",
            player_id, session_id, e
        ),
    }
}

/// Drives one upgraded socket until it closes.
///
/// Subscribes before joining so that no snapshot published after the join
/// can be missed; the join snapshot itself may therefore arrive twice.
pub async fn serve<S>(
    socket: WebSocketStream<S>,
    coordinator: Arc<Coordinator>,
    session_id: SessionId,
    player: Player,
    idle_timeout: Duration,
) -> Disconnect
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, stream) = socket.split();
    let player_id = player.id;

    let subscription = match coordinator.subscribe(&session_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!("Failed to subscribe to session {}: {}", session_id, e);
            refuse(&mut sink, CloseCode::Error, "session unavailable").await;
            return Disconnect::Dispatch(e.to_string());
        }
    };

    let snapshot = match coordinator.join(&session_id, player).await {
        Ok(snapshot) => snapshot,
        Err(e) if e.is_not_found() => {
            warn!("Player {} asked for unknown session {}", player_id, session_id);
            refuse(&mut sink, CloseCode::Policy, "session not found").await;
            return Disconnect::Dispatch(e.to_string());
        }
        Err(e) => {
            error!("Player {} failed to join session {}: {}", player_id, session_id, e);
            refuse(&mut sink, CloseCode::Error, "failed to join session").await;
            return Disconnect::Dispatch(e.to_string());
        }
    };

    let mut membership = Membership::new(Arc::clone(&coordinator), session_id, player_id);
    info!("Player {} is streaming session {}", player_id, session_id);

    let reason = match send_snapshot(&mut sink, &snapshot).await {
        Ok(()) => {
            stream_until_closed(
                sink,
                stream,
                subscription,
                coordinator,
                session_id,
                player_id,
                idle_timeout,
            )
            .await
        }
        Err(reason) => reason,
    };

    membership.release().await;
    info!(
        "Player {} disconnected from session {}: {}",
        player_id, session_id, reason
    );
    reason
}

async fn stream_until_closed<S>(
    sink: WsSink<S>,
    stream: WsStream<S>,
    subscription: Subscription,
    coordinator: Arc<Coordinator>,
    session_id: SessionId,
    player_id: PlayerId,
    idle_timeout: Duration,
) -> Disconnect
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = tokio::spawn(read_events(
        stream,
        coordinator,
        session_id,
        player_id,
        idle_timeout,
    ));
    let (close_tx, close_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_snapshots(sink, subscription, close_rx));

    tokio::select! {
        result = &mut reader => {
            let reason = result
                .unwrap_or_else(|e| Disconnect::Transport(format!("reader task failed: {}", e)));
            match reason.close_frame() {
                Some(frame) => {
                    let _ = close_tx.send(frame);
                    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                        writer.abort();
                    }
                }
                None => writer.abort(),
            }
            reason
        }
        result = &mut writer => {
            reader.abort();
            result.unwrap_or_else(|e| Disconnect::Transport(format!("writer task failed: {}", e)))
        }
    }
}

async fn read_events<S>(
    mut stream: WsStream<S>,
    coordinator: Arc<Coordinator>,
    session_id: SessionId,
    player_id: PlayerId,
    idle_timeout: Duration,
) -> Disconnect
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Err(_) => return Disconnect::IdleTimeout,
            Ok(None) => return Disconnect::ClientClosed,
            Ok(Some(Err(e))) => return Disconnect::Transport(e.to_string()),
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => return Disconnect::ClientClosed,
            Message::Binary(_) => {
                warn!("Dropping binary frame from player {}", player_id);
                continue;
            }
            // Pings are answered by tungstenite itself.
            _ => continue,
        };

        let event = match SessionEvent::decode(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping frame from player {}: {}", player_id, e);
                continue;
            }
        };

        if let Err(e) = coordinator.dispatch(&session_id, player_id, event).await {
            error!(
                "Failed to apply event from player {} to session {}: {}",
                player_id, session_id, e
            );
            return Disconnect::Dispatch(e.to_string());
        }
    }
}

/// Forwards snapshots until the topic ends or the reader asks for a close
async fn write_snapshots<S>(
    mut sink: WsSink<S>,
    mut subscription: Subscription,
    mut close: oneshot::Receiver<(CloseCode, &'static str)>,
) -> Disconnect
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            next = subscription.next() => match next {
                Some(session) => {
                    if let Err(reason) = send_snapshot(&mut sink, &session).await {
                        return reason;
                    }
                }
                None => {
                    refuse(&mut sink, CloseCode::Away, "session closed").await;
                    return Disconnect::SessionClosed;
                }
            },
            requested = &mut close => {
                if let Ok((code, reason)) = requested {
                    refuse(&mut sink, code, reason).await;
                }
                return Disconnect::ClientClosed;
            }
        }
    }
}

async fn send_snapshot<S>(sink: &mut WsSink<S>, session: &Session) -> Result<(), Disconnect>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let json =
        serde_json::to_string(session).map_err(|e| Disconnect::Transport(e.to_string()))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| Disconnect::Transport(e.to_string()))
}

/// Sends a close frame, ignoring a peer that is already gone
async fn refuse<S>(sink: &mut WsSink<S>, code: CloseCode, reason: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.to_owned().into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!("Could not send close frame: {}", e);
    }
}
