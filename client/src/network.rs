//! WebSocket connection to a quiz session

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{Session, SessionEvent, SessionId};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("server refused the connection with HTTP {0}")]
    Rejected(u16),
    #[error("invalid token")]
    InvalidToken,
    #[error("undecodable message from server: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Close code and reason sent by the server when it ended the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

async fn open(url: &str, token: &str) -> Result<Socket, ClientError> {
    let mut request = url.into_client_request()?;
    let bearer =
        HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| ClientError::InvalidToken)?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    match tokio_tungstenite::connect_async(request).await {
        Ok((socket, _)) => Ok(socket),
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            Err(ClientError::Rejected(response.status().as_u16()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetches the list of active sessions from `server` (host:port)
pub async fn fetch_active_sessions(server: &str, token: &str) -> Result<Vec<Session>, ClientError> {
    let mut socket = open(&format!("ws://{}/active-sessions", server), token).await?;
    let mut sessions = Vec::new();
    while let Some(frame) = socket.next().await {
        match frame? {
            Message::Text(text) => sessions = serde_json::from_str(&text)?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(sessions)
}

/// Outbound half: sends session events
pub struct EventSender {
    sink: SplitSink<Socket, Message>,
}

impl EventSender {
    pub async fn send(&mut self, event: &SessionEvent) -> Result<(), ClientError> {
        debug!("Sending {}", event.name());
        self.send_text(event.to_json()).await
    }

    /// Sends an arbitrary text frame, bypassing event encoding
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), ClientError> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.sink.send(Message::Close(None)).await?;
        Ok(())
    }
}

/// Inbound half: yields session snapshots
pub struct SnapshotStream {
    stream: SplitStream<Socket>,
    closed: Option<CloseInfo>,
}

impl SnapshotStream {
    /// Next snapshot from the server, or `None` once the stream has ended
    pub async fn next_snapshot(&mut self) -> Result<Option<Session>, ClientError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<Session>(&text) {
                    Ok(session) => return Ok(Some(session)),
                    Err(e) => warn!("Ignoring undecodable snapshot: {}", e),
                },
                Message::Close(frame) => {
                    self.closed = frame.map(|f| CloseInfo {
                        code: u16::from(f.code),
                        reason: f.reason.into_owned(),
                    });
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Why the server closed the stream, if it said so
    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.closed.as_ref()
    }
}

/// A player's connection to one session
pub struct QuizConnection {
    events: EventSender,
    snapshots: SnapshotStream,
}

impl QuizConnection {
    /// Connects to `ws://{server}/game/{session_id}` authenticating with `token`
    pub async fn connect(
        server: &str,
        session_id: &SessionId,
        token: &str,
    ) -> Result<Self, ClientError> {
        let url = format!("ws://{}/game/{}", server, session_id);
        let socket = open(&url, token).await?;
        info!("Connected to session {} on {}", session_id, server);

        let (sink, stream) = socket.split();
        Ok(Self {
            events: EventSender { sink },
            snapshots: SnapshotStream {
                stream,
                closed: None,
            },
        })
    }

    pub async fn send(&mut self, event: &SessionEvent) -> Result<(), ClientError> {
        self.events.send(event).await
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), ClientError> {
        self.events.send_text(text).await
    }

    pub async fn next_snapshot(&mut self) -> Result<Option<Session>, ClientError> {
        self.snapshots.next_snapshot().await
    }

    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.snapshots.close_info()
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.events.close().await
    }

    /// Splits into halves that can be driven from separate tasks
    pub fn into_split(self) -> (EventSender, SnapshotStream) {
        (self.events, self.snapshots)
    }
}
