//! Server network layer: TCP accept loop and WebSocket handshake
//!
//! Requests are routed by path during the upgrade:
//! - `/game/{session_id}` streams one session (see `connection`)
//! - `/active-sessions` sends the active session list once, then closes
//!
//! Both need a token, read from `Authorization: Bearer <token>` or from the
//! `token` query parameter for browsers that cannot set upgrade headers. Bad
//! paths are refused with 400 and unknown tokens with 401 before upgrading.

use futures_util::SinkExt;
use log::{debug, error, info, warn};
use shared::{Player, SessionId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::config::{ServerConfig, StoreBackend};
use crate::connection;
use crate::coordinator::Coordinator;
use crate::identity::IdentityProvider;
use crate::store::{MemoryStore, RedisStore, SessionStore, StoreError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Where an accepted upgrade goes next
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Game { session_id: SessionId, player: Player },
    ActiveSessions,
}

/// Why an upgrade was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    BadPath(String),
    Unauthorized,
}

impl Rejection {
    fn into_response(self) -> ErrorResponse {
        let (status, body) = match self {
            Rejection::BadPath(reason) => (StatusCode::BAD_REQUEST, reason),
            Rejection::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
        };
        let mut response = ErrorResponse::new(Some(body));
        *response.status_mut() = status;
        response
    }
}

/// Resolves an upgrade request to a route and the calling player
pub fn resolve(request: &Request, identities: &dyn IdentityProvider) -> Result<Route, Rejection> {
    let path = request.uri().path();
    let route = if path == "/active-sessions" {
        None
    } else if let Some(raw_id) = path.strip_prefix("/game/") {
        let session_id = Uuid::parse_str(raw_id.trim_end_matches('/'))
            .map_err(|_| Rejection::BadPath(format!("invalid session id {:?}", raw_id)))?;
        Some(session_id)
    } else {
        return Err(Rejection::BadPath(format!("unknown path {}", path)));
    };

    let token = bearer_token(request)
        .or_else(|| query_token(request))
        .ok_or(Rejection::Unauthorized)?;
    let player = identities.identify(&token).ok_or(Rejection::Unauthorized)?;

    Ok(match route {
        Some(session_id) => Route::Game { session_id, player },
        None => Route::ActiveSessions,
    })
}

fn bearer_token(request: &Request) -> Option<String> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn query_token(request: &Request) -> Option<String> {
    request
        .uri()
        .query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == "token" && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// WebSocket server for quiz sessions
pub struct Server {
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    identities: Arc<dyn IdentityProvider>,
    idle_timeout: Duration,
}

impl Server {
    /// Binds the listener and opens the store selected by `config`
    pub async fn bind(
        config: ServerConfig,
        identities: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ServerError> {
        let store: Arc<dyn SessionStore> = match &config.store {
            StoreBackend::Memory => Arc::new(MemoryStore::new(config.broadcast_capacity)),
            StoreBackend::Redis { url } => {
                info!("Connecting to Redis at {}", url);
                Arc::new(RedisStore::connect(url, config.broadcast_capacity).await?)
            }
        };
        Self::with_store(config, identities, store).await
    }

    pub async fn with_store(
        config: ServerConfig,
        identities: Arc<dyn IdentityProvider>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            coordinator: Arc::new(Coordinator::new(store, config.worker_idle)),
            identities,
            idle_timeout: config.idle_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Accepts connections until the task is dropped
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            debug!("Accepted TCP connection from {}", addr);

            let coordinator = Arc::clone(&self.coordinator);
            let identities = Arc::clone(&self.identities);
            let idle_timeout = self.idle_timeout;
            tokio::spawn(async move {
                handle_socket(stream, addr, coordinator, identities, idle_timeout).await;
            });
        }
    }
}

async fn handle_socket(
    stream: TcpStream,
    addr: SocketAddr,
    coordinator: Arc<Coordinator>,
    identities: Arc<dyn IdentityProvider>,
    idle_timeout: Duration,
) {
    let mut route = None;
    let callback = |request: &Request, response: Response| {
        match resolve(request, identities.as_ref()) {
            Ok(resolved) => {
                route = Some(resolved);
                Ok(response)
            }
            Err(rejection) => {
                warn!("Refusing upgrade from {}: {:?}", addr, rejection);
                Err(rejection.into_response())
            }
        }
    };

    let socket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    match route {
        Some(Route::Game { session_id, player }) => {
            info!(
                "Player {} ({}) connected from {} to session {}",
                player.id, player.username, addr, session_id
            );
            connection::serve(socket, coordinator, session_id, player, idle_timeout).await;
        }
        Some(Route::ActiveSessions) => send_active_sessions(socket, &coordinator).await,
        None => {}
    }
}

async fn send_active_sessions(mut socket: WebSocketStream<TcpStream>, coordinator: &Coordinator) {
    let listing = coordinator
        .active_sessions()
        .await
        .map_err(|e| e.to_string())
        .and_then(|sessions| serde_json::to_string(&sessions).map_err(|e| e.to_string()));

    match listing {
        Ok(json) => {
            if let Err(e) = socket.send(Message::Text(json)).await {
                debug!("Failed to send active sessions: {}", e);
                return;
            }
        }
        Err(e) => error!("Failed to list active sessions: {}", e),
    }
    if let Err(e) = socket.close(None).await {
        debug!("Failed to close active sessions socket: {}", e);
    }
}
