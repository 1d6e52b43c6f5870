//! Session storage and snapshot fanout
//!
//! The store is the sole durable owner of session state. Besides plain
//! get/put/delete of full snapshots it keeps the set of active session ids and
//! a publish/subscribe topic per session, which is how one connection's
//! changes reach every other connection on the same session.
//!
//! There is no compare-and-swap here: `put` is a blind overwrite. Callers that
//! need read-modify-write consistency serialize their own access (see
//! `coordinator`).

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use async_trait::async_trait;
use log::warn;
use shared::{Session, SessionId};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("failed to encode or decode session: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Key-value backend holding session snapshots, keyed by session id
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Overwrites the whole record. Last writer wins.
    async fn put(&self, session: &Session) -> Result<(), StoreError>;

    /// Removes the record and drops the id from the active set
    async fn delete(&self, id: &SessionId) -> Result<(), StoreError>;

    async fn add_to_active(&self, id: &SessionId) -> Result<(), StoreError>;

    async fn remove_from_active(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Active sessions that still resolve to a record. Dangling ids are skipped.
    async fn list_active(&self) -> Result<Vec<Session>, StoreError>;

    /// Sends a snapshot to everyone currently subscribed to `id`. Nothing is
    /// retained for later subscribers.
    async fn publish(&self, id: &SessionId, session: &Session) -> Result<(), StoreError>;

    async fn subscribe(&self, id: &SessionId) -> Result<Subscription, StoreError>;
}

/// Snapshots published for one session from the moment of subscribing.
///
/// Backed by a bounded broadcast queue. A subscriber that falls behind loses
/// the oldest snapshots and resumes with newer ones, which is harmless since
/// every snapshot supersedes the previous one.
pub struct Subscription {
    session_id: SessionId,
    receiver: broadcast::Receiver<Session>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(session_id: SessionId, receiver: broadcast::Receiver<Session>) -> Self {
        Self {
            session_id,
            receiver,
            forwarder: None,
        }
    }

    /// A subscription fed by a background task; the task is aborted on drop
    pub fn with_forwarder(
        session_id: SessionId,
        receiver: broadcast::Receiver<Session>,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            session_id,
            receiver,
            forwarder: Some(forwarder),
        }
    }

    /// Waits for the next snapshot. Returns `None` once the topic is gone.
    pub async fn next(&mut self) -> Option<Session> {
        loop {
            match self.receiver.recv().await {
                Ok(session) => return Some(session),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscriber of session {} lagged, dropped {} stale snapshots",
                        self.session_id, skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
