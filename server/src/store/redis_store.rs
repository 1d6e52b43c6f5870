use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use shared::{Session, SessionId};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{SessionStore, StoreError, Subscription};

const ACTIVE_SESSIONS_KEY: &str = "active_game_sessions";

/// Record key and pub/sub channel share the same name
fn session_key(id: &SessionId) -> String {
    format!("game_session:{}", id)
}

/// Redis-backed store.
///
/// Records are JSON strings under `game_session:{id}`, active ids live in the
/// `active_game_sessions` set, and snapshots are published on a channel named
/// after the record key. Each subscription opens its own pub/sub connection.
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    topic_capacity: usize,
}

impl RedisStore {
    pub async fn connect(url: &str, topic_capacity: usize) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            topic_capacity: topic_capacity.max(1),
        })
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(session_key(id)).await?;
        let raw = raw.ok_or(StoreError::NotFound(*id))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        let json = serde_json::to_string(session)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(session_key(&session.id), json).await?;
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(session_key(id))
            .srem(ACTIVE_SESSIONS_KEY, id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn add_to_active(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(ACTIVE_SESSIONS_KEY, id.to_string()).await?;
        Ok(())
    }

    async fn remove_from_active(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(ACTIVE_SESSIONS_KEY, id.to_string()).await?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Session>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(ACTIVE_SESSIONS_KEY).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for raw_id in ids {
            let Ok(id) = Uuid::parse_str(&raw_id) else {
                debug!("Skipping malformed active session id {:?}", raw_id);
                continue;
            };
            match self.get(&id).await {
                Ok(session) => sessions.push(session),
                Err(StoreError::NotFound(_)) | Err(StoreError::Codec(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(sessions)
    }

    async fn publish(&self, id: &SessionId, session: &Session) -> Result<(), StoreError> {
        let json = serde_json::to_string(session)?;
        let mut conn = self.conn.clone();
        let _: () = conn.publish(session_key(id), json).await?;
        Ok(())
    }

    async fn subscribe(&self, id: &SessionId) -> Result<Subscription, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(session_key(id)).await?;

        let (tx, rx) = broadcast::channel(self.topic_capacity);
        let session_id = *id;
        let forwarder = tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Unreadable pub/sub payload on session {}: {}", session_id, e);
                        continue;
                    }
                };
                match serde_json::from_str::<Session>(&payload) {
                    Ok(session) => {
                        if tx.send(session).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Undecodable snapshot on session {}: {}", session_id, e),
                }
            }
            debug!("Pub/sub stream for session {} ended", session_id);
        });

        Ok(Subscription::with_forwarder(*id, rx, forwarder))
    }
}
