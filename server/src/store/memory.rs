use async_trait::async_trait;
use log::debug;
use shared::{Session, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use super::{SessionStore, StoreError, Subscription};

/// In-process store used by default and in tests.
///
/// Records, the active set and the topics sit behind one mutex that is only
/// ever held for a synchronous section, never across an await.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    topic_capacity: usize,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    active: HashSet<SessionId>,
    topics: HashMap<SessionId, broadcast::Sender<Session>>,
}

impl MemoryStore {
    /// `topic_capacity` bounds each subscriber's queue of pending snapshots
    pub fn new(topic_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            topic_capacity: topic_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live subscribers on a session topic
    pub fn subscriber_count(&self, id: &SessionId) -> usize {
        self.lock()
            .topics
            .get(id)
            .map(|topic| topic.receiver_count())
            .unwrap_or(0)
    }

    pub fn is_active(&self, id: &SessionId) -> bool {
        self.lock().active.contains(id)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.lock()
            .sessions
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        self.lock().sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.sessions.remove(id);
        inner.active.remove(id);
        // Dropping the sender ends every open subscription on this session.
        inner.topics.remove(id);
        Ok(())
    }

    async fn add_to_active(&self, id: &SessionId) -> Result<(), StoreError> {
        self.lock().active.insert(*id);
        Ok(())
    }

    async fn remove_from_active(&self, id: &SessionId) -> Result<(), StoreError> {
        self.lock().active.remove(id);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Session>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .active
            .iter()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect())
    }

    async fn publish(&self, id: &SessionId, session: &Session) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let Some(topic) = inner.topics.get(id) else {
            return Ok(());
        };
        if topic.send(session.clone()).is_err() {
            debug!("No subscribers left on session {}, dropping topic", id);
            inner.topics.remove(id);
        }
        Ok(())
    }

    async fn subscribe(&self, id: &SessionId) -> Result<Subscription, StoreError> {
        let capacity = self.topic_capacity;
        let receiver = self
            .lock()
            .topics
            .entry(*id)
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe();
        Ok(Subscription::new(*id, receiver))
    }
}
