//! Session coordinator
//!
//! Glues connections, the session store and the event engine together. Every
//! mutation of a session follows the same unit of work:
//!
//! ```text
//! session = store.get(id)
//! session' = game::apply(session, issuer, event)
//! store.put(session'); store.publish(id, session')
//! ```
//!
//! The store offers no compare-and-swap, so two units of work racing on one
//! session could each read the same snapshot and the second `put` would
//! silently discard the first. To close that gap within this process, each
//! session id gets a single worker task that owns an `mpsc` command queue and
//! runs units of work strictly one after another. Workers start on demand and
//! exit after sitting idle; a replacement waits for its predecessor to finish
//! draining before it touches the store.
//!
//! Separate server processes sharing one Redis are still last-writer-wins.

use chrono::Utc;
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{GameConfig, Player, PlayerId, Session, SessionEvent, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::game::{self, Transition};
use crate::problems;
use crate::store::{SessionStore, StoreError, Subscription};

const COMMAND_QUEUE_LEN: usize = 64;
const MAX_SEND_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session worker stopped before replying")]
    WorkerGone,
}

impl CoordinatorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoordinatorError::Store(StoreError::NotFound(_)))
    }
}

type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

enum Command {
    Join {
        player: Player,
        reply: Reply<Session>,
    },
    Leave {
        player_id: PlayerId,
        reply: Reply<Option<Session>>,
    },
    Apply {
        issuer: PlayerId,
        event: SessionEvent,
        reply: Reply<Transition>,
    },
    Close {
        reply: Reply<()>,
    },
}

struct WorkerHandle {
    sender: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

pub struct Coordinator {
    store: Arc<dyn SessionStore>,
    workers: Mutex<HashMap<SessionId, WorkerHandle>>,
    worker_idle: Duration,
}

impl Coordinator {
    pub fn new(store: Arc<dyn SessionStore>, worker_idle: Duration) -> Self {
        Self {
            store,
            workers: Mutex::new(HashMap::new()),
            worker_idle,
        }
    }

    /// Creates a fresh game and a waiting session for it, and lists it as active
    pub async fn create_session(
        &self,
        name: &str,
        config: GameConfig,
    ) -> Result<Session, CoordinatorError> {
        let problem_set = {
            let mut rng = rand::thread_rng();
            problems::generate(&config, &mut rng)
        };
        let session = Session::new(name, Uuid::new_v4(), config, problem_set);

        self.store.put(&session).await?;
        self.store.add_to_active(&session.id).await?;
        info!("Created session {} ({:?})", session.id, session.name);
        Ok(session)
    }

    /// Adds `player` to the roster unless already present, returning the
    /// resulting snapshot. Rejoining writes nothing.
    pub async fn join(&self, id: &SessionId, player: Player) -> Result<Session, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.submit(id, Command::Join { player, reply }, rx).await
    }

    /// Removes a player from the roster. Returns `None` when there was nothing
    /// to remove, so repeated calls are harmless.
    pub async fn leave(
        &self,
        id: &SessionId,
        player_id: PlayerId,
    ) -> Result<Option<Session>, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.submit(id, Command::Leave { player_id, reply }, rx).await
    }

    /// Runs one event through the engine against the latest stored snapshot
    pub async fn dispatch(
        &self,
        id: &SessionId,
        issuer: PlayerId,
        event: SessionEvent,
    ) -> Result<Transition, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.submit(
            id,
            Command::Apply {
                issuer,
                event,
                reply,
            },
            rx,
        )
        .await
    }

    /// Deletes the session record and its active-set entry
    pub async fn close_session(&self, id: &SessionId) -> Result<(), CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.submit(id, Command::Close { reply }, rx).await
    }

    pub async fn subscribe(&self, id: &SessionId) -> Result<Subscription, CoordinatorError> {
        Ok(self.store.subscribe(id).await?)
    }

    pub async fn active_sessions(&self) -> Result<Vec<Session>, CoordinatorError> {
        Ok(self.store.list_active().await?)
    }

    /// Number of session workers currently accepting commands
    pub fn live_workers(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|w| !w.sender.is_closed())
            .count()
    }

    async fn submit<T>(
        &self,
        id: &SessionId,
        mut command: Command,
        reply: oneshot::Receiver<Result<T, CoordinatorError>>,
    ) -> Result<T, CoordinatorError> {
        for _ in 0..MAX_SEND_ATTEMPTS {
            let sender = self.sender_for(id);
            match sender.send(command).await {
                Ok(()) => return reply.await.unwrap_or(Err(CoordinatorError::WorkerGone)),
                // The worker shut down between lookup and send; retry on a fresh one.
                Err(mpsc::error::SendError(returned)) => command = returned,
            }
        }
        Err(CoordinatorError::WorkerGone)
    }

    fn sender_for(&self, id: &SessionId) -> mpsc::Sender<Command> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = workers.get(id) {
            if !worker.sender.is_closed() {
                return worker.sender.clone();
            }
        }

        let predecessor = workers.remove(id).map(|w| w.task);
        workers.retain(|_, w| !w.task.is_finished());

        let (sender, commands) = mpsc::channel(COMMAND_QUEUE_LEN);
        let worker = SessionWorker {
            session_id: *id,
            store: Arc::clone(&self.store),
            rng: StdRng::from_entropy(),
        };
        let task = tokio::spawn(worker.run(commands, self.worker_idle, predecessor));
        debug!("Started worker for session {}", id);

        workers.insert(
            *id,
            WorkerHandle {
                sender: sender.clone(),
                task,
            },
        );
        sender
    }
}

/// Single writer for one session id
struct SessionWorker {
    session_id: SessionId,
    store: Arc<dyn SessionStore>,
    rng: StdRng,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        idle: Duration,
        predecessor: Option<JoinHandle<()>>,
    ) {
        if let Some(previous) = predecessor {
            let _ = previous.await;
        }

        loop {
            match tokio::time::timeout(idle, commands.recv()).await {
                Ok(Some(command)) => self.handle(command).await,
                Ok(None) => break,
                Err(_) => {
                    // Refuse new commands, then finish whatever is already queued.
                    commands.close();
                    while let Some(command) = commands.recv().await {
                        self.handle(command).await;
                    }
                    break;
                }
            }
        }
        debug!("Worker for session {} stopped", self.session_id);
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Join { player, reply } => {
                let _ = reply.send(self.join(player).await);
            }
            Command::Leave { player_id, reply } => {
                let _ = reply.send(self.leave(player_id).await);
            }
            Command::Apply {
                issuer,
                event,
                reply,
            } => {
                let _ = reply.send(self.apply(issuer, event).await);
            }
            Command::Close { reply } => {
                let result = self.store.delete(&self.session_id).await.map_err(Into::into);
                if result.is_ok() {
                    info!("Closed session {}", self.session_id);
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn join(&mut self, player: Player) -> Result<Session, CoordinatorError> {
        let mut session = self.store.get(&self.session_id).await?;
        if session.has_player(&player.id) {
            debug!(
                "Player {} rejoined session {}, roster unchanged",
                player.id, self.session_id
            );
            return Ok(session);
        }

        info!(
            "Player {} ({}) joined session {}",
            player.id, player.username, self.session_id
        );
        let player_id = player.id;
        session.players.push(player);
        self.store.put(&session).await?;

        let announced = match self.store.add_to_active(&session.id).await {
            Ok(()) => self.store.publish(&session.id, &session).await,
            Err(e) => Err(e),
        };
        if let Err(e) = announced {
            // A failed join leaves the stored roster as it was.
            error!(
                "Join of player {} to session {} failed after write, rolling back: {}",
                player_id, self.session_id, e
            );
            session.players.retain(|p| p.id != player_id);
            if let Err(undo) = self.store.put(&session).await {
                error!(
                    "Failed to roll back roster of session {}: {}",
                    self.session_id, undo
                );
            }
            return Err(e.into());
        }
        Ok(session)
    }

    async fn leave(&mut self, player_id: PlayerId) -> Result<Option<Session>, CoordinatorError> {
        let mut session = match self.store.get(&self.session_id).await {
            Ok(session) => session,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let before = session.players.len();
        session.players.retain(|p| p.id != player_id);
        if session.players.len() == before {
            return Ok(None);
        }

        info!("Player {} left session {}", player_id, self.session_id);
        self.persist(&session).await?;
        if session.players.is_empty() {
            self.store.remove_from_active(&session.id).await?;
            info!(
                "Session {} has no players, removed from active sessions",
                self.session_id
            );
        }
        Ok(Some(session))
    }

    async fn apply(
        &mut self,
        issuer: PlayerId,
        event: SessionEvent,
    ) -> Result<Transition, CoordinatorError> {
        let session = self.store.get(&self.session_id).await?;
        let transition = game::apply(&session, &issuer, &event, Utc::now(), &mut self.rng);

        match &transition {
            Transition::Applied(next) => {
                self.persist(next).await?;
                debug!(
                    "Applied {} from {} to session {} (problem {}/{}, {:?})",
                    event.name(),
                    issuer,
                    self.session_id,
                    next.current_problem_index,
                    next.problems.len(),
                    next.status
                );
            }
            Transition::Ignored(reason) => {
                debug!(
                    "Ignored {} from {} on session {}: {}",
                    event.name(),
                    issuer,
                    self.session_id,
                    reason
                );
            }
        }
        Ok(transition)
    }

    async fn persist(&self, session: &Session) -> Result<(), CoordinatorError> {
        if let Err(e) = self.store.put(session).await {
            error!("Failed to store session {}: {}", session.id, e);
            return Err(e.into());
        }
        self.store.publish(&session.id, session).await?;
        Ok(())
    }
}
