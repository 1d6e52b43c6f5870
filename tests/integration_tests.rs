//! Integration tests for the quiz session server
//!
//! These tests run a real server on an ephemeral port with the in-memory
//! store and drive it through the client crate.

use client::network::{fetch_active_sessions, ClientError, QuizConnection};
use server::config::ServerConfig;
use server::coordinator::Coordinator;
use server::identity::StaticIdentities;
use server::network::Server;
use server::store::{MemoryStore, SessionStore};
use shared::{GameConfig, Operation, Player, Problem, Session, SessionEvent, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(2);

struct TestServer {
    addr: String,
    store: Arc<MemoryStore>,
    coordinator: Arc<Coordinator>,
    players: Vec<Player>,
    task: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    /// Starts a server accepting tokens `token-0`, `token-1`, ... for `names`
    async fn start(names: &[&str]) -> Self {
        Self::start_with(ServerConfig::for_tests(), names).await
    }

    async fn start_with(config: ServerConfig, names: &[&str]) -> Self {
        let mut identities = StaticIdentities::new();
        let players = names
            .iter()
            .enumerate()
            .map(|(i, name)| identities.register(format!("token-{}", i), *name))
            .collect();

        let store = Arc::new(MemoryStore::new(config.broadcast_capacity));
        let server = Server::with_store(config, Arc::new(identities), store.clone())
            .await
            .expect("server should bind");
        let addr = server.local_addr().unwrap().to_string();
        let coordinator = server.coordinator();
        let task = tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            store,
            coordinator,
            players,
            task,
        }
    }

    async fn session(&self, name: &str) -> Session {
        self.coordinator
            .create_session(name, GameConfig::default())
            .await
            .unwrap()
    }

    async fn connect(&self, session: &Session, player: usize) -> QuizConnection {
        QuizConnection::connect(&self.addr, &session.id, &format!("token-{}", player))
            .await
            .expect("connection should be accepted")
    }

    /// Replaces the stored problem set so every answer is known
    async fn rig_problems(&self, session: &Session, answers: &[i64]) {
        let mut stored = self.store.get(&session.id).await.unwrap();
        stored.problems = answers
            .iter()
            .map(|&answer| Problem {
                operand1: answer,
                operand2: 0,
                method: Operation::Add,
                answer,
            })
            .collect();
        assert_ok!(self.store.put(&stored).await);
    }

    async fn wait_until(&self, session: &Session, check: impl Fn(&Session) -> bool) -> Session {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let stored = self.store.get(&session.id).await.unwrap();
            if check(&stored) {
                return stored;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "stored session never reached the expected state"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Reads snapshots until one satisfies `check`
async fn wait_for(conn: &mut QuizConnection, check: impl Fn(&Session) -> bool) -> Session {
    timeout(WAIT, async {
        loop {
            match conn.next_snapshot().await {
                Ok(Some(session)) if check(&session) => return session,
                Ok(Some(_)) => continue,
                other => panic!("stream ended early: {:?}", other.map(|s| s.map(|s| s.id))),
            }
        }
    })
    .await
    .expect("expected snapshot never arrived")
}

/// WIRE FORMAT TESTS
mod protocol_tests {
    use super::*;
    use serde_json::{json, Value};

    /// Tests that envelopes with omitted or null payloads decode
    #[test]
    fn envelope_payload_may_be_omitted() {
        assert_eq!(
            SessionEvent::decode(r#"{"type":"start_game"}"#).unwrap(),
            SessionEvent::StartGame
        );
        assert_eq!(
            SessionEvent::decode(r#"{"type":"skip_problem","payload":null}"#).unwrap(),
            SessionEvent::SkipProblem
        );
        assert_eq!(
            SessionEvent::decode(r#"{"type":"submit_answer","payload":{"answer":7}}"#).unwrap(),
            SessionEvent::SubmitAnswer { answer: 7 }
        );
    }

    /// Tests the snapshot field names clients depend on
    #[test]
    fn snapshot_json_shape() {
        let session = Session::new(
            "shape",
            uuid::Uuid::new_v4(),
            GameConfig::default(),
            Vec::new(),
        );
        let value: Value = serde_json::to_value(&session).unwrap();

        for field in [
            "id",
            "name",
            "game_id",
            "game_config",
            "problems",
            "current_problem_index",
            "status",
            "players",
            "scores",
            "start_time",
            "end_time",
        ] {
            assert!(value.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(value["status"], json!("waiting"));
        assert_eq!(
            value["game_config"],
            json!({"methods": ["add", "subtract"], "range": {"min": 1, "max": 10}})
        );
    }
}

/// HANDSHAKE AND ROUTING TESTS
mod handshake_tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Error as WsError;

    /// Tests that an unknown token is refused before upgrading
    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let server = TestServer::start(&["alice"]).await;
        let session = server.session("locked").await;

        let result = QuizConnection::connect(&server.addr, &session.id, "wrong").await;
        assert!(matches!(result, Err(ClientError::Rejected(401))));

        assert_err!(fetch_active_sessions(&server.addr, "").await);
    }

    /// Tests that a malformed session id is refused with 400
    #[tokio::test]
    async fn bad_path_is_rejected() {
        let server = TestServer::start(&["alice"]).await;
        let url = format!("ws://{}/game/not-a-session?token=token-0", server.addr);

        match tokio_tungstenite::connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 400),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("bad path must not upgrade"),
        }
    }

    /// Tests that browsers can pass the token as a query parameter
    #[tokio::test]
    async fn token_in_query_is_accepted() {
        let server = TestServer::start(&["alice"]).await;
        let session = server.session("query").await;
        let url = format!("ws://{}/game/{}?token=token-0", server.addr, session.id);

        let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let frame = timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
        let snapshot: Session = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert!(snapshot.has_player(&server.players[0].id));
    }

    /// Tests that joining a missing session closes with policy violation
    #[tokio::test]
    async fn unknown_session_is_closed() {
        let server = TestServer::start(&["alice"]).await;
        let ghost = Session::new("ghost", uuid::Uuid::new_v4(), GameConfig::default(), Vec::new());

        let mut conn = server.connect(&ghost, 0).await;
        let next = timeout(WAIT, conn.next_snapshot()).await.unwrap().unwrap();
        assert!(next.is_none());
        assert_eq!(conn.close_info().map(|c| c.code), Some(1008));
    }

    /// Tests the active session listing
    #[tokio::test]
    async fn active_sessions_are_listed() {
        let server = TestServer::start(&["alice"]).await;
        let first = server.session("first").await;
        let second = server.session("second").await;

        let mut listed: Vec<_> = fetch_active_sessions(&server.addr, "token-0")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        listed.sort();
        let mut expected = vec![first.id, second.id];
        expected.sort();
        assert_eq!(listed, expected);

        assert!(matches!(
            fetch_active_sessions(&server.addr, "nope").await,
            Err(ClientError::Rejected(401))
        ));
    }
}

/// SESSION SYNCHRONIZATION TESTS
mod session_tests {
    use super::*;

    /// Tests that the first snapshot after joining lists the new player
    #[tokio::test]
    async fn join_snapshot_includes_player() {
        let server = TestServer::start(&["alice"]).await;
        let session = server.session("lobby").await;
        let alice = server.players[0].clone();

        let mut conn = server.connect(&session, 0).await;
        let snapshot = wait_for(&mut conn, |s| s.has_player(&alice.id)).await;

        assert_eq!(snapshot.id, session.id);
        assert_eq!(snapshot.status, SessionStatus::Waiting);
        assert_eq!(snapshot.problems.len(), shared::PROBLEMS_PER_GAME);
    }

    /// Tests that reconnecting with the same token does not duplicate the roster entry
    #[tokio::test]
    async fn reconnect_does_not_duplicate_player() {
        let server = TestServer::start(&["alice"]).await;
        let session = server.session("twice").await;
        let alice = server.players[0].id;

        let mut first = server.connect(&session, 0).await;
        wait_for(&mut first, |s| s.has_player(&alice)).await;
        let mut second = server.connect(&session, 0).await;
        let snapshot = wait_for(&mut second, |s| s.has_player(&alice)).await;

        assert_eq!(snapshot.players.len(), 1);
    }

    /// Players A and B; A answers 7 correctly and both see the update
    #[tokio::test]
    async fn correct_answer_fans_out_to_all_players() {
        let server = TestServer::start(&["alice", "bob"]).await;
        let session = server.session("duel").await;
        server.rig_problems(&session, &[7, 1, 2, 3, 4, 5, 6, 7, 8, 9]).await;
        let (alice, bob) = (server.players[0].id, server.players[1].id);

        let mut a = server.connect(&session, 0).await;
        wait_for(&mut a, |s| s.has_player(&alice)).await;
        let mut b = server.connect(&session, 1).await;
        wait_for(&mut b, |s| s.has_player(&bob)).await;
        wait_for(&mut a, |s| s.has_player(&bob)).await;

        a.send(&SessionEvent::StartGame).await.unwrap();
        wait_for(&mut a, |s| s.status == SessionStatus::InProgress).await;
        wait_for(&mut b, |s| s.status == SessionStatus::InProgress).await;

        a.send(&SessionEvent::SubmitAnswer { answer: 7 }).await.unwrap();

        for conn in [&mut a, &mut b] {
            let snapshot = wait_for(conn, |s| s.current_problem_index == 1).await;
            assert_eq!(snapshot.score_for(&alice).map(|s| s.points), Some(1));
            assert!(snapshot.score_for(&bob).is_none());
        }
    }

    /// Tests that a wrong answer changes nothing
    #[tokio::test]
    async fn wrong_answer_is_ignored() {
        let server = TestServer::start(&["alice"]).await;
        let session = server.session("wrong").await;
        server.rig_problems(&session, &[5; 10]).await;
        let alice = server.players[0].id;

        let mut conn = server.connect(&session, 0).await;
        wait_for(&mut conn, |s| s.has_player(&alice)).await;
        conn.send(&SessionEvent::StartGame).await.unwrap();
        wait_for(&mut conn, |s| s.status == SessionStatus::InProgress).await;

        conn.send(&SessionEvent::SubmitAnswer { answer: 6 }).await.unwrap();
        conn.send(&SessionEvent::SkipProblem).await.unwrap();

        // The skip is the first change after the wrong answer.
        let snapshot = wait_for(&mut conn, |s| s.current_problem_index > 0).await;
        assert_eq!(snapshot.current_problem_index, 1);
        assert!(snapshot.scores.is_empty());
    }

    /// Tests that updates stay inside their session
    #[tokio::test]
    async fn sessions_are_isolated() {
        let server = TestServer::start(&["alice", "bob"]).await;
        let one = server.session("one").await;
        let two = server.session("two").await;
        let (alice, bob) = (server.players[0].id, server.players[1].id);

        let mut a = server.connect(&one, 0).await;
        wait_for(&mut a, |s| s.has_player(&alice)).await;
        let mut b = server.connect(&two, 1).await;
        wait_for(&mut b, |s| s.has_player(&bob)).await;

        b.send(&SessionEvent::StartGame).await.unwrap();
        wait_for(&mut b, |s| s.status == SessionStatus::InProgress).await;

        // Session one may still deliver its own join snapshot twice, nothing else.
        while let Ok(next) = timeout(Duration::from_millis(150), a.next_snapshot()).await {
            let snapshot = next.unwrap().expect("session one stream ended");
            assert_eq!(snapshot.id, one.id);
            assert_eq!(snapshot.status, SessionStatus::Waiting);
        }
        assert_eq!(
            server.store.get(&one.id).await.unwrap().status,
            SessionStatus::Waiting
        );
    }

    /// Tests that garbage frames are dropped without closing the connection
    #[tokio::test]
    async fn malformed_frames_keep_connection_open() {
        let server = TestServer::start(&["alice"]).await;
        let session = server.session("noisy").await;
        let alice = server.players[0].id;

        let mut conn = server.connect(&session, 0).await;
        wait_for(&mut conn, |s| s.has_player(&alice)).await;

        conn.send_text("definitely not json").await.unwrap();
        conn.send_text(r#"{"type":"fly_away","payload":{}}"#).await.unwrap();
        conn.send_text(r#"{"type":"submit_answer","payload":{"answer":"seven"}}"#)
            .await
            .unwrap();
        conn.send(&SessionEvent::StartGame).await.unwrap();

        let snapshot = wait_for(&mut conn, |s| s.status == SessionStatus::InProgress).await;
        assert!(snapshot.start_time.is_some());
    }

    /// Last player disconnects: the session leaves the active set, the record stays
    #[tokio::test]
    async fn last_disconnect_deactivates_session() {
        let server = TestServer::start(&["alice", "bob"]).await;
        let session = server.session("emptying").await;
        let (alice, bob) = (server.players[0].id, server.players[1].id);

        let mut a = server.connect(&session, 0).await;
        wait_for(&mut a, |s| s.has_player(&alice)).await;
        let mut b = server.connect(&session, 1).await;
        wait_for(&mut b, |s| s.has_player(&bob)).await;

        a.close().await.unwrap();
        let snapshot = wait_for(&mut b, |s| !s.has_player(&alice)).await;
        assert_eq!(snapshot.players.len(), 1);
        assert!(server.store.is_active(&session.id));

        b.close().await.unwrap();
        let stored = server.wait_until(&session, |s| s.players.is_empty()).await;
        assert_eq!(stored.id, session.id);
        for _ in 0..100 {
            if !server.store.is_active(&session.id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!server.store.is_active(&session.id));
    }

    /// Tests that a silent client is dropped after the idle timeout
    #[tokio::test]
    async fn idle_client_is_removed() {
        let mut config = ServerConfig::for_tests();
        config.idle_timeout = Duration::from_millis(100);
        let server = TestServer::start_with(config, &["alice"]).await;
        let session = server.session("sleepy").await;
        let alice = server.players[0].id;

        let mut conn = server.connect(&session, 0).await;
        wait_for(&mut conn, |s| s.has_player(&alice)).await;

        server.wait_until(&session, |s| s.players.is_empty()).await;
    }
}

/// CONCURRENCY TESTS
mod stress_tests {
    use super::*;

    /// Tests that simultaneous correct answers from many clients are all counted
    #[tokio::test]
    async fn concurrent_answers_are_all_applied() {
        let names = ["p0", "p1", "p2", "p3", "p4"];
        let server = TestServer::start(&names).await;
        let session = server.session("rush").await;
        server.rig_problems(&session, &[1; 10]).await;

        let mut connections = Vec::new();
        for i in 0..names.len() {
            let mut conn = server.connect(&session, i).await;
            let id = server.players[i].id;
            wait_for(&mut conn, |s| s.has_player(&id)).await;
            connections.push(conn);
        }

        connections[0].send(&SessionEvent::StartGame).await.unwrap();
        server
            .wait_until(&session, |s| s.status == SessionStatus::InProgress)
            .await;

        let mut senders = Vec::new();
        for conn in connections {
            senders.push(tokio::spawn(async move {
                let mut conn = conn;
                for _ in 0..2 {
                    conn.send(&SessionEvent::SubmitAnswer { answer: 1 }).await.unwrap();
                }
                conn
            }));
        }
        let mut still_open = Vec::new();
        for sender in senders {
            still_open.push(sender.await.unwrap());
        }

        let finished = server
            .wait_until(&session, |s| s.status == SessionStatus::Finished)
            .await;
        let total: u32 = finished.scores.iter().map(|s| s.points).sum();
        assert_eq!(finished.current_problem_index, 10);
        assert_eq!(total, 10);
        assert!(finished.end_time.is_some());
        drop(still_open);
    }
}
