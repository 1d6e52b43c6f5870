//! # Quiz Session Server Library
//!
//! This library provides the session synchronization core for a multiplayer
//! arithmetic quiz. Players connect over WebSocket, join a shared session,
//! and every change one of them makes is pushed to all the others as a full
//! session snapshot.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Session State
//! The session store holds the only durable copy of each session. Clients
//! never patch state themselves; they send events and render whatever
//! snapshot comes back.
//!
//! ### Event Processing
//! Inbound events (`start_game`, `submit_answer`, `skip_problem`,
//! `new_game`) run through a pure state machine. Events that do not apply to
//! the current state are ignored without a reply.
//!
//! ### Snapshot Fanout
//! After every applied event, join and leave, the new snapshot is published
//! on the session's topic and each connection on that session forwards it
//! to its client.
//!
//! ## Architecture Design
//!
//! ### Single Writer Per Session
//! The store has no compare-and-swap, so the coordinator funnels every
//! read-apply-write-publish sequence for a session through one worker task.
//! Concurrent answers are applied one after another against fresh state.
//!
//! ### Task Pair Per Connection
//! Each connection runs a reader task (socket to coordinator) and a writer
//! task (subscription to socket). When either one ends the connection is
//! torn down and the player leaves the roster exactly once.
//!
//! ## Module Organization
//!
//! - `problems`: random problem sets from a game config
//! - `game`: the session event engine
//! - `store`: session storage and publish/subscribe, in memory or on Redis
//! - `coordinator`: per-session workers serializing units of work
//! - `connection`: the per-client reader/writer pair and roster cleanup
//! - `network`: accept loop, handshake routing and token checks
//! - `identity`: token to player resolution
//! - `config`: explicit server settings
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::identity::StaticIdentities;
//! use server::network::Server;
//! use shared::GameConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut identities = StaticIdentities::new();
//!     identities.register("alice-token", "alice");
//!
//!     let server = Server::bind(ServerConfig::new("127.0.0.1:8088"), Arc::new(identities)).await?;
//!
//!     // Clients connect to ws://127.0.0.1:8088/game/{id}?token=alice-token
//!     let session = server
//!         .coordinator()
//!         .create_session("lobby", GameConfig::default())
//!         .await?;
//!     println!("session {}", session.id);
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod game;
pub mod identity;
pub mod network;
pub mod problems;
pub mod store;
