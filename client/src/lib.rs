//! # Quiz Client Library
//!
//! Terminal client for the multiplayer arithmetic quiz. It connects to one
//! session over WebSocket, turns typed lines into session events, and prints
//! every snapshot the server pushes back.
//!
//! ## Architecture Overview
//!
//! The client holds no game state of its own. Whatever the server sends is
//! the truth and is rendered as-is; nothing is predicted locally, so a
//! wrong answer simply produces no update.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - `QuizConnection` for one player on one session
//! - Split halves so sending and receiving can run in separate tasks
//! - `fetch_active_sessions` for the lobby listing
//!
//! ### Input Module (`input`)
//! Parses terminal lines (`start`, `skip`, `42`, `new add,mul 1 12`) into
//! commands.
//!
//! ### Rendering Module (`rendering`)
//! Formats a snapshot: status, current problem and standings.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::QuizConnection;
//! use shared::SessionEvent;
//!
//! # async fn run(session_id: shared::SessionId) -> Result<(), client::network::ClientError> {
//! let mut conn = QuizConnection::connect("127.0.0.1:8088", &session_id, "alice-token").await?;
//! conn.send(&SessionEvent::StartGame).await?;
//! while let Some(session) = conn.next_snapshot().await? {
//!     print!("{}", client::rendering::render(&session));
//! }
//! # Ok(())
//! # }
//! ```

pub mod input;
pub mod network;
pub mod rendering;
