//! # Arena Server Library
//!
//! This library provides the authoritative server for two-player tic-tac-toe
//! over WebSocket. It arbitrates every move, pairs waiting clients through a
//! matchmaking scheduler and hands finished pairings to a session store.
//!
//! ## Core Responsibilities
//!
//! ### Room Arbitration
//! Each room holds one board, at most two seats and whose turn it is. The
//! server validates every join, move and leave against that state and
//! broadcasts the result to the seated players. Clients never change a board
//! on their own.
//!
//! ### Matchmaking
//! Clients queue into a quick pool (first come, first paired) or a ranked
//! pool (closest rating within a tolerance that grows while they wait). A
//! periodic pass pairs what it can, reports timeouts and asks the session
//! store for a session id that both players then use as their room id.
//!
//! ### Connection Management
//! Tracks live WebSocket peers, which player ids they speak for and which
//! rooms and pools they entered, so a dropped socket is cleaned up like an
//! explicit leave.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! All room and pool state is owned by one task. Socket tasks forward frames
//! over a channel and the loop processes them, and the matchmaking ticks, one
//! at a time. Nothing is locked and no two operations interleave. Only the
//! session store calls run in spawned tasks; pairs are removed from their
//! pool before those calls start.
//!
//! ### JSON over WebSocket
//! Every frame is a JSON object with a `type` tag. Frames are defined in the
//! `shared` crate and decoded in one place; anything unparseable gets an
//! `ERROR` reply and the connection stays open.
//!
//! ## Module Organization
//!
//! ### Room Module (`room`)
//! Board rules, turn order, seat assignment and win/draw detection.
//!
//! ### Pool and Matchmaking Modules (`pool`, `matchmaking`)
//! Waiting entries, pair selection for both pool kinds, timeouts and
//! materialization of a pairing into a stored session.
//!
//! ### Session Store Module (`session_store`)
//! The persistence seam, with an in-memory implementation.
//!
//! ### Network Module (`network`)
//! Listener, per-connection tasks and the main loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::session_store::InMemorySessionStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let store = Arc::new(InMemorySessionStore::new());
//!     let mut server = Server::bind(ServerConfig::default(), store).await?;
//!
//!     // Accepts connections and runs matchmaking until shut down
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection_manager;
pub mod error;
pub mod matchmaking;
pub mod network;
pub mod pool;
pub mod room;
pub mod session_store;
