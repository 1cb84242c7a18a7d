//! # Two Truths and a Lie Session Server
//!
//! This library provides the authoritative coordinator for live "two truths and
//! a lie" party games. An admin opens a session, players join with a short
//! code, everyone writes statement sets, and the group guesses which statement
//! of each set is the lie while the server keeps score.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Game State
//! Every phase change, countdown, guess and score lives on the server. Clients
//! only send intents and render the `game-state` snapshots they receive.
//!
//! ### Identity and Reconnection
//! Each participant gets an opaque identity token on first contact:
//! - Rejoining with the token restores the same participant, statements and score
//! - A second live claimant for the admin seat is refused
//! - Removed participants can never come back under the same token
//!
//! ### Per-Recipient Broadcasting
//! After every state change each connected participant receives exactly one
//! snapshot, shaped for them. The subject of a round never sees its own
//! statements being guessed, and nobody sees where the lie is until the
//! round resolves.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! One coordinator task owns all sessions and connections and handles network
//! messages, countdown expiries and collaborator reports one at a time. No
//! locks guard game state and two events never interleave inside a session.
//!
//! ### WebSocket Transport
//! Each connection is served by its own task that forwards text frames to the
//! coordinator and writes JSON messages back. The coordinator never awaits a
//! socket.
//!
//! ### Generation-Checked Timers
//! Countdowns are scheduled through a `TimerDriver`. Every arm carries a fresh
//! generation number so an expiry that raced a cancellation is ignored.
//!
//! ## Module Organization
//!
//! ### Session Layer (`session`, `registry`, `broadcast`)
//! - Phase machine and every gameplay operation
//! - Session lookup by code and identity-to-session index
//! - Per-viewer snapshot projection and fan-out
//!
//! ### Game Rules (`participant`, `teams`, `rounds`, `scoring`, `countdown`)
//! - Roster with lifecycle states and tombstones
//! - Team modes, random balancing and admin assignment
//! - Round set queue with shuffled presentation
//! - Replayed scoring with best guesser and best deceiver awards
//! - Countdown slot and timer drivers
//!
//! ### Plumbing (`coordinator`, `network`, `connection`, `collaborators`, `config`, `journal`)
//! - Event dispatch, admin gating and outbox flushing
//! - WebSocket accept loop and connection pumps
//! - Connection bindings
//! - External code validation and journal upload over HTTP
//! - Command line configuration
//! - Per-game event journal
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:8080".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     let server = Server::bind(&config).await?;
//!
//!     // Stop from elsewhere with `handle.shutdown()`
//!     let _handle = server.handle();
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod countdown;
pub mod error;
pub mod journal;
pub mod network;
pub mod participant;
pub mod registry;
pub mod rounds;
pub mod scoring;
pub mod session;
pub mod teams;
pub mod utils;
