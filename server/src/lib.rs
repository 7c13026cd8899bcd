//! # Game Server Library
//!
//! This library provides the authoritative realtime server for the
//! code-breaking duel game. It owns every connection, queue, room, and live
//! match, applies all game rules itself, and pushes the resulting state to
//! clients as events.
//!
//! ## Core Responsibilities
//!
//! ### Identity and Sessions
//! Every WebSocket connection is resolved to an identity on arrival: a signed
//! token maps to an account, anything else becomes a guest. Accounts are
//! limited to a single live connection, and a token minted under a stale
//! session is turned away before it can play.
//!
//! ### Matchmaking
//! Two queues feed new matches. The ranked queue pairs signed-in players
//! strictly in arrival order and is gated on the competitive season being
//! open. The casual queue pairs anyone, and a player left waiting briefly is
//! handed a bot opponent so they always get a game.
//!
//! ### Match Orchestration
//! Each match walks one path: both players commit a secret code, turns
//! alternate under a countdown, and the first exact guess (or a forfeit, or a
//! disconnect) ends it. Ranked results settle ratings through the backend and
//! are pushed to both players with their new standings.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! All mutable state lives in one [`server::Server`] value driven by one
//! loop. Connection tasks never touch state directly; they send messages into
//! the loop's channel and the loop applies them sequentially. This eliminates
//! locking around game state and makes every state transition deterministic.
//!
//! ### WebSocket Communication
//! Clients speak JSON events over WebSockets. Each connection gets a read
//! task feeding the main loop and a write task draining a per-connection
//! outbound channel, so a slow client never stalls the loop.
//!
//! ### Deferred Work as Messages
//! Timers (the casual-queue bot fallback, delayed bot moves) are spawned
//! sleeps that send a message back into the loop when they fire. The handler
//! re-validates the world at that point, so a timer that raced a state change
//! is simply ignored.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Tracks live connections and the identity behind each one, including the
//! single-connection-per-account mapping.
//!
//! ### Matchmaker Module (`matchmaker`)
//! The ranked and casual queues with their pairing rules.
//!
//! ### Game Module (`game`)
//! Live match state: seats, secrets, the turn holder, the countdown deadline,
//! and the per-recipient turn snapshot.
//!
//! ### Bot Module (`bot`)
//! The candidate-elimination solver behind the casual bot opponent.
//!
//! ### Rooms Module (`rooms`)
//! Private rooms joinable by code, from which a host starts friendly matches.
//!
//! ### Backend Module (`backend`)
//! The persistence seam: profiles, sessions, the season gate, the rating
//! formula, and the in-memory implementation used in development and tests.
//!
//! ### Auth Module (`auth`)
//! Token signing and verification.
//!
//! ### Network Module (`network`)
//! WebSocket accept loop, per-connection read/write tasks, and the message
//! types flowing into the main loop.
//!
//! ## Performance Characteristics
//!
//! ### Tick Rate
//! A single global 250ms tick drives every running match's countdown. Each
//! tick broadcasts remaining time and expires overdue turns, so per-match
//! timer bookkeeping never exists.
//!
//! ### Scalability
//! The loop does no blocking work. Persistence calls either happen while
//! building a match or are spawned off the loop entirely, and per-connection
//! writer tasks absorb slow consumers.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::backend::MemoryBackend;
//! use server::server::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     let mut server = Server::bind("127.0.0.1:4000", "secret".to_string(), backend).await?;
//!
//!     // Runs the accept loop and the main event loop:
//!     // - resolves identities and enforces single sessions
//!     // - pairs queued players and starts matches
//!     // - applies guesses, drives the turn clock, settles ratings
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! ### Input Validation
//! Secrets and guesses are validated against the code format before touching
//! any match state, and turn ownership is checked on every guess.
//!
//! ### Rate Limiting
//! Queue entries and play actions are rate-limited per connection to keep a
//! misbehaving client from flooding the loop.
//!
//! ### State Authority
//! The server holds the only copy of every secret and every countdown.
//! Clients only ever see their own secret's status and the feedback their
//! guesses earn.

pub mod auth;
pub mod backend;
pub mod bot;
pub mod game;
pub mod matchmaker;
pub mod network;
pub mod rate_limit;
pub mod registry;
pub mod rooms;
pub mod server;
