//! # Word Game Server Library
//!
//! This library provides the authoritative server for the multiplayer word
//! game. It groups players into conversations, keeps the canonical state of
//! every room, and streams changes to each participant over a long-lived
//! chunked HTTP response.
//!
//! ## Core Responsibilities
//!
//! ### Connection Handshake
//! Every connection starts with an HTTP-style request head. The head is parsed
//! incrementally as bytes arrive, with a hard limit on line length, and the
//! client's `Sec-WebSocket-Key` is hashed into the accept token returned with
//! the response.
//!
//! ### Room Management
//! Players join a named room. A room's conversation stays open until the game
//! starts or the room is full, after which newcomers get a fresh conversation.
//! Persons that stay idle too long are removed and reported as having left.
//!
//! ### State Streaming
//! Each participant holds one watch stream. The stream sends player names,
//! player status, chat messages, shouts and tile positions as individual
//! chunks, and resumes cleanly no matter how the socket splits the writes.
//!
//! ## Module Organization
//!
//! ### Handshake Module (`handshake`)
//! Byte-level state machine for the request line and headers.
//!
//! ### Conversation Modules (`conversation`, `conversation_set`)
//! Authoritative room state and the lookup of joinable rooms by name.
//!
//! ### Person Set Module (`person_set`)
//! Person ids, activity tracking and timeouts.
//!
//! ### Response Modules (`response`, `watch_response`)
//! Resumable byte producers: short fixed responses and the chunked watch
//! stream driven by dirty bits.
//!
//! ### Network Module (`network`)
//! Accept loop, request routing and the periodic timeout checker.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!
//!     // Accepts connections forever, one task per connection
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Each connection runs in its own tokio task. Room state sits behind
//! `parking_lot` mutexes that are never held across an await point. Signal
//! listeners run synchronously on whichever task mutates a conversation and
//! only set dirty bits and wake the affected watch streams.

pub mod config;
pub mod conversation;
pub mod conversation_set;
pub mod error;
pub mod handshake;
pub mod id;
pub mod network;
pub mod person_set;
pub mod response;
pub mod watch_response;
