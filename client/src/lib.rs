//! # Word Game Client Library
//!
//! This library provides the client side of the multiplayer word game. It
//! keeps a watch stream to the server open on a background thread, turns
//! the streamed frames into typed events, and reconciles them into a
//! canonical game model owned by a single main thread.
//!
//! ## Architecture Overview
//!
//! The client runs on two threads that share as little as possible:
//!
//! ### Network Thread
//! The [`worker::Worker`] owns all sockets. It reads the chunked watch
//! stream, feeds it to the [`connection::Connection`], and sends queued
//! commands as separate short requests. Everything the connection learns is
//! announced as a [`shared::ConnectionEvent`].
//!
//! ### Main Thread
//! The [`game_state::GameState`] copies each event into a queue and
//! schedules one flush on the [`main_thread::MainThread`]. The flush applies
//! the events to the model in arrival order, then re-broadcasts them to the
//! presentation layer with no model lock held.
//!
//! ### Logical Clock
//! Every applied event and every local command advances a counter. Tiles
//! record the counter value of their last update, so a caller can tell
//! whether the server has confirmed or overridden a move made locally.
//!
//! ## Module Organization
//!
//! ### Stream Decoding (`chunked`, `connection`)
//! Response head parsing, the incremental chunked-body decoder, and the
//! per-session state that maps frames to events.
//!
//! ### Threads (`worker`, `main_thread`)
//! The network thread with its tokio runtime, and the idle-callback queue
//! that hands work to the thread owning the model.
//!
//! ### Model (`game_state`, `tile_arena`)
//! The event queue, the reconciler, and tile storage ordered by recency.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::game_state::GameState;
//! use client::main_thread::MainThread;
//! use client::worker::Worker;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let main_thread = Arc::new(MainThread::new());
//! let mut worker = Worker::new(ClientConfig::default());
//! let game = GameState::new(worker.connection(), main_thread.clone());
//!
//! game.subscribe(|event| println!("{:?}", event));
//!
//! let stopped = Arc::new(AtomicBool::new(false));
//! let (flag, waker) = (stopped.clone(), main_thread.clone());
//! worker.on_exit(move || {
//!     flag.store(true, Ordering::SeqCst);
//!     waker.wake();
//! });
//! worker.start()?;
//!
//! // Apply events as they arrive until the network thread stops
//! main_thread.run_until(|| stopped.load(Ordering::SeqCst));
//! # Ok(())
//! # }
//! ```

pub mod chunked;
pub mod config;
pub mod connection;
pub mod error;
pub mod game_state;
pub mod main_thread;
pub mod tile_arena;
pub mod worker;
