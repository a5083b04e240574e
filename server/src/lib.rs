//! # Transport Server Library
//!
//! This library provides the server side of a tick-paced TCP transport. It
//! accepts many concurrent client connections, buffers whatever each client
//! sends, and lets the application broadcast to every client once per tick.
//!
//! ## Core Responsibilities
//!
//! ### Connection Tracking
//! Every accepted socket is registered under a fresh identifier and owned by
//! the registry until a send to it fails. Identifiers are never reused, so a
//! client that reconnects always shows up under a new one.
//!
//! ### Inbound Buffering
//! Each connection keeps its own queue, filled by a read loop running on the
//! server's reactor thread. The application drains all queues at once with
//! `read_all`.
//!
//! ### Broadcasting
//! `send_to_all` writes the same payload to every connection and prunes any
//! connection whose write fails. Departed clients are only noticed here; the
//! read side never removes anything on its own.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! The identifier → connection table:
//! - Monotonic identifier assignment
//! - Per-connection FIFO draining
//! - Broadcast with pruning
//!
//! ### Network Module (`network`)
//! The `Server` itself:
//! - Listening socket and accept loop
//! - Reactor lifecycle (start, stop, join)
//! - The `read_all` / `send_to_all` surface used by the tick loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(64)?;
//!     server.start(9000)?;
//!
//!     loop {
//!         for message in server.read_all() {
//!             println!("{}", String::from_utf8_lossy(&message));
//!         }
//!
//!         server.send_to_all(b"Hello from server!\n");
//!         std::thread::sleep(Duration::from_millis(300));
//!     }
//! }
//! ```
//!
//! `read_all` and `send_to_all` block the calling thread; call them from a
//! plain thread, not from inside an async runtime.

pub mod network;
pub mod registry;
