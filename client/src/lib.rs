//! # Transport Client Library
//!
//! The single-connection counterpart to the server library. A [`network::Client`]
//! connects synchronously, then reads in the background on its own reactor
//! thread while the application sends synchronously and polls for inbound
//! messages once per tick.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1", 9000)?;
//!     client.start()?;
//!
//!     loop {
//!         while client.has_messages() {
//!             let message = client.pop_message()?;
//!             println!("{}", String::from_utf8_lossy(&message));
//!         }
//!
//!         client.send(b"hello\n")?;
//!         std::thread::sleep(Duration::from_millis(100));
//!     }
//! }
//! ```
//!
//! There is no reconnect: once `send` fails the client is done and should be
//! dropped. Dropping stops and joins the reactor thread before the socket is
//! released.

pub mod network;
