//! # Remote Controller Server Library
//!
//! Lets phones and other remote devices drive a locally running game by
//! sending short text commands over TCP. The library accepts connections,
//! frames the byte stream, validates commands, assigns player slots and hands
//! the results to the application through the [`CommandHandler`] trait.
//!
//! ## Core Responsibilities
//!
//! ### Connection Transport
//! One accept task hands every new socket to its own connection task and
//! immediately waits for the next one. Each connection has exactly one reader,
//! so at most one receive is outstanding per connection, and one writer fed by
//! a queue, so replies can be sent from any thread without blocking.
//!
//! ### Framing and Validation
//! Messages end with the `<EOC>` marker and may be split or coalesced by TCP
//! in any way. Complete messages are parsed by the `protocol` crate into a
//! closed [`protocol::Command`] enum; malformed input is answered with
//! `INVALID_COMMAND`, unknown players with `PLAYER_NOT_FOUND`.
//!
//! ### Player Slots
//! A fixed number of slots is handed out lowest-index first. A connection that
//! drops, times out or sends `DEREGISTER` frees its slots, and the handler
//! is told with a `deregister` callback.
//!
//! ### Dispatch
//! Connection tasks run concurrently on the tokio worker pool, but handler
//! callbacks are queued on a [`Dispatcher`] that the application drains from
//! its own loop, one callback at a time, in enqueue order.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{CommandHandler, Server, ServerConfig};
//! use std::time::Duration;
//!
//! struct Game;
//!
//! impl CommandHandler for Game {
//!     fn register(&mut self, player_id: usize, player_name: &str) {}
//!     fn deregister(&mut self, player_id: usize) {}
//!     fn key_down(&mut self, player_id: usize, key: &str, extra: &str) {}
//!     fn joystick(&mut self, player_id: usize, x: f32, y: f32) {}
//!     fn gyro(&mut self, player_id: usize, x: f32, y: f32, z: f32) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default(), Game).await?;
//!
//!     let mut tick = tokio::time::interval(Duration::from_millis(16));
//!     loop {
//!         tick.tick().await;
//!         // Every queued callback runs here, on this task
//!         server.run_pending();
//!     }
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod network;
pub mod registry;
pub mod transport;

pub use config::{DispatchMode, ServerConfig};
pub use dispatcher::{Dispatcher, PendingAction};
pub use error::{ConfigError, RegistryError, ServerError, TransportError};
pub use handler::{CommandHandler, PlayerEvent};
pub use network::Server;
pub use transport::{ConnectionHandle, ConnectionId};
