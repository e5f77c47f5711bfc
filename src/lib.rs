//! # Pushline
//!
//! A persistent push-channel client.
//!
//! A [`Connection`] keeps one transport to the push server open, registers
//! the user on every (re)connect, and reconnects after any close it did not
//! ask for. Connectivity changes and server messages are delivered to a
//! [`NotificationSink`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pushline::{Config, Connection, Environment, NotificationSink, Payload};
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl NotificationSink for Printer {
//!     async fn on_connectivity_changed(&self, connected: bool) {
//!         println!("connected: {}", connected);
//!     }
//!
//!     async fn on_message(&self, payload: Payload) {
//!         println!("message: {:?}", payload);
//!     }
//! }
//!
//! # async fn run() -> pushline::Result<()> {
//! let config = Config::new(Environment::Staging, "user-id", "user-token")?;
//! let sink = Arc::new(Printer);
//! let connection = Connection::new(config, &sink);
//! connection.start();
//! # Ok(())
//! # }
//! ```

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod message;
pub mod sink;
pub mod transport;

mod error;

pub use config::{Config, Endpoint, Environment};
pub use connection::{Connection, ConnectionState};
pub use error::{Error, Result};
pub use message::{Envelope, Payload, Registration};
pub use sink::NotificationSink;
