//! # mailward-smtp
//!
//! The server side of SMTP (RFC 5321), enough to accept submissions and hand
//! each completed message to the application before anything is delivered.
//!
//! ## Features
//!
//! - **Commands**: HELO, EHLO, MAIL FROM, RCPT TO, DATA, RSET, NOOP, QUIT
//! - **Extensions advertised**: SIZE, 8BITMIME, PIPELINING
//! - **DATA**: dot-unstuffing and a hard size limit (552)
//! - **Listener**: one task per connection, graceful shutdown over a
//!   `tokio::sync::watch` channel
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mailward_smtp::{DeliveryHandler, Envelope, Listener, Reply, ReplyCode, ServerConfig};
//!
//! struct Accept;
//!
//! impl DeliveryHandler for Accept {
//!     async fn deliver(&self, envelope: &Envelope, data: &[u8]) -> Reply {
//!         println!("{} bytes from {}", data.len(), envelope.sender());
//!         Reply::line(ReplyCode::OK, "Message accepted for delivery")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> mailward_smtp::Result<()> {
//!     let (_tx, rx) = tokio::sync::watch::channel(false);
//!     let listener = Listener::bind("127.0.0.1:8587", ServerConfig::default(), Arc::new(Accept)).await?;
//!     listener.serve(rx).await
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Connected ── HELO/EHLO ──→ Greeted ── MAIL ──→ Mail ── RCPT ──→ Rcpt
//!                               ↑                                  │
//!                               └──── DATA + final dot / RSET ─────┘
//! ```
//!
//! ## Modules
//!
//! - [`command`]: Commands and advertised extensions
//! - [`parser`]: Command line parser
//! - [`types`]: Addresses, envelopes and replies

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
mod error;
mod listener;
pub mod parser;
mod session;
pub mod types;

pub use command::{Command, Extension};
pub use error::{Error, Result};
pub use listener::Listener;
pub use session::{DeliveryHandler, ServerConfig, Session, SessionState};
pub use types::{Address, Envelope, Reply, ReplyCode};
