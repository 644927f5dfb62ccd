//! # mailward-core
//!
//! Interception, quarantine and release logic for Mailward.
//!
//! This crate provides:
//! - **Store** - `SQLite` persistence for accounts, rules, messages and locks
//! - **Rules** - keyword and pattern scoring of incoming mail
//! - **Watcher** - one IMAP task per account that moves held mail to quarantine
//! - **Supervisor** - starts, stops and reports on watchers
//! - **Intercept** - SMTP delivery handler that holds every submission
//! - **Release** - release, edit and discard of held messages
//! - **Attachments** - extraction, staging and the edit manifest

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod attachments;
pub mod config;
mod error;
pub mod intercept;
pub mod mail;
pub mod policy;
pub mod quarantine;
pub mod release;
pub mod rules;
pub mod store;
pub mod supervisor;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result};
pub use intercept::InterceptHandler;
pub use policy::{CircuitBreaker, RetryPolicy};
pub use release::{Coordinator, DiscardOutcome, ReleaseEdits, ReleaseOutcome};
pub use store::{AccountId, Store};
pub use supervisor::Supervisor;
pub use watcher::{ImapConnector, WatcherContext, WatcherState};
