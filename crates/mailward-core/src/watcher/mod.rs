//! IMAP detection: one watcher task per account.
//!
//! [`Watcher`] runs the connect, cycle and wait loop over a [`Mailbox`]
//! obtained from a [`Connector`]. [`ops`] holds the one-shot operations the
//! CLI exposes.

mod cycle;
#[cfg(test)]
pub(crate) mod fake;
mod imap;
mod mailbox;
pub mod ops;
mod worker;

pub use cycle::{AccountSession, CycleReport, UidTracker, move_to_quarantine};
pub use imap::{ImapConnector, ImapMailbox};
pub use mailbox::{Connector, EnvelopeSummary, FetchedMessage, IdleOutcome, Mailbox, MailboxInfo};
pub(crate) use mailbox::find_by_message_id;
pub use worker::{Watcher, WatcherContext, WatcherState};
