//! # mailward-imap
//!
//! The IMAP client side of Mailward: just enough of RFC 9051 / RFC 3501 to
//! watch a mailbox, pull new messages by UID and move them around.
//!
//! ## Connection states
//!
//! ```text
//! NotAuthenticated ── login() ──→ Authenticated ── select() ──→ Selected
//!                                       ↑                          │
//!                                       └──────── close() ─────────┘
//! ```
//!
//! Commands that need a selected mailbox only exist on `Client<_, Selected>`,
//! so a UID MOVE against nothing is a compile error, not a `BAD`.
//!
//! ## Example
//!
//! ```ignore
//! use mailward_imap::{Client, SearchCriteria, connection};
//!
//! let stream = connection::connect("imap.example.com", 993, true).await?;
//! let client = Client::from_stream(stream).await?.login("user", "pass").await?;
//! let (mut inbox, status) = client.select("INBOX").await?;
//! let unseen = inbox.uid_search(SearchCriteria::Unseen).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use command::{Command, FetchAttribute, SearchCriteria, StoreAction, TagGenerator};
pub use connection::{
    Authenticated, Client, FramedStream, IdleEvent, IdleHandle, ImapStream, NotAuthenticated,
    Selected, Session,
};
pub use error::{Error, Result};
pub use parser::{Address, Envelope, FetchItem, Response, ResponseParser, UntaggedResponse};
pub use types::{
    Capability, Flag, Flags, ListResponse, MailboxAttribute, MailboxStatus, ResponseCode, SeqNum,
    Status, Uid, UidSet, UidValidity,
};
