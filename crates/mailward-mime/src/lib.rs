//! # mailward-mime
//!
//! MIME parsing and generation for intercepted mail.
//!
//! Parsing is lenient: odd headers, broken encodings and unterminated
//! multiparts still produce a usable tree, because a held message has to be
//! shown to a reviewer whatever shape it arrived in.
//!
//! ```
//! use mailward_mime::Message;
//!
//! let raw = b"From: Ann <ann@example.com>\r\nSubject: Hi\r\n\r\nHello!";
//! let message = Message::parse(raw).unwrap();
//! assert_eq!(message.subject().as_deref(), Some("Hi"));
//! assert_eq!(message.from()[0].email, "ann@example.com");
//! assert_eq!(message.text_body().as_deref(), Some("Hello!"));
//! ```
//!
//! Building goes through [`Part`] constructors and [`MessageBuilder`]:
//!
//! ```
//! use mailward_mime::{MessageBuilder, Part};
//!
//! let body = Part::multipart("alternative", vec![Part::text("hi"), Part::html("<b>hi</b>")]);
//! let message = MessageBuilder::new().subject("Hello").body(body).build().unwrap();
//! assert!(message.to_bytes().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod builder;
mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use address::{Mailbox, parse_address_list};
pub use builder::{Attachment, MessageBuilder, generate_boundary};
pub use content_type::{ContentDisposition, ContentType};
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Body, Message, Part, TransferEncoding};
