//! Sans-I/O parser for server responses.
//!
//! [`lexer`] turns bytes into tokens; [`ResponseParser`] builds
//! [`Response`] values from one framed response at a time.
//!
//! ```
//! use mailward_imap::parser::{Response, ResponseParser, UntaggedResponse};
//!
//! let parsed = ResponseParser::parse(b"* 3 EXISTS\r\n").unwrap();
//! assert_eq!(parsed, Response::Untagged(UntaggedResponse::Exists(3)));
//! ```

mod fetch;
pub mod lexer;
mod response;

pub use fetch::{Address, Envelope, FetchItem};
pub use lexer::{Lexer, Token};
pub use response::{Response, ResponseParser, UntaggedResponse};
