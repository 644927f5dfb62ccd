//! Type-state IMAP client.
//!
//! Each state exposes only the commands RFC 9051 allows in it; transitions
//! consume the client and return it in the new state.

#![allow(clippy::missing_errors_doc)]

mod not_authenticated;
mod selected;
mod session;
mod states;

use std::marker::PhantomData;

use tokio::io::{AsyncRead, AsyncWrite};

pub use self::states::{Authenticated, NotAuthenticated, Selected, Session};
use super::framed::FramedStream;
use crate::command::{Command, TagGenerator};
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::{Capability, ResponseCode, Status};
use crate::{Error, Result};

/// An IMAP connection in state `State`.
pub struct Client<S, State> {
    pub(crate) stream: FramedStream<S>,
    pub(crate) tags: TagGenerator,
    pub(crate) capabilities: Vec<Capability>,
    pub(crate) selected: Option<String>,
    _state: PhantomData<State>,
}

/// What a successful command returned.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    pub untagged: Vec<UntaggedResponse>,
    pub code: Option<ResponseCode>,
}

impl<S, State> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("capabilities", &self.capabilities)
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn into_state<Next>(self) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tags: self.tags,
            capabilities: self.capabilities,
            selected: self.selected,
            _state: PhantomData,
        }
    }

    /// Capabilities from the greeting, LOGIN or the last CAPABILITY.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// True if the server advertised `cap`.
    #[must_use]
    pub fn has_capability(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    /// `NOOP`: keeps the session alive and flushes pending updates.
    pub async fn noop(&mut self) -> Result<()> {
        self.execute(&Command::Noop).await.map(drop)
    }

    /// Re-reads capabilities.
    pub async fn capability(&mut self) -> Result<&[Capability]> {
        let done = self.execute(&Command::Capability).await?;
        for response in done.untagged {
            if let UntaggedResponse::Capability(caps) = response {
                self.capabilities = caps;
            }
        }
        Ok(&self.capabilities)
    }

    /// `LOGOUT`, ignoring whatever the server says on the way out.
    pub async fn logout(mut self) -> Result<()> {
        let tag = self.tags.next();
        self.stream.write_command(&Command::Logout.serialize(&tag)).await?;
        let _ = self.stream.read_until_tagged(&tag).await;
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// Sends `command`, collects responses up to its completion and maps
    /// a non-OK status to an error.
    pub(crate) async fn execute(&mut self, command: &Command) -> Result<Completion> {
        let tag = self.tags.next();
        self.stream.write_command(&command.serialize(&tag)).await?;
        self.complete(&tag).await
    }

    /// Reads until the tagged completion for `tag`.
    pub(crate) async fn complete(&mut self, tag: &str) -> Result<Completion> {
        let raw = self.stream.read_until_tagged(tag).await?;
        let mut done = Completion::default();
        for bytes in &raw {
            match ResponseParser::parse(bytes) {
                Ok(Response::Tagged { status, code, text, .. }) => {
                    return match status {
                        Status::Ok | Status::PreAuth => {
                            done.code = code;
                            Ok(done)
                        }
                        Status::No => Err(Error::No(text)),
                        Status::Bad => Err(Error::Bad(text)),
                        Status::Bye => Err(Error::Bye(text)),
                    };
                }
                Ok(Response::Untagged(untagged)) => done.untagged.push(untagged),
                Ok(Response::Continuation { .. }) => {}
                Err(e) => {
                    // Unknown untagged data is legal; skip it.
                    tracing::trace!(error = %e, "ignoring unparsed response");
                }
            }
        }
        Err(Error::Protocol("missing tagged response".to_string()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    #[tokio::test]
    async fn greeting_capabilities_and_noop() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 IDLE MOVE] ready\r\n")
            .write(b"A0001 NOOP\r\n")
            .read(b"* 3 EXISTS\r\nA0001 OK NOOP completed\r\n")
            .build();
        let mut client = Client::from_stream(mock).await.unwrap();
        assert!(client.has_capability(&Capability::Idle));
        assert!(client.has_capability(&Capability::Move));
        client.noop().await.unwrap();
    }

    #[tokio::test]
    async fn capability_refresh() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 UIDPLUS\r\nA0001 OK done\r\n")
            .build();
        let mut client = Client::from_stream(mock).await.unwrap();
        assert!(client.capabilities().is_empty());
        let caps = client.capability().await.unwrap();
        assert!(caps.contains(&Capability::UidPlus));
    }

    #[tokio::test]
    async fn bad_maps_to_error() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 NOOP\r\n")
            .read(b"* XUNKNOWN stuff\r\nA0001 BAD what\r\n")
            .build();
        let mut client = Client::from_stream(mock).await.unwrap();
        assert!(matches!(client.noop().await, Err(Error::Bad(t)) if t == "what"));
    }
}
