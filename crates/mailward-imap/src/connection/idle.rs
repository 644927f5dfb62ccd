//! IDLE (RFC 2177).

#![allow(clippy::missing_errors_doc)]

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use super::framed::FramedStream;
use crate::command::Command;
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::Status;
use crate::{Error, Result};

/// Something the server pushed while idling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    /// `* n EXISTS`
    Exists(u32),
    /// `* n EXPUNGE`
    Expunge(u32),
    /// `* n RECENT`
    Recent(u32),
    /// `* n FETCH`, usually a flag change.
    Fetch(u32),
    /// Nothing arrived within the wait window.
    Timeout,
}

impl IdleEvent {
    /// True for events that may mean new mail.
    #[must_use]
    pub const fn is_new_mail(self) -> bool {
        matches!(self, Self::Exists(_) | Self::Recent(_))
    }

    pub(crate) const fn from_untagged(untagged: &UntaggedResponse) -> Option<Self> {
        match untagged {
            UntaggedResponse::Exists(n) => Some(Self::Exists(*n)),
            UntaggedResponse::Expunge(n) => Some(Self::Expunge(*n)),
            UntaggedResponse::Recent(n) => Some(Self::Recent(*n)),
            UntaggedResponse::Fetch { seq, .. } => Some(Self::Fetch(*seq)),
            _ => None,
        }
    }
}

/// An active IDLE. Borrowing the stream keeps other commands out until
/// [`IdleHandle::done`].
pub struct IdleHandle<'a, S> {
    stream: &'a mut FramedStream<S>,
    tag: String,
    /// Pushes that arrived before the continuation.
    pending: VecDeque<IdleEvent>,
}

impl<S> std::fmt::Debug for IdleHandle<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleHandle")
            .field("tag", &self.tag)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<'a, S> IdleHandle<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(stream: &'a mut FramedStream<S>, tag: String, early: Vec<IdleEvent>) -> Self {
        Self { stream, tag, pending: early.into() }
    }

    /// Waits up to `duration` for the next server push. Pushes received
    /// while IDLE was starting come first.
    ///
    /// Partial lines survive a timeout, so calling `wait` again is safe.
    pub async fn wait(&mut self, duration: Duration) -> Result<IdleEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        loop {
            let response = match timeout(duration, self.stream.read_response()).await {
                Ok(response) => response?,
                Err(_) => return Ok(IdleEvent::Timeout),
            };
            match ResponseParser::parse(&response) {
                Ok(Response::Untagged(UntaggedResponse::Condition { status: Status::Bye, text, .. })) => {
                    return Err(Error::Bye(text));
                }
                Ok(Response::Untagged(untagged)) => match IdleEvent::from_untagged(&untagged) {
                    Some(event) => return Ok(event),
                    None => tracing::trace!(response = ?untagged, "ignoring untagged during IDLE"),
                },
                Ok(Response::Tagged { tag, status, text, .. }) if tag == self.tag => {
                    // The server ended IDLE on its own.
                    return match status {
                        Status::Ok | Status::PreAuth => {
                            Err(Error::InvalidState("IDLE terminated by server".to_string()))
                        }
                        Status::No => Err(Error::No(text)),
                        Status::Bad => Err(Error::Bad(text)),
                        Status::Bye => Err(Error::Bye(text)),
                    };
                }
                Ok(_) => {}
                Err(e) => tracing::trace!(error = %e, "ignoring unparsed response during IDLE"),
            }
        }
    }

    /// Sends `DONE` and waits for the IDLE command to complete.
    ///
    /// Returns the pushes nobody has seen yet: those still queued from
    /// the start of IDLE plus any that raced the `DONE`.
    pub async fn done(self) -> Result<Vec<IdleEvent>> {
        let Self { stream, tag, pending } = self;
        stream.write_command(&Command::Done.serialize("")).await?;
        let mut events: Vec<IdleEvent> = pending.into();
        for bytes in stream.read_until_tagged(&tag).await? {
            match ResponseParser::parse(&bytes) {
                Ok(Response::Untagged(untagged)) => events.extend(IdleEvent::from_untagged(&untagged)),
                Ok(Response::Tagged { status, text, .. }) => {
                    return match status {
                        Status::Ok | Status::PreAuth => Ok(events),
                        Status::No => Err(Error::No(text)),
                        Status::Bad => Err(Error::Bad(text)),
                        Status::Bye => Err(Error::Bye(text)),
                    };
                }
                _ => {}
            }
        }
        Err(Error::Protocol("missing IDLE completion".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio_test::io::{Builder, Mock};

    use super::*;
    use crate::connection::client::{Client, Selected};

    async fn idling(builder: &mut Builder) -> Client<Mock, Selected> {
        let mock = builder.build();
        let client = Client::from_stream(mock).await.unwrap();
        let client = client.login("u", "p").await.unwrap();
        client.select("INBOX").await.unwrap().0
    }

    fn prelude() -> Builder {
        let mut b = Builder::new();
        b.read(b"* OK [CAPABILITY IMAP4rev1 IDLE] hi\r\n")
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK in\r\n")
            .write(b"A0002 SELECT INBOX\r\n")
            .read(b"* 1 EXISTS\r\nA0002 OK done\r\n")
            .write(b"A0003 IDLE\r\n")
            .read(b"+ idling\r\n");
        b
    }

    #[tokio::test]
    async fn exists_then_done() {
        let mut b = prelude();
        b.read(b"* 2 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0003 OK IDLE terminated\r\n");
        let mut client = idling(&mut b).await;
        let mut handle = client.idle().await.unwrap();
        let event = handle.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(event, IdleEvent::Exists(2));
        assert!(event.is_new_mail());
        assert!(handle.done().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exists_before_continuation_is_kept() {
        let mut b = Builder::new();
        b.read(b"* OK [CAPABILITY IMAP4rev1 IDLE] hi\r\n")
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK in\r\n")
            .write(b"A0002 SELECT INBOX\r\n")
            .read(b"* 1 EXISTS\r\nA0002 OK done\r\n")
            .write(b"A0003 IDLE\r\n")
            .read(b"* 1 EXPUNGE\r\n* 1 EXISTS\r\n+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0003 OK IDLE terminated\r\n");
        let mut client = idling(&mut b).await;
        let mut handle = client.idle().await.unwrap();
        assert_eq!(handle.wait(Duration::from_secs(5)).await.unwrap(), IdleEvent::Expunge(1));
        assert_eq!(handle.done().await.unwrap(), vec![IdleEvent::Exists(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn exists_racing_done_is_returned() {
        let mut b = prelude();
        b.wait(Duration::from_secs(60))
            .write(b"DONE\r\n")
            .read(b"* 2 EXISTS\r\n* 1 RECENT\r\nA0003 OK IDLE terminated\r\n");
        let mut client = idling(&mut b).await;
        let mut handle = client.idle().await.unwrap();
        assert_eq!(handle.wait(Duration::from_secs(1)).await.unwrap(), IdleEvent::Timeout);
        let late = handle.done().await.unwrap();
        assert_eq!(late, vec![IdleEvent::Exists(2), IdleEvent::Recent(1)]);
        assert!(late.iter().any(|e| e.is_new_mail()));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_server_times_out() {
        let mut b = prelude();
        b.wait(Duration::from_secs(60))
            .write(b"DONE\r\n")
            .read(b"A0003 OK IDLE terminated\r\n");
        let mut client = idling(&mut b).await;
        let mut handle = client.idle().await.unwrap();
        let event = handle.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(event, IdleEvent::Timeout);
        assert!(!event.is_new_mail());
        assert!(handle.done().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bye_during_idle_is_error() {
        let mut b = prelude();
        b.read(b"* BYE shutting down\r\n");
        let mut client = idling(&mut b).await;
        let mut handle = client.idle().await.unwrap();
        let err = handle.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::Bye(_)));
    }

    #[tokio::test]
    async fn idle_needs_capability() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK in\r\n")
            .write(b"A0002 SELECT INBOX\r\n")
            .read(b"A0002 OK done\r\n")
            .build();
        let client = Client::from_stream(mock).await.unwrap().login("u", "p").await.unwrap();
        let (mut client, _) = client.select("INBOX").await.unwrap();
        assert!(matches!(client.idle().await.unwrap_err(), Error::InvalidState(_)));
    }
}
