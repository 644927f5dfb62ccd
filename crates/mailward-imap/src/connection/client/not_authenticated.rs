//! Greeting and LOGIN.

use std::marker::PhantomData;

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, NotAuthenticated};
use crate::command::{Command, TagGenerator};
use crate::connection::framed::FramedStream;
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::{ResponseCode, Status};
use crate::{Error, Result};

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the server greeting from a fresh connection.
    ///
    /// A `BYE` greeting is an error. Capabilities carried in the greeting are
    /// kept.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut stream = FramedStream::new(stream);
        let greeting = stream.read_response().await?;

        let mut capabilities = Vec::new();
        match ResponseParser::parse(&greeting)? {
            Response::Untagged(UntaggedResponse::Condition {
                status: Status::Bye,
                text,
                ..
            }) => return Err(Error::Bye(text)),
            Response::Untagged(UntaggedResponse::Condition {
                code: Some(ResponseCode::Capability(caps)),
                ..
            }) => capabilities = caps,
            Response::Untagged(UntaggedResponse::Condition { .. }) => {}
            other => {
                return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
            }
        }

        Ok(Self {
            stream,
            tags: TagGenerator::default(),
            capabilities,
            selected: None,
            _state: PhantomData,
        })
    }

    /// `LOGIN`. A `NO` becomes [`Error::Auth`].
    pub async fn login(mut self, username: &str, password: &str) -> Result<Client<S, Authenticated>> {
        let command = Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        };
        let done = match self.execute(&command).await {
            Err(Error::No(text)) => return Err(Error::Auth(text)),
            other => other?,
        };

        if let Some(ResponseCode::Capability(caps)) = done.code {
            self.capabilities = caps;
        }
        for response in done.untagged {
            if let UntaggedResponse::Capability(caps) = response {
                self.capabilities = caps;
            }
        }
        Ok(self.into_state())
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
    use crate::types::Capability;

    #[tokio::test]
    async fn bye_greeting_is_error() {
        let mock = Builder::new().read(b"* BYE too many connections\r\n").build();
        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(matches!(err, Error::Bye(t) if t == "too many connections"));
    }

    #[tokio::test]
    async fn login_updates_capabilities() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 LOGINDISABLED] ready\r\n")
            .write(b"A0001 LOGIN alice secret\r\n")
            .read(b"A0001 OK [CAPABILITY IMAP4rev1 IDLE UIDPLUS] Logged in\r\n")
            .build();
        let client = Client::from_stream(mock).await.unwrap();
        let client = client.login("alice", "secret").await.unwrap();
        assert!(client.has_capability(&Capability::Idle));
        assert!(!client.has_capability(&Capability::LoginDisabled));
    }

    #[tokio::test]
    async fn rejected_login_is_auth_error() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN alice wrong\r\n")
            .read(b"A0001 NO [AUTHENTICATIONFAILED] Authentication failed.\r\n")
            .build();
        let client = Client::from_stream(mock).await.unwrap();
        let err = client.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(err.to_string().contains("authentication failed"));
    }
}
