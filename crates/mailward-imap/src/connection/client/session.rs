//! Commands valid whenever the user is logged in.

use tokio::io::{AsyncRead, AsyncWrite};

use super::states::{Authenticated, Selected, Session};
use super::{Client, Completion};
use crate::command::Command;
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::{Flag, ListResponse, MailboxStatus, ResponseCode, Status, Uid};
use crate::{Error, Result};

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
    State: Session,
{
    /// `LIST reference pattern`.
    pub async fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListResponse>> {
        let done = self
            .execute(&Command::List {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            })
            .await?;
        Ok(done
            .untagged
            .into_iter()
            .filter_map(|r| match r {
                UntaggedResponse::List(entry) => Some(entry),
                _ => None,
            })
            .collect())
    }

    /// Hierarchy delimiter from `LIST "" ""`.
    ///
    /// Servers that answer the root probe with nothing are asked for `*`
    /// instead and the first entry's delimiter is used.
    pub async fn delimiter(&mut self) -> Result<Option<char>> {
        let root = self.list("", "").await?;
        if let Some(entry) = root.first() {
            return Ok(entry.delimiter);
        }
        let all = self.list("", "*").await?;
        Ok(all.iter().find_map(|e| e.delimiter))
    }

    /// `CREATE mailbox`.
    pub async fn create(&mut self, mailbox: &str) -> Result<()> {
        self.execute(&Command::Create {
            mailbox: mailbox.to_string(),
        })
        .await
        .map(drop)
    }

    /// `APPEND` with optional flags and internal date.
    ///
    /// Returns the new UID when the server reports `APPENDUID`.
    pub async fn append(
        &mut self,
        mailbox: &str,
        flags: &[Flag],
        internal_date: Option<&str>,
        message: &[u8],
    ) -> Result<Option<Uid>> {
        let tag = self.tags.next();
        let command = Command::Append {
            mailbox: mailbox.to_string(),
            flags: flags.to_vec(),
            internal_date: internal_date.map(str::to_string),
            size: message.len(),
        };
        self.stream.write_command(&command.serialize(&tag)).await?;

        let first = self.stream.read_response().await?;
        match ResponseParser::parse(&first)? {
            Response::Continuation { .. } => {}
            Response::Tagged { status: Status::No, text, .. } => return Err(Error::No(text)),
            Response::Tagged { status: Status::Bad, text, .. } => return Err(Error::Bad(text)),
            other => {
                return Err(Error::Protocol(format!("expected continuation for APPEND, got {other:?}")));
            }
        }

        self.stream.write_raw(message).await?;
        self.stream.write_raw(b"\r\n").await?;
        let done = self.complete(&tag).await?;
        Ok(match done.code {
            Some(ResponseCode::AppendUid { uid, .. }) => Some(uid),
            _ => None,
        })
    }

    /// Issues SELECT and records the mailbox on success.
    pub(crate) async fn select_mailbox(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        // A failed SELECT leaves no mailbox selected on the server.
        self.selected = None;
        let done = self
            .execute(&Command::Select {
                mailbox: mailbox.to_string(),
            })
            .await?;
        self.selected = Some(mailbox.to_string());
        Ok(mailbox_status(done))
    }
}

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// `SELECT`, entering the selected state.
    pub async fn select(mut self, mailbox: &str) -> Result<(Client<S, Selected>, MailboxStatus)> {
        let status = self.select_mailbox(mailbox).await?;
        Ok((self.into_state(), status))
    }
}

fn mailbox_status(done: Completion) -> MailboxStatus {
    let mut status = MailboxStatus {
        read_only: matches!(done.code, Some(ResponseCode::ReadOnly)),
        ..MailboxStatus::default()
    };
    for response in done.untagged {
        match response {
            UntaggedResponse::Exists(n) => status.exists = n,
            UntaggedResponse::Recent(n) => status.recent = n,
            UntaggedResponse::Flags(flags) => status.flags = flags,
            UntaggedResponse::Condition { code: Some(code), .. } => match code {
                ResponseCode::UidNext(uid) => status.uid_next = Some(uid),
                ResponseCode::UidValidity(v) => status.uid_validity = Some(v),
                _ => {}
            },
            _ => {}
        }
    }
    status
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
    use crate::types::Flag;

    const GREETING: &[u8] = b"* OK ready\r\n";

    async fn logged_in<S>(mock: S) -> Client<S, Authenticated>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Client::from_stream(mock).await.unwrap().login("u", "p").await.unwrap()
    }

    #[tokio::test]
    async fn select_parses_status() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 SELECT INBOX\r\n")
            .read(b"* 172 EXISTS\r\n* 1 RECENT\r\n* FLAGS (\\Seen \\Deleted)\r\n")
            .read(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n* OK [UIDNEXT 4392] Predicted\r\n")
            .read(b"A0002 OK [READ-WRITE] SELECT completed\r\n")
            .build();
        let (client, status) = logged_in(mock).await.select("INBOX").await.unwrap();
        assert_eq!(status.exists, 172);
        assert_eq!(status.recent, 1);
        assert_eq!(status.uid_next.unwrap().get(), 4392);
        assert_eq!(status.uid_validity.unwrap().get(), 3857529045);
        assert!(status.flags.contains(&Flag::Deleted));
        assert!(!status.read_only);
        assert_eq!(client.mailbox(), Some("INBOX"));
    }

    #[tokio::test]
    async fn select_missing_mailbox_is_no() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 SELECT Quarantine\r\n")
            .read(b"A0002 NO Mailbox doesn't exist: Quarantine\r\n")
            .build();
        let result = logged_in(mock).await.select("Quarantine").await;
        assert!(matches!(result, Err(Error::No(_))));
    }

    #[tokio::test]
    async fn delimiter_from_root_probe() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 LIST \"\" \"\"\r\n")
            .read(b"* LIST (\\Noselect) \".\" \"\"\r\nA0002 OK LIST completed\r\n")
            .build();
        let mut client = logged_in(mock).await;
        assert_eq!(client.delimiter().await.unwrap(), Some('.'));
    }

    #[tokio::test]
    async fn delimiter_falls_back_to_wildcard() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 LIST \"\" \"\"\r\n")
            .read(b"A0002 OK LIST completed\r\n")
            .write(b"A0003 LIST \"\" *\r\n")
            .read(b"* LIST () \"/\" INBOX\r\n* LIST () \"/\" Archive\r\nA0003 OK done\r\n")
            .build();
        let mut client = logged_in(mock).await;
        assert_eq!(client.delimiter().await.unwrap(), Some('/'));
    }

    #[tokio::test]
    async fn append_waits_for_continuation() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 APPEND INBOX \"01-Jan-2024 10:00:00 +0000\" {5}\r\n")
            .read(b"+ Ready for literal data\r\n")
            .write(b"hello")
            .write(b"\r\n")
            .read(b"A0002 OK [APPENDUID 38505 3955] APPEND completed\r\n")
            .build();
        let mut client = logged_in(mock).await;
        let uid = client
            .append("INBOX", &[], Some("01-Jan-2024 10:00:00 +0000"), b"hello")
            .await
            .unwrap();
        assert_eq!(uid.map(Uid::get), Some(3955));
    }

    #[tokio::test]
    async fn append_refused_before_literal() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 APPEND Missing {5}\r\n")
            .read(b"A0002 NO [TRYCREATE] no such mailbox\r\n")
            .build();
        let mut client = logged_in(mock).await;
        let err = client.append("Missing", &[], None, b"hello").await.unwrap_err();
        assert!(matches!(err, Error::No(_)));
    }

    #[tokio::test]
    async fn create_mailbox() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 CREATE INBOX.Quarantine\r\n")
            .read(b"A0002 OK CREATE completed\r\n")
            .build();
        logged_in(mock).await.create("INBOX.Quarantine").await.unwrap();
    }
}
