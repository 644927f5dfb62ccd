//! Commands that operate on the selected mailbox.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, Selected};
use crate::command::{Command, FetchAttribute, SearchCriteria, StoreAction};
use crate::connection::idle::{IdleEvent, IdleHandle};
use crate::parser::{FetchItem, Response, ResponseParser, UntaggedResponse};
use crate::types::{Capability, MailboxStatus, Uid, UidSet};
use crate::{Error, Result};

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Name of the selected mailbox, `None` after a failed re-SELECT.
    #[must_use]
    pub fn mailbox(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Switches to another mailbox without leaving the selected state.
    pub async fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        self.select_mailbox(mailbox).await
    }

    /// `CLOSE`: expunges `\Deleted` messages and deselects.
    pub async fn close(mut self) -> Result<Client<S, Authenticated>> {
        self.execute(&Command::Close).await?;
        self.selected = None;
        Ok(self.into_state())
    }

    /// `UID SEARCH`. Results come back in server order.
    pub async fn uid_search(&mut self, criteria: SearchCriteria) -> Result<Vec<Uid>> {
        let done = self.execute(&Command::UidSearch(criteria)).await?;
        Ok(done
            .untagged
            .into_iter()
            .filter_map(|r| match r {
                UntaggedResponse::Search(hits) => Some(hits),
                _ => None,
            })
            .flatten()
            .filter_map(Uid::new)
            .collect())
    }

    /// `UID FETCH`, returning `(sequence number, items)` per message.
    pub async fn uid_fetch(
        &mut self,
        uids: &UidSet,
        items: Vec<FetchAttribute>,
    ) -> Result<Vec<(u32, Vec<FetchItem>)>> {
        let done = self
            .execute(&Command::UidFetch {
                uids: uids.clone(),
                items,
            })
            .await?;
        Ok(done
            .untagged
            .into_iter()
            .filter_map(|r| match r {
                UntaggedResponse::Fetch { seq, items } => Some((seq, items)),
                _ => None,
            })
            .collect())
    }

    /// `UID STORE ... .SILENT`.
    pub async fn uid_store(&mut self, uids: &UidSet, action: StoreAction) -> Result<()> {
        self.execute(&Command::UidStore {
            uids: uids.clone(),
            action,
            silent: true,
        })
        .await
        .map(drop)
    }

    /// `UID COPY`.
    pub async fn uid_copy(&mut self, uids: &UidSet, mailbox: &str) -> Result<()> {
        self.execute(&Command::UidCopy {
            uids: uids.clone(),
            mailbox: mailbox.to_string(),
        })
        .await
        .map(drop)
    }

    /// `UID MOVE`. Fails with [`Error::InvalidState`] when MOVE is not
    /// advertised, without touching the wire.
    pub async fn uid_move(&mut self, uids: &UidSet, mailbox: &str) -> Result<()> {
        if !self.has_capability(&Capability::Move) {
            return Err(Error::InvalidState("server does not support MOVE".to_string()));
        }
        self.execute(&Command::UidMove {
            uids: uids.clone(),
            mailbox: mailbox.to_string(),
        })
        .await
        .map(drop)
    }

    /// `EXPUNGE`. Returns the expunged sequence numbers.
    pub async fn expunge(&mut self) -> Result<Vec<u32>> {
        let done = self.execute(&Command::Expunge).await?;
        Ok(done
            .untagged
            .into_iter()
            .filter_map(|r| match r {
                UntaggedResponse::Expunge(n) => Some(n),
                _ => None,
            })
            .collect())
    }

    /// `UID EXPUNGE` (UIDPLUS).
    pub async fn uid_expunge(&mut self, uids: &UidSet) -> Result<()> {
        if !self.has_capability(&Capability::UidPlus) {
            return Err(Error::InvalidState("server does not support UIDPLUS".to_string()));
        }
        self.execute(&Command::UidExpunge(uids.clone())).await.map(drop)
    }

    /// Starts IDLE and waits for the server's go-ahead.
    pub async fn idle(&mut self) -> Result<IdleHandle<'_, S>> {
        if !self.has_capability(&Capability::Idle) {
            return Err(Error::InvalidState("server does not support IDLE".to_string()));
        }
        let tag = self.tags.next();
        self.stream.write_command(&Command::Idle.serialize(&tag)).await?;
        // Pending EXISTS and similar may arrive before the `+`.
        let mut early = Vec::new();
        loop {
            let response = self.stream.read_response().await?;
            match ResponseParser::parse(&response) {
                Ok(Response::Continuation { .. }) => break,
                Ok(Response::Tagged { text, .. }) => return Err(Error::No(text)),
                Ok(Response::Untagged(untagged)) => early.extend(IdleEvent::from_untagged(&untagged)),
                Err(_) => {}
            }
        }
        Ok(IdleHandle::new(&mut self.stream, tag, early))
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
    use tokio_test::io::{Builder, Mock};

    use super::*;
    use crate::types::Flag;

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    fn script(caps: &str) -> Builder {
        let greeting = format!("* OK [CAPABILITY IMAP4rev1 {caps}] ready\r\n");
        let mut b = Builder::new();
        b.read(greeting.as_bytes())
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 SELECT INBOX\r\n")
            .read(b"* 3 EXISTS\r\n* OK [UIDNEXT 12] next\r\nA0002 OK [READ-WRITE] done\r\n");
        b
    }

    async fn selected(mock: Mock) -> Client<Mock, Selected> {
        let client = Client::from_stream(mock).await.unwrap().login("u", "p").await.unwrap();
        client.select("INBOX").await.unwrap().0
    }

    #[tokio::test]
    async fn search_returns_uids() {
        let mock = script("")
            .write(b"A0003 UID SEARCH UID 9:*\r\n")
            .read(b"* SEARCH 9 10 11\r\nA0003 OK SEARCH completed\r\n")
            .build();
        let mut client = selected(mock).await;
        let hits = client
            .uid_search(SearchCriteria::Uid(UidSet::From(uid(9))))
            .await
            .unwrap();
        assert_eq!(hits, vec![uid(9), uid(10), uid(11)]);
    }

    #[tokio::test]
    async fn fetch_body_and_date() {
        let mock = script("")
            .write(b"A0003 UID FETCH 10 (UID INTERNALDATE BODY.PEEK[])\r\n")
            .read(b"* 2 FETCH (UID 10 INTERNALDATE \"01-Jan-2024 10:00:00 +0000\" BODY[] {4}\r\n")
            .read(b"ab\r\n)\r\nA0003 OK FETCH completed\r\n")
            .build();
        let mut client = selected(mock).await;
        let fetched = client
            .uid_fetch(
                &UidSet::Single(uid(10)),
                vec![FetchAttribute::Uid, FetchAttribute::InternalDate, FetchAttribute::BodyPeek(None)],
            )
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].0, 2);
        assert!(fetched[0].1.contains(&FetchItem::Body { section: None, data: Some(b"ab\r\n".to_vec()) }));
    }

    #[tokio::test]
    async fn move_requires_capability() {
        let mock = script("").build();
        let mut client = selected(mock).await;
        let err = client.uid_move(&UidSet::Single(uid(3)), "Quarantine").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn move_when_supported() {
        let mock = script("MOVE")
            .write(b"A0003 UID MOVE 3:4 Quarantine\r\n")
            .read(b"* OK [COPYUID 1 3:4 1:2] moved\r\n* 1 EXPUNGE\r\n* 1 EXPUNGE\r\nA0003 OK Move completed\r\n")
            .build();
        let mut client = selected(mock).await;
        let set = UidSet::from_uids(&[uid(3), uid(4)]).unwrap();
        client.uid_move(&set, "Quarantine").await.unwrap();
    }

    #[tokio::test]
    async fn copy_store_expunge_sequence() {
        let mock = script("UIDPLUS")
            .write(b"A0003 UID COPY 5 Quarantine\r\n")
            .read(b"A0003 OK COPY completed\r\n")
            .write(b"A0004 UID STORE 5 +FLAGS.SILENT (\\Deleted)\r\n")
            .read(b"A0004 OK STORE completed\r\n")
            .write(b"A0005 EXPUNGE\r\n")
            .read(b"* 2 EXPUNGE\r\nA0005 OK EXPUNGE completed\r\n")
            .write(b"A0006 UID EXPUNGE 5\r\n")
            .read(b"A0006 OK done\r\n")
            .build();
        let mut client = selected(mock).await;
        let set = UidSet::Single(uid(5));
        client.uid_copy(&set, "Quarantine").await.unwrap();
        client.uid_store(&set, StoreAction::Add(vec![Flag::Deleted])).await.unwrap();
        assert_eq!(client.expunge().await.unwrap(), vec![2]);
        client.uid_expunge(&set).await.unwrap();
    }

    #[tokio::test]
    async fn reselect_in_place() {
        let mock = script("")
            .write(b"A0003 SELECT Quarantine\r\n")
            .read(b"* 0 EXISTS\r\nA0003 OK done\r\n")
            .build();
        let mut client = selected(mock).await;
        let status = client.select("Quarantine").await.unwrap();
        assert_eq!(status.exists, 0);
        assert_eq!(client.mailbox(), Some("Quarantine"));
    }

    #[tokio::test]
    async fn failed_reselect_clears_mailbox() {
        let mock = script("")
            .write(b"A0003 SELECT Nope\r\n")
            .read(b"A0003 NO no such mailbox\r\n")
            .build();
        let mut client = selected(mock).await;
        assert!(client.select("Nope").await.is_err());
        assert_eq!(client.mailbox(), None);
    }
}
