//! End-to-end client sessions against a canned server transcript.

#![allow(clippy::unwrap_used)]

use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailward_imap::{Capability, Client, FetchAttribute, FetchItem, SearchCriteria, Uid, UidSet};

/// Replays canned server output and records what the client sent.
struct MockStream {
    responses: Cursor<Vec<u8>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl MockStream {
    fn new(responses: &[u8]) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = Self { responses: Cursor::new(responses.to_vec()), sent: Arc::clone(&sent) };
        (stream, sent)
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let pos = usize::try_from(self.responses.position()).unwrap();
        let data = self.responses.get_ref();
        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }
        let n = (data.len() - pos).min(buf.remaining());
        buf.put_slice(&data[pos..pos + n]);
        self.responses.set_position((pos + n) as u64);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn uid(n: u32) -> Uid {
    Uid::new(n).unwrap()
}

#[tokio::test]
async fn watch_and_quarantine_session() {
    let server = concat!(
        "* OK [CAPABILITY IMAP4rev1 MOVE UIDPLUS IDLE] ready\r\n",
        "A0001 OK [CAPABILITY IMAP4rev1 MOVE UIDPLUS IDLE] logged in\r\n",
        "* 2 EXISTS\r\n",
        "* 0 RECENT\r\n",
        "* OK [UIDVALIDITY 3857529045] UIDs valid\r\n",
        "* OK [UIDNEXT 43] next\r\n",
        "A0002 OK [READ-WRITE] SELECT completed\r\n",
        "* SEARCH 41 42\r\n",
        "A0003 OK SEARCH completed\r\n",
        "* 2 FETCH (UID 42 INTERNALDATE \"17-Jul-2024 02:44:25 +0000\" BODY[] {19}\r\n",
        "Subject: hi\r\n\r\nyo\r\n",
        ")\r\n",
        "A0004 OK FETCH completed\r\n",
        "A0005 OK [COPYUID 7 42 9] moved\r\n",
        "* BYE logging out\r\n",
        "A0006 OK LOGOUT completed\r\n",
    );
    let (stream, sent) = MockStream::new(server.as_bytes());

    let client = Client::from_stream(stream).await.unwrap();
    let client = client.login("watcher", "secret").await.unwrap();
    assert!(client.has_capability(&Capability::Move));

    let (mut inbox, status) = client.select("INBOX").await.unwrap();
    assert_eq!(status.exists, 2);
    assert_eq!(status.uid_next, Some(uid(43)));
    assert_eq!(status.uid_validity.map(|v| v.get()), Some(3_857_529_045));

    let hits = inbox.uid_search(SearchCriteria::Uid(UidSet::From(uid(41)))).await.unwrap();
    assert_eq!(hits, vec![uid(41), uid(42)]);

    let fetched = inbox
        .uid_fetch(
            &UidSet::Single(uid(42)),
            vec![FetchAttribute::Uid, FetchAttribute::InternalDate, FetchAttribute::BodyPeek(None)],
        )
        .await
        .unwrap();
    let (_, items) = &fetched[0];
    assert!(items.contains(&FetchItem::Uid(uid(42))));
    let body = items.iter().find_map(|item| match item {
        FetchItem::Body { data: Some(d), .. } => Some(d.clone()),
        _ => None,
    });
    assert_eq!(body.as_deref(), Some(&b"Subject: hi\r\n\r\nyo\r\n"[..]));

    inbox.uid_move(&UidSet::Single(uid(42)), "Quarantine").await.unwrap();
    inbox.logout().await.unwrap();

    let sent = String::from_utf8(sent.lock().unwrap().clone()).unwrap();
    assert_eq!(
        sent,
        concat!(
            "A0001 LOGIN watcher secret\r\n",
            "A0002 SELECT INBOX\r\n",
            "A0003 UID SEARCH UID 41:*\r\n",
            "A0004 UID FETCH 42 (UID INTERNALDATE BODY.PEEK[])\r\n",
            "A0005 UID MOVE 42 Quarantine\r\n",
            "A0006 LOGOUT\r\n",
        )
    );
}

#[tokio::test]
async fn append_to_quarantine_folder() {
    let server = concat!(
        "* OK [CAPABILITY IMAP4rev1 UIDPLUS] ready\r\n",
        "A0001 OK logged in\r\n",
        "+ Ready for literal data\r\n",
        "A0002 OK [APPENDUID 38505 3955] APPEND completed\r\n",
    );
    let (stream, sent) = MockStream::new(server.as_bytes());
    let client = Client::from_stream(stream).await.unwrap();
    let mut client = client.login("u", "p").await.unwrap();

    let appended = client
        .append("Quarantine", &[mailward_imap::Flag::Seen], None, b"Subject: x\r\n\r\nbody\r\n")
        .await
        .unwrap();
    assert_eq!(appended, Some(uid(3955)));

    let sent = String::from_utf8(sent.lock().unwrap().clone()).unwrap();
    assert!(sent.ends_with("A0002 APPEND Quarantine (\\Seen) {20}\r\nSubject: x\r\n\r\nbody\r\n\r\n"));
}

#[tokio::test]
async fn rejected_login_keeps_nothing_alive() {
    let server = "* OK ready\r\nA0001 NO [AUTHENTICATIONFAILED] bad credentials\r\n";
    let (stream, _) = MockStream::new(server.as_bytes());
    let client = Client::from_stream(stream).await.unwrap();
    let err = client.login("u", "wrong").await.unwrap_err();
    assert!(matches!(err, mailward_imap::Error::Auth(_)));
}
