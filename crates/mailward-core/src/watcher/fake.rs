//! In-memory IMAP server for tests.
//!
//! Every [`FakeMailbox`] opened by a [`FakeConnector`] shares one
//! [`FakeServer`], so a test can drive the watcher or the coordinator and
//! then inspect the folders.

#![allow(dead_code, clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailward_imap::{Capability, Flag};
use mailward_mime::Headers;

use super::mailbox::{Connector, EnvelopeSummary, FetchedMessage, IdleOutcome, Mailbox, MailboxInfo};
use crate::store::Account;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub raw: Vec<u8>,
    pub internal_date: Option<String>,
    pub deleted: bool,
    pub seen: bool,
}

#[derive(Debug, Clone)]
pub struct FakeFolder {
    pub messages: BTreeMap<u32, FakeMessage>,
    pub uid_next: u32,
}

impl Default for FakeFolder {
    fn default() -> Self {
        Self { messages: BTreeMap::new(), uid_next: 1 }
    }
}

impl FakeFolder {
    fn add(&mut self, message: FakeMessage) -> u32 {
        let uid = self.uid_next;
        self.messages.insert(uid, message);
        self.uid_next += 1;
        uid
    }
}

#[derive(Debug)]
pub struct FakeServer {
    pub folders: BTreeMap<String, FakeFolder>,
    pub capabilities: Vec<Capability>,
    pub delimiter: Option<char>,
    /// Folders whose CREATE fails.
    pub deny_create: HashSet<String>,
    /// Every MOVE fails.
    pub fail_move: bool,
    /// Connections fail with this error text.
    pub refuse_connect: Option<String>,
    /// Pending new-mail signal for the next IDLE.
    pub idle_signal: bool,
    /// Commands in order, e.g. `MOVE 3 Quarantine`.
    pub log: Vec<String>,
    pub connects: usize,
}

impl Default for FakeServer {
    fn default() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert("INBOX".to_string(), FakeFolder::default());
        Self {
            folders,
            capabilities: vec![Capability::Imap4Rev1, Capability::Idle, Capability::Move, Capability::UidPlus],
            delimiter: Some('/'),
            deny_create: HashSet::new(),
            fail_move: false,
            refuse_connect: None,
            idle_signal: false,
            log: Vec::new(),
            connects: 0,
        }
    }
}

impl FakeServer {
    /// Shared handle to a default server.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Delivers a message into `folder`, creating it, and returns its UID.
    pub fn deliver(&mut self, folder: &str, raw: &[u8]) -> u32 {
        self.folders.entry(folder.to_string()).or_default().add(FakeMessage {
            raw: raw.to_vec(),
            internal_date: Some("01-Oct-2026 09:00:00 +0000".to_string()),
            deleted: false,
            seen: false,
        })
    }

    /// UIDs in `folder`, ascending.
    pub fn uids(&self, folder: &str) -> Vec<u32> {
        self.folders.get(folder).map(|f| f.messages.keys().copied().collect()).unwrap_or_default()
    }

    /// Raw bodies in `folder`, by UID.
    pub fn raws(&self, folder: &str) -> Vec<Vec<u8>> {
        self.folders
            .get(folder)
            .map(|f| f.messages.values().map(|m| m.raw.clone()).collect())
            .unwrap_or_default()
    }

    /// Messages in `folder` whose header `name` contains `value`.
    pub fn with_header(&self, folder: &str, name: &str, value: &str) -> Vec<u32> {
        let Some(f) = self.folders.get(folder) else {
            return Vec::new();
        };
        let value = value.to_ascii_lowercase();
        f.messages
            .iter()
            .filter(|(_, m)| {
                Headers::parse(&m.raw)
                    .get_all(name)
                    .iter()
                    .any(|v| v.to_ascii_lowercase().contains(&value))
            })
            .map(|(uid, _)| *uid)
            .collect()
    }
}

pub struct FakeMailbox {
    server: Arc<Mutex<FakeServer>>,
    selected: Option<String>,
}

impl FakeMailbox {
    pub fn open(server: Arc<Mutex<FakeServer>>) -> Self {
        Self { server, selected: Some("INBOX".to_string()) }
    }

    fn with_selected<T>(&self, f: impl FnOnce(&mut FakeServer, &str) -> Result<T>) -> Result<T> {
        let Some(folder) = self.selected.clone() else {
            return Err(Error::Imap(mailward_imap::Error::InvalidState("no mailbox selected".into())));
        };
        let mut server = self.server.lock().unwrap();
        f(&mut server, &folder)
    }
}

fn no(text: &str) -> Error {
    Error::Imap(mailward_imap::Error::No(text.to_string()))
}

impl Mailbox for FakeMailbox {
    fn capabilities(&self) -> Vec<Capability> {
        self.server.lock().unwrap().capabilities.clone()
    }

    async fn delimiter(&mut self) -> Result<Option<char>> {
        Ok(self.server.lock().unwrap().delimiter)
    }

    async fn select(&mut self, folder: &str) -> Result<MailboxInfo> {
        let server = self.server.lock().unwrap();
        let Some(f) = server.folders.get(folder) else {
            drop(server);
            self.selected = None;
            return Err(no("[NONEXISTENT] no such mailbox"));
        };
        let info = MailboxInfo {
            uid_next: Some(f.uid_next),
            exists: u32::try_from(f.messages.len()).unwrap(),
        };
        drop(server);
        self.selected = Some(folder.to_string());
        Ok(info)
    }

    async fn create(&mut self, folder: &str) -> Result<()> {
        let mut server = self.server.lock().unwrap();
        server.log.push(format!("CREATE {folder}"));
        if server.deny_create.contains(folder) || server.folders.contains_key(folder) {
            return Err(no("cannot create"));
        }
        server.folders.insert(folder.to_string(), FakeFolder::default());
        Ok(())
    }

    async fn uid_search_all(&mut self) -> Result<Vec<u32>> {
        self.with_selected(|s, f| Ok(s.uids(f)))
    }

    async fn uid_search_unseen(&mut self) -> Result<Vec<u32>> {
        self.with_selected(|s, f| {
            Ok(s.folders[f].messages.iter().filter(|(_, m)| !m.seen).map(|(uid, _)| *uid).collect())
        })
    }

    async fn uid_search_header(&mut self, name: &str, value: &str) -> Result<Vec<u32>> {
        let value = value.trim_matches('"');
        self.with_selected(|s, f| Ok(s.with_header(f, name, value)))
    }

    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>> {
        self.with_selected(|s, f| {
            let folder = s.folders.get_mut(f).unwrap();
            Ok(uids
                .iter()
                .filter_map(|uid| {
                    folder.messages.get(uid).map(|m| FetchedMessage {
                        uid: *uid,
                        raw: m.raw.clone(),
                        internal_date: m.internal_date.clone(),
                    })
                })
                .collect())
        })
    }

    async fn fetch_envelopes(&mut self, uids: &[u32]) -> Result<Vec<EnvelopeSummary>> {
        self.with_selected(|s, f| {
            Ok(uids
                .iter()
                .filter_map(|uid| {
                    let m = s.folders[f].messages.get(uid)?;
                    let headers = Headers::parse(&m.raw);
                    Some(EnvelopeSummary {
                        uid: *uid,
                        subject: headers.get_decoded("subject"),
                        sender: headers.get("from").map(str::to_string),
                        date: headers.get("date").map(str::to_string),
                    })
                })
                .collect())
        })
    }

    async fn uid_move(&mut self, uids: &[u32], target: &str) -> Result<()> {
        self.with_selected(|s, f| {
            s.log.push(format!("MOVE {uids:?} {target}"));
            if s.fail_move {
                return Err(no("MOVE failed"));
            }
            if !s.folders.contains_key(target) {
                return Err(no("[TRYCREATE] no such mailbox"));
            }
            for uid in uids {
                if let Some(m) = s.folders.get_mut(f).unwrap().messages.remove(uid) {
                    s.folders.get_mut(target).unwrap().add(m);
                }
            }
            Ok(())
        })
    }

    async fn uid_copy(&mut self, uids: &[u32], target: &str) -> Result<()> {
        self.with_selected(|s, f| {
            s.log.push(format!("COPY {uids:?} {target}"));
            if !s.folders.contains_key(target) {
                return Err(no("[TRYCREATE] no such mailbox"));
            }
            let copies: Vec<FakeMessage> =
                uids.iter().filter_map(|uid| s.folders[f].messages.get(uid).cloned()).collect();
            for mut m in copies {
                m.deleted = false;
                s.folders.get_mut(target).unwrap().add(m);
            }
            Ok(())
        })
    }

    async fn uid_add_deleted(&mut self, uids: &[u32]) -> Result<()> {
        self.with_selected(|s, f| {
            s.log.push(format!("STORE {uids:?} +Deleted"));
            for uid in uids {
                if let Some(m) = s.folders.get_mut(f).unwrap().messages.get_mut(uid) {
                    m.deleted = true;
                }
            }
            Ok(())
        })
    }

    async fn expunge(&mut self) -> Result<()> {
        self.with_selected(|s, f| {
            s.log.push(format!("EXPUNGE {f}"));
            s.folders.get_mut(f).unwrap().messages.retain(|_, m| !m.deleted);
            Ok(())
        })
    }

    async fn uid_expunge(&mut self, uids: &[u32]) -> Result<()> {
        self.with_selected(|s, f| {
            s.log.push(format!("UID EXPUNGE {uids:?}"));
            s.folders
                .get_mut(f)
                .unwrap()
                .messages
                .retain(|uid, m| !(m.deleted && uids.contains(uid)));
            Ok(())
        })
    }

    async fn append(&mut self, folder: &str, flags: &[Flag], internal_date: Option<&str>, raw: &[u8]) -> Result<()> {
        let mut server = self.server.lock().unwrap();
        server.log.push(format!("APPEND {folder}"));
        let Some(target) = server.folders.get_mut(folder) else {
            return Err(no("[TRYCREATE] no such mailbox"));
        };
        target.add(FakeMessage {
            raw: raw.to_vec(),
            internal_date: internal_date.map(str::to_string),
            deleted: false,
            seen: flags.contains(&Flag::Seen),
        });
        Ok(())
    }

    async fn noop(&mut self) -> Result<()> {
        Ok(())
    }

    async fn idle_wait(&mut self, timeout: Duration) -> Result<IdleOutcome> {
        {
            let mut server = self.server.lock().unwrap();
            if !server.capabilities.contains(&Capability::Idle) {
                return Ok(IdleOutcome::Unsupported);
            }
            if std::mem::take(&mut server.idle_signal) {
                return Ok(IdleOutcome::NewMail);
            }
        }
        tokio::time::sleep(timeout).await;
        Ok(IdleOutcome::Timeout)
    }

    async fn logout(self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeConnector {
    pub server: Arc<Mutex<FakeServer>>,
}

impl FakeConnector {
    pub fn new(server: Arc<Mutex<FakeServer>>) -> Self {
        Self { server }
    }
}

impl Connector for FakeConnector {
    type Mailbox = FakeMailbox;

    async fn connect(&self, _account: &Account) -> Result<FakeMailbox> {
        {
            let mut server = self.server.lock().unwrap();
            server.connects += 1;
            if let Some(reason) = server.refuse_connect.clone() {
                return Err(Error::Imap(mailward_imap::Error::Auth(reason)));
            }
        }
        Ok(FakeMailbox::open(self.server.clone()))
    }
}
