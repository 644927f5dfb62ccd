//! Command model and wire serialization.

mod args;
mod tag;

use std::fmt::Write as _;

use crate::types::{Flag, UidSet};

pub use args::{FetchAttribute, SearchCriteria, StoreAction};
pub use tag::TagGenerator;

/// A command the client knows how to send.
///
/// Everything message-addressed goes through the `UID` form; sequence numbers
/// shift under concurrent expunges and are never used to move mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CAPABILITY`
    Capability,
    /// `NOOP`
    Noop,
    /// `LOGOUT`
    Logout,
    /// `LOGIN user pass`
    Login {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// `SELECT mailbox`
    Select {
        /// Mailbox name.
        mailbox: String,
    },
    /// `CREATE mailbox`
    Create {
        /// Mailbox name.
        mailbox: String,
    },
    /// `LIST reference pattern`
    List {
        /// Reference name.
        reference: String,
        /// Pattern with `*`/`%` wildcards.
        pattern: String,
    },
    /// `APPEND mailbox (flags) "date" {n}`; the literal follows a continuation.
    Append {
        /// Target mailbox.
        mailbox: String,
        /// Initial flags.
        flags: Vec<Flag>,
        /// Internal date in IMAP date-time form.
        internal_date: Option<String>,
        /// Literal length in bytes.
        size: usize,
    },
    /// `CLOSE`
    Close,
    /// `EXPUNGE`
    Expunge,
    /// `UID EXPUNGE set` (UIDPLUS)
    UidExpunge(UidSet),
    /// `UID SEARCH criteria`
    UidSearch(SearchCriteria),
    /// `UID FETCH set items`
    UidFetch {
        /// Messages.
        uids: UidSet,
        /// Items to return.
        items: Vec<FetchAttribute>,
    },
    /// `UID STORE set [+-]FLAGS[.SILENT] (...)`
    UidStore {
        /// Messages.
        uids: UidSet,
        /// Flag change.
        action: StoreAction,
        /// Suppress the untagged FETCH echo.
        silent: bool,
    },
    /// `UID COPY set mailbox`
    UidCopy {
        /// Messages.
        uids: UidSet,
        /// Destination.
        mailbox: String,
    },
    /// `UID MOVE set mailbox` (RFC 6851)
    UidMove {
        /// Messages.
        uids: UidSet,
        /// Destination.
        mailbox: String,
    },
    /// `IDLE`
    Idle,
    /// `DONE`, untagged, ends IDLE.
    Done,
}

impl Command {
    /// Serializes the command, CRLF included.
    ///
    /// `DONE` ignores `tag` because it is a continuation of IDLE.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut line = String::new();
        if !matches!(self, Self::Done) {
            line.push_str(tag);
            line.push(' ');
        }
        self.write_body(&mut line);
        line.push_str("\r\n");
        line.into_bytes()
    }

    // `write!` into a String cannot fail.
    fn write_body(&self, out: &mut String) {
        match self {
            Self::Capability => out.push_str("CAPABILITY"),
            Self::Noop => out.push_str("NOOP"),
            Self::Logout => out.push_str("LOGOUT"),
            Self::Close => out.push_str("CLOSE"),
            Self::Expunge => out.push_str("EXPUNGE"),
            Self::Idle => out.push_str("IDLE"),
            Self::Done => out.push_str("DONE"),
            Self::Login { username, password } => {
                out.push_str("LOGIN ");
                push_astring(out, username);
                out.push(' ');
                push_astring(out, password);
            }
            Self::Select { mailbox } => {
                out.push_str("SELECT ");
                push_astring(out, mailbox);
            }
            Self::Create { mailbox } => {
                out.push_str("CREATE ");
                push_astring(out, mailbox);
            }
            Self::List { reference, pattern } => {
                out.push_str("LIST ");
                push_astring(out, reference);
                out.push(' ');
                push_list_mailbox(out, pattern);
            }
            Self::Append {
                mailbox,
                flags,
                internal_date,
                size,
            } => {
                out.push_str("APPEND ");
                push_astring(out, mailbox);
                if !flags.is_empty() {
                    out.push_str(" (");
                    push_flags(out, flags);
                    out.push(')');
                }
                if let Some(date) = internal_date {
                    out.push(' ');
                    push_quoted(out, date);
                }
                let _ = write!(out, " {{{size}}}");
            }
            Self::UidExpunge(uids) => {
                let _ = write!(out, "UID EXPUNGE {uids}");
            }
            Self::UidSearch(criteria) => {
                out.push_str("UID SEARCH ");
                push_criteria(out, criteria);
            }
            Self::UidFetch { uids, items } => {
                let _ = write!(out, "UID FETCH {uids} ");
                push_fetch_items(out, items);
            }
            Self::UidStore {
                uids,
                action,
                silent,
            } => {
                let (op, flags) = match action {
                    StoreAction::Add(f) => ("+FLAGS", f),
                    StoreAction::Remove(f) => ("-FLAGS", f),
                    StoreAction::Replace(f) => ("FLAGS", f),
                };
                let _ = write!(out, "UID STORE {uids} {op}");
                if *silent {
                    out.push_str(".SILENT");
                }
                out.push_str(" (");
                push_flags(out, flags);
                out.push(')');
            }
            Self::UidCopy { uids, mailbox } => {
                let _ = write!(out, "UID COPY {uids} ");
                push_astring(out, mailbox);
            }
            Self::UidMove { uids, mailbox } => {
                let _ = write!(out, "UID MOVE {uids} ");
                push_astring(out, mailbox);
            }
        }
    }
}

/// Bytes that force an astring into quoted form.
const fn needs_quoting(b: u8) -> bool {
    matches!(b, b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*' | b']') || b < 0x20 || b == 0x7F
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        // CR/LF cannot appear inside a quoted string.
        if !matches!(c, '\r' | '\n') {
            out.push(c);
        }
    }
    out.push('"');
}

fn push_astring(out: &mut String, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        push_quoted(out, s);
    } else {
        out.push_str(s);
    }
}

/// Like an astring but lets `*` and `%` through unquoted.
fn push_list_mailbox(out: &mut String, s: &str) {
    if !s.is_empty() && s.bytes().all(|b| matches!(b, b'*' | b'%') || !needs_quoting(b)) {
        out.push_str(s);
    } else {
        push_quoted(out, s);
    }
}

fn push_flags(out: &mut String, flags: &[Flag]) {
    for (i, flag) in flags.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(flag.as_str());
    }
}

fn push_criteria(out: &mut String, criteria: &SearchCriteria) {
    match criteria {
        SearchCriteria::All => out.push_str("ALL"),
        SearchCriteria::Unseen => out.push_str("UNSEEN"),
        SearchCriteria::Deleted => out.push_str("DELETED"),
        SearchCriteria::Uid(set) => {
            let _ = write!(out, "UID {set}");
        }
        SearchCriteria::Header(name, value) => {
            out.push_str("HEADER ");
            push_astring(out, name);
            out.push(' ');
            push_quoted(out, value);
        }
        SearchCriteria::And(keys) => {
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                push_criteria(out, key);
            }
        }
    }
}

fn push_fetch_items(out: &mut String, items: &[FetchAttribute]) {
    let wrap = items.len() != 1;
    if wrap {
        out.push('(');
    }
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        match item {
            FetchAttribute::Uid => out.push_str("UID"),
            FetchAttribute::Flags => out.push_str("FLAGS"),
            FetchAttribute::InternalDate => out.push_str("INTERNALDATE"),
            FetchAttribute::Rfc822Size => out.push_str("RFC822.SIZE"),
            FetchAttribute::Envelope => out.push_str("ENVELOPE"),
            FetchAttribute::BodyPeek(section) => {
                out.push_str("BODY.PEEK[");
                out.push_str(section.as_deref().unwrap_or_default());
                out.push(']');
            }
        }
    }
    if wrap {
        out.push(')');
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
    use super::*;
    use crate::types::Uid;

    fn wire(cmd: &Command) -> String {
        String::from_utf8(cmd.serialize("A0001")).unwrap()
    }

    fn set(raw: &[u32]) -> UidSet {
        let uids: Vec<Uid> = raw.iter().map(|&n| Uid::new(n).unwrap()).collect();
        UidSet::from_uids(&uids).unwrap()
    }

    #[test]
    fn login_quotes_when_needed() {
        let cmd = Command::Login {
            username: "alice@corp.example".into(),
            password: "p ss\"w\\d".into(),
        };
        assert_eq!(wire(&cmd), "A0001 LOGIN alice@corp.example \"p ss\\\"w\\\\d\"\r\n");
    }

    #[test]
    fn select_plain_and_quoted() {
        assert_eq!(wire(&Command::Select { mailbox: "INBOX".into() }), "A0001 SELECT INBOX\r\n");
        assert_eq!(
            wire(&Command::Select { mailbox: "[Gmail]/Spam Box".into() }),
            "A0001 SELECT \"[Gmail]/Spam Box\"\r\n"
        );
    }

    #[test]
    fn list_keeps_wildcards() {
        let probe = Command::List { reference: String::new(), pattern: String::new() };
        assert_eq!(wire(&probe), "A0001 LIST \"\" \"\"\r\n");
        let all = Command::List { reference: String::new(), pattern: "*".into() };
        assert_eq!(wire(&all), "A0001 LIST \"\" *\r\n");
    }

    #[test]
    fn append_with_flags_and_date() {
        let cmd = Command::Append {
            mailbox: "INBOX".into(),
            flags: vec![Flag::Seen],
            internal_date: Some("17-Jul-1996 02:44:25 -0700".into()),
            size: 310,
        };
        assert_eq!(
            wire(&cmd),
            "A0001 APPEND INBOX (\\Seen) \"17-Jul-1996 02:44:25 -0700\" {310}\r\n"
        );
    }

    #[test]
    fn append_minimal() {
        let cmd = Command::Append {
            mailbox: "INBOX".into(),
            flags: Vec::new(),
            internal_date: None,
            size: 5,
        };
        assert_eq!(wire(&cmd), "A0001 APPEND INBOX {5}\r\n");
    }

    #[test]
    fn uid_search_range() {
        let criteria = SearchCriteria::Unseen.and(SearchCriteria::Uid(UidSet::From(Uid::new(151).unwrap())));
        assert_eq!(wire(&Command::UidSearch(criteria)), "A0001 UID SEARCH UNSEEN UID 151:*\r\n");
    }

    #[test]
    fn uid_search_header_always_quoted() {
        let cmd = Command::UidSearch(SearchCriteria::message_id("<abc@host>"));
        assert_eq!(wire(&cmd), "A0001 UID SEARCH HEADER Message-ID \"<abc@host>\"\r\n");
    }

    #[test]
    fn uid_fetch_items() {
        let cmd = Command::UidFetch {
            uids: set(&[5, 6, 7, 9]),
            items: vec![FetchAttribute::Uid, FetchAttribute::InternalDate, FetchAttribute::BodyPeek(None)],
        };
        assert_eq!(wire(&cmd), "A0001 UID FETCH 5:7,9 (UID INTERNALDATE BODY.PEEK[])\r\n");

        let single = Command::UidFetch { uids: set(&[3]), items: vec![FetchAttribute::Envelope] };
        assert_eq!(wire(&single), "A0001 UID FETCH 3 ENVELOPE\r\n");
    }

    #[test]
    fn uid_store_deleted_silent() {
        let cmd = Command::UidStore {
            uids: set(&[42]),
            action: StoreAction::Add(vec![Flag::Deleted]),
            silent: true,
        };
        assert_eq!(wire(&cmd), "A0001 UID STORE 42 +FLAGS.SILENT (\\Deleted)\r\n");
    }

    #[test]
    fn uid_move_and_copy() {
        let mv = Command::UidMove { uids: set(&[1, 2]), mailbox: "INBOX.Quarantine".into() };
        assert_eq!(wire(&mv), "A0001 UID MOVE 1:2 INBOX.Quarantine\r\n");
        let cp = Command::UidCopy { uids: set(&[8]), mailbox: "Quarantine".into() };
        assert_eq!(wire(&cp), "A0001 UID COPY 8 Quarantine\r\n");
    }

    #[test]
    fn uid_expunge() {
        assert_eq!(wire(&Command::UidExpunge(set(&[4]))), "A0001 UID EXPUNGE 4\r\n");
    }

    #[test]
    fn done_has_no_tag() {
        assert_eq!(wire(&Command::Done), "DONE\r\n");
        assert_eq!(wire(&Command::Idle), "A0001 IDLE\r\n");
    }
}
