//! Mailbox listing and selection results.

use super::{Flags, Uid, UidValidity};

/// State reported by SELECT or EXAMINE.
#[derive(Debug, Clone, Default)]
pub struct MailboxStatus {
    /// Number of messages (`EXISTS`).
    pub exists: u32,
    /// Number of recent messages (`RECENT`, `IMAP4rev1` only).
    pub recent: u32,
    /// Predicted next UID (`UIDNEXT`).
    pub uid_next: Option<Uid>,
    /// UID epoch (`UIDVALIDITY`).
    pub uid_validity: Option<UidValidity>,
    /// Flags defined in the mailbox.
    pub flags: Flags,
    /// True if the server answered `[READ-ONLY]`.
    pub read_only: bool,
}

/// One `* LIST` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResponse {
    /// Name attributes such as `\Noselect`.
    pub attributes: Vec<MailboxAttribute>,
    /// Hierarchy delimiter, `None` for a flat namespace.
    pub delimiter: Option<char>,
    /// Mailbox name as sent by the server.
    pub name: String,
}

impl ListResponse {
    /// Returns false for `\Noselect` and `\NonExistent` entries.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| matches!(a, MailboxAttribute::NoSelect | MailboxAttribute::NonExistent))
    }
}

/// Mailbox name attribute (RFC 9051 §7.3.1, RFC 6154).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxAttribute {
    /// `\Noselect`
    NoSelect,
    /// `\NonExistent`
    NonExistent,
    /// `\HasChildren`
    HasChildren,
    /// `\HasNoChildren`
    HasNoChildren,
    /// `\Junk` (or the legacy `\Spam`)
    Junk,
    /// `\Trash`
    Trash,
    /// Anything else.
    Other(String),
}

impl MailboxAttribute {
    /// Parses an attribute, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "\\NOSELECT" => Self::NoSelect,
            "\\NONEXISTENT" => Self::NonExistent,
            "\\HASCHILDREN" => Self::HasChildren,
            "\\HASNOCHILDREN" => Self::HasNoChildren,
            "\\JUNK" | "\\SPAM" => Self::Junk,
            "\\TRASH" => Self::Trash,
            _ => Self::Other(s.to_string()),
        }
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

    #[test]
    fn parse_attributes() {
        assert_eq!(MailboxAttribute::parse("\\Noselect"), MailboxAttribute::NoSelect);
        assert_eq!(MailboxAttribute::parse("\\NoSelect"), MailboxAttribute::NoSelect);
        assert_eq!(MailboxAttribute::parse("\\Spam"), MailboxAttribute::Junk);
        assert_eq!(
            MailboxAttribute::parse("\\Marked"),
            MailboxAttribute::Other("\\Marked".into())
        );
    }

    #[test]
    fn selectable_entries() {
        let folder = ListResponse {
            attributes: vec![MailboxAttribute::HasNoChildren],
            delimiter: Some('.'),
            name: "INBOX.Quarantine".into(),
        };
        assert!(folder.is_selectable());

        let container = ListResponse {
            attributes: vec![MailboxAttribute::NoSelect, MailboxAttribute::HasChildren],
            delimiter: Some('/'),
            name: "[Gmail]".into(),
        };
        assert!(!container.is_selectable());
    }
}
