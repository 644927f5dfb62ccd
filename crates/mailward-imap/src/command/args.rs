//! Typed arguments for SEARCH, FETCH and STORE.

use crate::types::{Flag, UidSet};

/// Search key (RFC 9051 §6.4.4), limited to what the watcher sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    /// `ALL`
    All,
    /// `UNSEEN`
    Unseen,
    /// `DELETED`
    Deleted,
    /// `UID <set>`
    Uid(UidSet),
    /// `HEADER <field> <value>`, substring match on the header.
    Header(String, String),
    /// Keys joined by juxtaposition (logical AND).
    And(Vec<Self>),
}

impl SearchCriteria {
    /// `HEADER Message-ID <value>`
    #[must_use]
    pub fn message_id(value: impl Into<String>) -> Self {
        Self::Header("Message-ID".to_string(), value.into())
    }

    /// Combines `self` with another key.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut keys) => {
                keys.push(other);
                Self::And(keys)
            }
            key => Self::And(vec![key, other]),
        }
    }
}

/// A FETCH data item to request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// `UID`
    Uid,
    /// `FLAGS`
    Flags,
    /// `INTERNALDATE`
    InternalDate,
    /// `RFC822.SIZE`
    Rfc822Size,
    /// `ENVELOPE`
    Envelope,
    /// `BODY.PEEK[section]`; does not set `\Seen`.
    BodyPeek(Option<String>),
}

/// Flag mutation for STORE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    /// `+FLAGS`
    Add(Vec<Flag>),
    /// `-FLAGS`
    Remove(Vec<Flag>),
    /// `FLAGS`
    Replace(Vec<Flag>),
}
