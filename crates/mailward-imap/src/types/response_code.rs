//! Bracketed response codes (`[UIDNEXT 42]`, `[TRYCREATE]`, ...).

use super::{Capability, Flag, Uid, UidValidity};

/// A response code carried in a status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// `ALERT`: text must be shown to the user.
    Alert,
    /// `CAPABILITY` list piggybacked on a greeting or LOGIN.
    Capability(Vec<Capability>),
    /// `PERMANENTFLAGS`
    PermanentFlags(Vec<Flag>),
    /// `READ-ONLY`
    ReadOnly,
    /// `READ-WRITE`
    ReadWrite,
    /// `TRYCREATE`: target mailbox does not exist.
    TryCreate,
    /// `UIDNEXT`
    UidNext(Uid),
    /// `UIDVALIDITY`
    UidValidity(UidValidity),
    /// `UNSEEN` (first unseen sequence number, `IMAP4rev1`).
    Unseen(u32),
    /// `APPENDUID` (UIDPLUS).
    AppendUid {
        /// Validity of the destination mailbox.
        uid_validity: UidValidity,
        /// UID assigned to the appended message.
        uid: Uid,
    },
    /// Any code not listed above, with its raw name.
    Other(String),
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
    fn append_uid_holds_values() {
        let code = ResponseCode::AppendUid {
            uid_validity: UidValidity::new(38505).unwrap(),
            uid: Uid::new(3955).unwrap(),
        };
        let ResponseCode::AppendUid { uid_validity, uid } = code else {
            panic!("expected APPENDUID");
        };
        assert_eq!(uid_validity.get(), 38505);
        assert_eq!(uid.get(), 3955);
    }
}
