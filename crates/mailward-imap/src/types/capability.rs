//! Server capabilities and response status.

/// Status word of a tagged or untagged condition response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `OK`
    Ok,
    /// `NO`
    No,
    /// `BAD`
    Bad,
    /// `PREAUTH`
    PreAuth,
    /// `BYE`
    Bye,
}

impl Status {
    /// True for `OK` and `PREAUTH`.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::PreAuth)
    }
}

/// A capability advertised by the server.
///
/// Only the extensions the watcher branches on get their own variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `IMAP4rev1`
    Imap4Rev1,
    /// `IMAP4rev2`
    Imap4Rev2,
    /// `IDLE` (RFC 2177)
    Idle,
    /// `MOVE` (RFC 6851)
    Move,
    /// `UIDPLUS` (RFC 4315), enables `UID EXPUNGE`.
    UidPlus,
    /// `LITERAL+`
    LiteralPlus,
    /// `STARTTLS`
    StartTls,
    /// `LOGINDISABLED`
    LoginDisabled,
    /// `AUTH=<mechanism>`
    Auth(String),
    /// Anything else, uppercased.
    Other(String),
}

impl Capability {
    /// Parses a capability atom.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let upper = s.to_ascii_uppercase();
        if let Some(mech) = upper.strip_prefix("AUTH=") {
            return Self::Auth(mech.to_string());
        }
        match upper.as_str() {
            "IMAP4REV1" => Self::Imap4Rev1,
            "IMAP4REV2" => Self::Imap4Rev2,
            "IDLE" => Self::Idle,
            "MOVE" => Self::Move,
            "UIDPLUS" => Self::UidPlus,
            "LITERAL+" => Self::LiteralPlus,
            "STARTTLS" => Self::StartTls,
            "LOGINDISABLED" => Self::LoginDisabled,
            _ => Self::Other(upper),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imap4Rev1 => f.write_str("IMAP4rev1"),
            Self::Imap4Rev2 => f.write_str("IMAP4rev2"),
            Self::Idle => f.write_str("IDLE"),
            Self::Move => f.write_str("MOVE"),
            Self::UidPlus => f.write_str("UIDPLUS"),
            Self::LiteralPlus => f.write_str("LITERAL+"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::LoginDisabled => f.write_str("LOGINDISABLED"),
            Self::Auth(mech) => write!(f, "AUTH={mech}"),
            Self::Other(s) => f.write_str(s),
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
    fn status_ok_includes_preauth() {
        assert!(Status::Ok.is_ok());
        assert!(Status::PreAuth.is_ok());
        assert!(!Status::No.is_ok());
        assert!(!Status::Bye.is_ok());
    }

    #[test]
    fn parse_known_capabilities() {
        assert_eq!(Capability::parse("idle"), Capability::Idle);
        assert_eq!(Capability::parse("MOVE"), Capability::Move);
        assert_eq!(Capability::parse("UidPlus"), Capability::UidPlus);
        assert_eq!(Capability::parse("AUTH=plain"), Capability::Auth("PLAIN".into()));
        assert_eq!(Capability::parse("X-GM-EXT-1"), Capability::Other("X-GM-EXT-1".into()));
    }

    #[test]
    fn display_round_trips_known() {
        for raw in ["IMAP4rev1", "IDLE", "MOVE", "UIDPLUS", "AUTH=XOAUTH2"] {
            assert_eq!(Capability::parse(raw).to_string(), raw);
        }
    }
}
