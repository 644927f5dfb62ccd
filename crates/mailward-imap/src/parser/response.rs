//! Response-level grammar: tagged completions, untagged data, continuations.

#![allow(clippy::missing_errors_doc)]

use super::fetch::{FetchItem, parse_fetch_items};
use super::lexer::{Lexer, Token};
use crate::types::{
    Capability, Flag, Flags, ListResponse, MailboxAttribute, ResponseCode, Status, Uid,
    UidValidity,
};
use crate::{Error, Result};

/// One complete server response.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Completion of a command.
    Tagged {
        /// Tag of the completed command.
        tag: String,
        /// Completion status.
        status: Status,
        /// Optional bracketed code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* ...` data.
    Untagged(UntaggedResponse),
    /// `+ ...` continuation request.
    Continuation {
        /// Text after the `+`, if any.
        text: String,
    },
}

/// Untagged server data the client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum UntaggedResponse {
    /// `* OK|NO|BAD|PREAUTH|BYE`
    Condition {
        /// Status word.
        status: Status,
        /// Optional bracketed code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* CAPABILITY ...`
    Capability(Vec<Capability>),
    /// `* FLAGS (...)`
    Flags(Flags),
    /// `* LIST (...) "/" name`
    List(ListResponse),
    /// `* SEARCH n n n`; sequence numbers or UIDs depending on the command.
    Search(Vec<u32>),
    /// `* n EXISTS`
    Exists(u32),
    /// `* n RECENT`
    Recent(u32),
    /// `* n EXPUNGE`
    Expunge(u32),
    /// `* n FETCH (...)`
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// Returned data items.
        items: Vec<FetchItem>,
    },
}

/// Stateless response parser.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses one response as framed by `FramedStream::read_response`.
    pub fn parse(input: &[u8]) -> Result<Response> {
        let mut lexer = Lexer::new(input);
        match lexer.next_token()? {
            Token::Asterisk => {
                lexer.expect_space()?;
                parse_untagged(&mut lexer).map(Response::Untagged)
            }
            Token::Plus => {
                lexer.eat(b' ');
                Ok(Response::Continuation {
                    text: lexer.rest_of_line(),
                })
            }
            Token::Atom(tag) => {
                lexer.expect_space()?;
                let status = parse_status(lexer.atom_str()?).ok_or_else(|| lexer.error("bad status"))?;
                let (code, text) = parse_resp_text(&mut lexer)?;
                Ok(Response::Tagged {
                    tag: tag.to_string(),
                    status,
                    code,
                    text,
                })
            }
            other => Err(lexer.error(format!("expected '*', '+' or tag, got {other:?}"))),
        }
    }
}

fn parse_status(word: &str) -> Option<Status> {
    Some(match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        "PREAUTH" => Status::PreAuth,
        "BYE" => Status::Bye,
        _ => return None,
    })
}

fn parse_untagged(lexer: &mut Lexer<'_>) -> Result<UntaggedResponse> {
    match lexer.next_token()? {
        Token::Number(n) => {
            lexer.expect_space()?;
            let keyword = lexer.atom_str()?.to_ascii_uppercase();
            match keyword.as_str() {
                "EXISTS" => Ok(UntaggedResponse::Exists(n)),
                "RECENT" => Ok(UntaggedResponse::Recent(n)),
                "EXPUNGE" => Ok(UntaggedResponse::Expunge(n)),
                "FETCH" => {
                    lexer.expect_space()?;
                    let items = parse_fetch_items(lexer)?;
                    Ok(UntaggedResponse::Fetch { seq: n, items })
                }
                _ => Err(lexer.error(format!("unknown message data {keyword}"))),
            }
        }
        Token::Atom(word) => {
            if let Some(status) = parse_status(word) {
                let (code, text) = parse_resp_text(lexer)?;
                return Ok(UntaggedResponse::Condition { status, code, text });
            }
            match word.to_ascii_uppercase().as_str() {
                "CAPABILITY" => Ok(UntaggedResponse::Capability(parse_capabilities(lexer)?)),
                "FLAGS" => {
                    lexer.expect_space()?;
                    Ok(UntaggedResponse::Flags(parse_flag_list(lexer)?))
                }
                "LIST" => {
                    lexer.expect_space()?;
                    Ok(UntaggedResponse::List(parse_list(lexer)?))
                }
                "SEARCH" => {
                    let mut hits = Vec::new();
                    while lexer.eat(b' ') {
                        if let Token::Number(n) = lexer.next_token()? {
                            hits.push(n);
                        }
                    }
                    Ok(UntaggedResponse::Search(hits))
                }
                other => Err(lexer.error(format!("unsupported untagged response {other}"))),
            }
        }
        other => Err(lexer.error(format!("unexpected {other:?} after '*'"))),
    }
}

/// Parses `[code] text` after a status word, including the leading space.
fn parse_resp_text(lexer: &mut Lexer<'_>) -> Result<(Option<ResponseCode>, String)> {
    lexer.eat(b' ');
    let code = if lexer.peek() == Some(b'[') {
        let code = parse_response_code(lexer)?;
        lexer.eat(b' ');
        Some(code)
    } else {
        None
    };
    Ok((code, lexer.rest_of_line()))
}

fn parse_response_code(lexer: &mut Lexer<'_>) -> Result<ResponseCode> {
    lexer.expect(Token::LBracket)?;
    let name = lexer.atom_str()?.to_ascii_uppercase();
    let code = match name.as_str() {
        "ALERT" => ResponseCode::Alert,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "TRYCREATE" => ResponseCode::TryCreate,
        "CAPABILITY" => ResponseCode::Capability(parse_capabilities(lexer)?),
        "PERMANENTFLAGS" => {
            lexer.expect_space()?;
            ResponseCode::PermanentFlags(parse_flag_list(lexer)?.iter().cloned().collect())
        }
        "UIDNEXT" => {
            lexer.expect_space()?;
            let n = lexer.number()?;
            Uid::new(n).map_or_else(|| ResponseCode::Other(name.clone()), ResponseCode::UidNext)
        }
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            let n = lexer.number()?;
            UidValidity::new(n)
                .map_or_else(|| ResponseCode::Other(name.clone()), ResponseCode::UidValidity)
        }
        "UNSEEN" => {
            lexer.expect_space()?;
            ResponseCode::Unseen(lexer.number()?)
        }
        "APPENDUID" => {
            lexer.expect_space()?;
            let validity = lexer.number()?;
            lexer.expect_space()?;
            let uid = lexer.number()?;
            match (UidValidity::new(validity), Uid::new(uid)) {
                (Some(uid_validity), Some(uid)) => ResponseCode::AppendUid { uid_validity, uid },
                _ => ResponseCode::Other(name.clone()),
            }
        }
        _ => ResponseCode::Other(name.clone()),
    };
    // Unknown codes may carry arbitrary arguments.
    while !lexer.is_eof() && lexer.peek() != Some(b']') {
        lexer.bump();
    }
    lexer.expect(Token::RBracket)?;
    Ok(code)
}

fn parse_capabilities(lexer: &mut Lexer<'_>) -> Result<Vec<Capability>> {
    let mut caps = Vec::new();
    while lexer.eat(b' ') {
        match lexer.next_token()? {
            Token::Atom(s) => caps.push(Capability::parse(s)),
            // `AUTH=PLAIN` and friends lex fine; stray `*` does not appear here.
            _ => break,
        }
    }
    Ok(caps)
}

pub(super) fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Flags> {
    lexer.expect(Token::LParen)?;
    let mut flags = Flags::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => return Ok(flags),
            // `\*` in PERMANENTFLAGS lexes as `\` then `*`.
            Token::Space | Token::Asterisk | Token::Atom("\\") => {}
            Token::Atom(s) => flags.insert(Flag::parse(s)),
            other => return Err(lexer.error(format!("unexpected {other:?} in flag list"))),
        }
    }
}

fn parse_list(lexer: &mut Lexer<'_>) -> Result<ListResponse> {
    lexer.expect(Token::LParen)?;
    let mut attributes = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(s) => attributes.push(MailboxAttribute::parse(s)),
            other => return Err(lexer.error(format!("unexpected {other:?} in LIST attributes"))),
        }
    }
    lexer.expect_space()?;
    let delimiter = match lexer.next_token()? {
        Token::Nil => None,
        Token::Quoted(s) => s.chars().next(),
        other => return Err(lexer.error(format!("expected delimiter, got {other:?}"))),
    };
    lexer.expect_space()?;
    let name = lexer.astring()?;
    Ok(ListResponse {
        attributes,
        delimiter,
        name,
    })
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

    fn untagged(input: &[u8]) -> UntaggedResponse {
        match ResponseParser::parse(input).unwrap() {
            Response::Untagged(u) => u,
            other => panic!("expected untagged, got {other:?}"),
        }
    }

    #[test]
    fn tagged_ok_with_code() {
        let r = ResponseParser::parse(b"A0003 OK [READ-WRITE] SELECT completed\r\n").unwrap();
        assert_eq!(
            r,
            Response::Tagged {
                tag: "A0003".into(),
                status: Status::Ok,
                code: Some(ResponseCode::ReadWrite),
                text: "SELECT completed".into(),
            }
        );
    }

    #[test]
    fn tagged_no_without_code() {
        let Response::Tagged { status, text, code, .. } =
            ResponseParser::parse(b"A0001 NO Mailbox doesn't exist\r\n").unwrap()
        else {
            panic!("expected tagged");
        };
        assert_eq!(status, Status::No);
        assert!(code.is_none());
        assert_eq!(text, "Mailbox doesn't exist");
    }

    #[test]
    fn trycreate_code() {
        let Response::Tagged { code, .. } =
            ResponseParser::parse(b"A0007 NO [TRYCREATE] no such mailbox\r\n").unwrap()
        else {
            panic!("expected tagged");
        };
        assert_eq!(code, Some(ResponseCode::TryCreate));
    }

    #[test]
    fn uidnext_and_uidvalidity() {
        match untagged(b"* OK [UIDNEXT 151] Predicted next UID\r\n") {
            UntaggedResponse::Condition { code: Some(ResponseCode::UidNext(uid)), .. } => {
                assert_eq!(uid.get(), 151);
            }
            other => panic!("unexpected {other:?}"),
        }
        match untagged(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n") {
            UntaggedResponse::Condition { code: Some(ResponseCode::UidValidity(v)), .. } => {
                assert_eq!(v.get(), 3857529045);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn append_uid_code() {
        let Response::Tagged { code, .. } =
            ResponseParser::parse(b"A0010 OK [APPENDUID 38505 3955] APPEND completed\r\n").unwrap()
        else {
            panic!("expected tagged");
        };
        assert!(matches!(code, Some(ResponseCode::AppendUid { uid, .. }) if uid.get() == 3955));
    }

    #[test]
    fn unknown_code_is_skipped() {
        let Response::Tagged { code, text, .. } =
            ResponseParser::parse(b"A1 OK [COPYUID 38505 304,319:320 3956:3958] Done\r\n").unwrap()
        else {
            panic!("expected tagged");
        };
        assert_eq!(code, Some(ResponseCode::Other("COPYUID".into())));
        assert_eq!(text, "Done");
    }

    #[test]
    fn capability_data() {
        let UntaggedResponse::Capability(caps) =
            untagged(b"* CAPABILITY IMAP4rev1 IDLE MOVE UIDPLUS AUTH=PLAIN\r\n")
        else {
            panic!("expected capability");
        };
        assert!(caps.contains(&Capability::Idle));
        assert!(caps.contains(&Capability::Move));
        assert!(caps.contains(&Capability::Auth("PLAIN".into())));
    }

    #[test]
    fn greeting_with_capability_code() {
        match untagged(b"* OK [CAPABILITY IMAP4rev1 IDLE] Dovecot ready.\r\n") {
            UntaggedResponse::Condition {
                status: Status::Ok,
                code: Some(ResponseCode::Capability(caps)),
                text,
            } => {
                assert_eq!(caps.len(), 2);
                assert_eq!(text, "Dovecot ready.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn permanent_flags_with_wildcard() {
        match untagged(b"* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited\r\n") {
            UntaggedResponse::Condition { code: Some(ResponseCode::PermanentFlags(flags)), .. } => {
                assert!(flags.contains(&Flag::Deleted));
                assert!(flags.contains(&Flag::Seen));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn list_with_delimiter() {
        let UntaggedResponse::List(list) =
            untagged(b"* LIST (\\HasNoChildren) \".\" INBOX.Quarantine\r\n")
        else {
            panic!("expected list");
        };
        assert_eq!(list.delimiter, Some('.'));
        assert_eq!(list.name, "INBOX.Quarantine");
    }

    #[test]
    fn list_root_probe() {
        let UntaggedResponse::List(list) = untagged(b"* LIST (\\Noselect) \"/\" \"\"\r\n") else {
            panic!("expected list");
        };
        assert_eq!(list.delimiter, Some('/'));
        assert_eq!(list.name, "");
        assert!(!list.is_selectable());
    }

    #[test]
    fn list_nil_delimiter() {
        let UntaggedResponse::List(list) = untagged(b"* LIST () NIL Archive\r\n") else {
            panic!("expected list");
        };
        assert_eq!(list.delimiter, None);
    }

    #[test]
    fn search_results() {
        assert_eq!(untagged(b"* SEARCH 2 84 882\r\n"), UntaggedResponse::Search(vec![2, 84, 882]));
        assert_eq!(untagged(b"* SEARCH\r\n"), UntaggedResponse::Search(Vec::new()));
    }

    #[test]
    fn message_data() {
        assert_eq!(untagged(b"* 172 EXISTS\r\n"), UntaggedResponse::Exists(172));
        assert_eq!(untagged(b"* 1 RECENT\r\n"), UntaggedResponse::Recent(1));
        assert_eq!(untagged(b"* 44 EXPUNGE\r\n"), UntaggedResponse::Expunge(44));
    }

    #[test]
    fn continuation() {
        assert_eq!(
            ResponseParser::parse(b"+ idling\r\n").unwrap(),
            Response::Continuation { text: "idling".into() }
        );
        assert_eq!(
            ResponseParser::parse(b"+\r\n").unwrap(),
            Response::Continuation { text: String::new() }
        );
    }

    #[test]
    fn bye() {
        assert!(matches!(
            untagged(b"* BYE Autologout; idle for too long\r\n"),
            UntaggedResponse::Condition { status: Status::Bye, .. }
        ));
    }

    #[test]
    fn unknown_untagged_is_error() {
        assert!(ResponseParser::parse(b"* XSTATE foo\r\n").is_err());
    }

    proptest::proptest! {
        #[test]
        fn parse_never_panics(input in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..200)) {
            let _ = ResponseParser::parse(&input);
        }
    }
}
