//! `FETCH` data items.

use super::lexer::{Lexer, Token};
use super::response::parse_flag_list;
use crate::types::{Flags, Uid};
use crate::Result;

/// One data item of a `* n FETCH (...)` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// `FLAGS (...)`
    Flags(Flags),
    /// `INTERNALDATE "..."`, kept in IMAP date-time form.
    InternalDate(String),
    /// `RFC822.SIZE n`
    Rfc822Size(u32),
    /// `ENVELOPE (...)`
    Envelope(Box<Envelope>),
    /// `UID n`
    Uid(Uid),
    /// `BODY[section]<origin>`, `RFC822` and friends.
    Body {
        /// Section text between the brackets; `None` for the whole message.
        section: Option<String>,
        /// Raw bytes, `None` if the server sent NIL.
        data: Option<Vec<u8>>,
    },
}

/// `ENVELOPE` structure (RFC 9051 §7.5.2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// `Date:` header, unparsed.
    pub date: Option<String>,
    /// `Subject:` header, possibly still RFC 2047 encoded.
    pub subject: Option<String>,
    /// `From:`
    pub from: Vec<Address>,
    /// `Sender:`
    pub sender: Vec<Address>,
    /// `Reply-To:`
    pub reply_to: Vec<Address>,
    /// `To:`
    pub to: Vec<Address>,
    /// `Cc:`
    pub cc: Vec<Address>,
    /// `Bcc:`
    pub bcc: Vec<Address>,
    /// `In-Reply-To:`
    pub in_reply_to: Option<String>,
    /// `Message-ID:`
    pub message_id: Option<String>,
}

/// Address as carried in an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Display name.
    pub name: Option<String>,
    /// Local part.
    pub mailbox: Option<String>,
    /// Domain part.
    pub host: Option<String>,
}

impl Address {
    /// `mailbox@host`, when both halves are present.
    #[must_use]
    pub fn email(&self) -> Option<String> {
        Some(format!("{}@{}", self.mailbox.as_deref()?, self.host.as_deref()?))
    }
}

/// Parses the parenthesized item list of a FETCH response.
pub(super) fn parse_fetch_items(lexer: &mut Lexer<'_>) -> Result<Vec<FetchItem>> {
    lexer.expect(Token::LParen)?;
    let mut items = Vec::new();
    loop {
        let name = match lexer.next_token()? {
            Token::RParen => return Ok(items),
            Token::Space => continue,
            Token::Atom(name) => name.to_ascii_uppercase(),
            other => return Err(lexer.error(format!("unexpected {other:?} in FETCH"))),
        };
        match name.as_str() {
            "UID" => {
                lexer.expect_space()?;
                let n = lexer.number()?;
                items.push(FetchItem::Uid(Uid::new(n).ok_or_else(|| lexer.error("UID 0"))?));
            }
            "FLAGS" => {
                lexer.expect_space()?;
                items.push(FetchItem::Flags(parse_flag_list(lexer)?));
            }
            "INTERNALDATE" => {
                lexer.expect_space()?;
                if let Some(date) = lexer.nstring()? {
                    items.push(FetchItem::InternalDate(date));
                }
            }
            "RFC822.SIZE" => {
                lexer.expect_space()?;
                items.push(FetchItem::Rfc822Size(lexer.number()?));
            }
            "ENVELOPE" => {
                lexer.expect_space()?;
                items.push(FetchItem::Envelope(Box::new(parse_envelope(lexer)?)));
            }
            "BODY" | "BINARY" if lexer.peek() == Some(b'[') => {
                let section = read_section(lexer);
                lexer.expect_space()?;
                items.push(FetchItem::Body {
                    section,
                    data: read_body_data(lexer)?,
                });
            }
            "RFC822" | "RFC822.HEADER" | "RFC822.TEXT" => {
                lexer.expect_space()?;
                let section = match name.as_str() {
                    "RFC822.HEADER" => Some("HEADER".to_string()),
                    "RFC822.TEXT" => Some("TEXT".to_string()),
                    _ => None,
                };
                items.push(FetchItem::Body {
                    section,
                    data: read_body_data(lexer)?,
                });
            }
            _ => {
                lexer.expect_space()?;
                skip_value(lexer)?;
            }
        }
    }
}

/// Reads `[section]<origin>` and returns the section text.
fn read_section(lexer: &mut Lexer<'_>) -> Option<String> {
    lexer.bump();
    let rest = lexer.remaining();
    let len = rest.iter().position(|&b| b == b']').unwrap_or(rest.len());
    let section = String::from_utf8_lossy(&rest[..len]).into_owned();
    lexer.skip(len + 1);
    if lexer.eat(b'<') {
        while lexer.peek().is_some_and(|b| b != b'>') {
            lexer.bump();
        }
        lexer.eat(b'>');
    }
    (!section.is_empty()).then_some(section)
}

fn read_body_data(lexer: &mut Lexer<'_>) -> Result<Option<Vec<u8>>> {
    Ok(match lexer.next_token()? {
        Token::Literal(data) => Some(data),
        Token::Quoted(s) => Some(s.into_bytes()),
        _ => None,
    })
}

/// Skips one value of any shape, including nested lists.
fn skip_value(lexer: &mut Lexer<'_>) -> Result<()> {
    let mut depth = 0usize;
    loop {
        match lexer.next_token()? {
            Token::LParen => depth += 1,
            Token::RParen if depth > 0 => depth -= 1,
            Token::Eof => return Err(lexer.error("unterminated FETCH item")),
            Token::RParen => return Err(lexer.error("unbalanced ')' in FETCH item")),
            _ => {}
        }
        if depth == 0 {
            return Ok(());
        }
    }
}

fn parse_envelope(lexer: &mut Lexer<'_>) -> Result<Envelope> {
    lexer.expect(Token::LParen)?;
    let date = lexer.nstring()?;
    lexer.expect_space()?;
    let subject = lexer.nstring()?;
    let mut lists: [Vec<Address>; 6] = Default::default();
    for list in &mut lists {
        lexer.expect_space()?;
        *list = parse_address_list(lexer)?;
    }
    lexer.expect_space()?;
    let in_reply_to = lexer.nstring()?;
    lexer.expect_space()?;
    let message_id = lexer.nstring()?;
    lexer.expect(Token::RParen)?;
    let [from, sender, reply_to, to, cc, bcc] = lists;
    Ok(Envelope {
        date,
        subject,
        from,
        sender,
        reply_to,
        to,
        cc,
        bcc,
        in_reply_to,
        message_id,
    })
}

fn parse_address_list(lexer: &mut Lexer<'_>) -> Result<Vec<Address>> {
    match lexer.next_token()? {
        Token::Nil => Ok(Vec::new()),
        Token::LParen => {
            let mut out = Vec::new();
            loop {
                match lexer.next_token()? {
                    Token::RParen => return Ok(out),
                    Token::Space => {}
                    Token::LParen => {
                        let name = lexer.nstring()?;
                        lexer.expect_space()?;
                        let _route = lexer.nstring()?;
                        lexer.expect_space()?;
                        let mailbox = lexer.nstring()?;
                        lexer.expect_space()?;
                        let host = lexer.nstring()?;
                        lexer.expect(Token::RParen)?;
                        // Group syntax markers have a NIL host.
                        if host.is_some() {
                            out.push(Address {
                                name,
                                mailbox,
                                host,
                            });
                        }
                    }
                    other => return Err(lexer.error(format!("unexpected {other:?} in address list"))),
                }
            }
        }
        other => Err(lexer.error(format!("expected address list, got {other:?}"))),
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
    use super::super::{Response, ResponseParser, UntaggedResponse};
    use super::*;
    use crate::types::Flag;

    fn fetch(input: &[u8]) -> (u32, Vec<FetchItem>) {
        match ResponseParser::parse(input).unwrap() {
            Response::Untagged(UntaggedResponse::Fetch { seq, items }) => (seq, items),
            other => panic!("expected FETCH, got {other:?}"),
        }
    }

    #[test]
    fn uid_flags_and_size() {
        let (seq, items) = fetch(b"* 12 FETCH (UID 151 FLAGS (\\Seen) RFC822.SIZE 4423)\r\n");
        assert_eq!(seq, 12);
        assert_eq!(items[0], FetchItem::Uid(Uid::new(151).unwrap()));
        let FetchItem::Flags(flags) = &items[1] else { panic!() };
        assert!(flags.contains(&Flag::Seen));
        assert_eq!(items[2], FetchItem::Rfc822Size(4423));
    }

    #[test]
    fn body_peek_literal() {
        let (_, items) = fetch(
            b"* 1 FETCH (UID 7 INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" BODY[] {12}\r\nSubject: x\r\n)\r\n",
        );
        assert_eq!(items[1], FetchItem::InternalDate("17-Jul-1996 02:44:25 -0700".into()));
        assert_eq!(
            items[2],
            FetchItem::Body {
                section: None,
                data: Some(b"Subject: x\r\n".to_vec()),
            }
        );
    }

    #[test]
    fn header_fields_section() {
        let (_, items) = fetch(
            b"* 3 FETCH (BODY[HEADER.FIELDS (MESSAGE-ID)] {21}\r\nMessage-ID: <a@b>\r\n\r\n UID 9)\r\n",
        );
        let FetchItem::Body { section, data } = &items[0] else { panic!() };
        assert_eq!(section.as_deref(), Some("HEADER.FIELDS (MESSAGE-ID)"));
        assert!(data.as_ref().unwrap().starts_with(b"Message-ID"));
        assert_eq!(items[1], FetchItem::Uid(Uid::new(9).unwrap()));
    }

    #[test]
    fn partial_origin_is_skipped() {
        let (_, items) = fetch(b"* 3 FETCH (BODY[TEXT]<0> {3}\r\nabc)\r\n");
        assert_eq!(
            items[0],
            FetchItem::Body {
                section: Some("TEXT".into()),
                data: Some(b"abc".to_vec()),
            }
        );
    }

    #[test]
    fn envelope() {
        let (_, items) = fetch(
            b"* 2 FETCH (UID 5 ENVELOPE (\"Wed, 17 Jul 1996 02:23:25 -0700\" \"Invoice due\" ((\"Billing\" NIL \"billing\" \"vendor.example\")) NIL NIL ((NIL NIL \"alice\" \"corp.example\")) NIL NIL NIL \"<1234@vendor.example>\"))\r\n",
        );
        let FetchItem::Envelope(env) = &items[1] else { panic!() };
        assert_eq!(env.subject.as_deref(), Some("Invoice due"));
        assert_eq!(env.from[0].email().as_deref(), Some("billing@vendor.example"));
        assert_eq!(env.from[0].name.as_deref(), Some("Billing"));
        assert_eq!(env.to[0].email().as_deref(), Some("alice@corp.example"));
        assert!(env.sender.is_empty());
        assert_eq!(env.message_id.as_deref(), Some("<1234@vendor.example>"));
    }

    #[test]
    fn unknown_items_are_skipped() {
        let (_, items) = fetch(
            b"* 4 FETCH (X-GM-LABELS (\\Inbox \"Work\") MODSEQ (12345) UID 88)\r\n",
        );
        assert_eq!(items, vec![FetchItem::Uid(Uid::new(88).unwrap())]);
    }

    #[test]
    fn nil_body() {
        let (_, items) = fetch(b"* 4 FETCH (BODY[] NIL)\r\n");
        assert_eq!(items[0], FetchItem::Body { section: None, data: None });
    }
}
