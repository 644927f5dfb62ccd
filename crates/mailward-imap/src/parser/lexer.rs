//! Tokenizer for server responses (RFC 9051 §9 formal syntax).

#![allow(clippy::missing_errors_doc)]

use crate::{Error, Result};

/// A lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Unquoted atom, borrowed from the input.
    Atom(&'a str),
    /// Quoted string with escapes resolved.
    Quoted(String),
    /// `{n}\r\n` literal payload.
    Literal(Vec<u8>),
    /// Decimal number that fits in 32 bits.
    Number(u32),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// ` `
    Space,
    /// `*`
    Asterisk,
    /// `+`
    Plus,
    /// `NIL`
    Nil,
    /// `\r\n`
    Crlf,
    /// End of input.
    Eof,
}

/// Cursor over one response buffer.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer at the start of `input`.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Current byte offset.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Unconsumed input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        self.input.get(self.pos..).unwrap_or_default()
    }

    /// True once every byte is consumed.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Next byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Consumes one byte.
    pub fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Consumes `b` if it is next. Returns whether it did.
    pub fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Skips up to `n` bytes.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Builds a parse error at the current offset.
    pub fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(b) = self.peek() else {
            return Ok(Token::Eof);
        };
        let single = match b {
            b' ' => Some(Token::Space),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b'*' => Some(Token::Asterisk),
            b'+' => Some(Token::Plus),
            _ => None,
        };
        if let Some(token) = single {
            self.pos += 1;
            return Ok(token);
        }
        match b {
            b'\r' if self.input.get(self.pos + 1) == Some(&b'\n') => {
                self.pos += 2;
                Ok(Token::Crlf)
            }
            b'"' => self.quoted(),
            b'{' => self.literal(),
            _ if is_atom_char(b) => Ok(self.atom()),
            _ => Err(self.error(format!("unexpected byte {b:#04x}"))),
        }
    }

    fn quoted(&mut self) -> Result<Token<'a>> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(c @ (b'"' | b'\\')) => out.push(c),
                    Some(c) => return Err(self.error(format!("bad escape \\{}", c as char))),
                    None => return Err(self.error("unterminated quoted string")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated quoted string")),
            }
        }
        // Servers put raw 8-bit header bytes in quoted strings often enough.
        Ok(Token::Quoted(String::from_utf8_lossy(&out).into_owned()))
    }

    fn literal(&mut self) -> Result<Token<'a>> {
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits = &self.input[start..self.pos];
        let size: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("bad literal size"))?;
        self.eat(b'+');
        if !self.eat(b'}') {
            return Err(self.error("expected '}' after literal size"));
        }
        if !(self.eat(b'\r') && self.eat(b'\n')) {
            return Err(self.error("expected CRLF after literal size"));
        }
        let end = self
            .pos
            .checked_add(size)
            .filter(|&end| end <= self.input.len())
            .ok_or_else(|| self.error("truncated literal"))?;
        let data = self.input[self.pos..end].to_vec();
        self.pos = end;
        Ok(Token::Literal(data))
    }

    fn atom(&mut self) -> Token<'a> {
        let start = self.pos;
        while self.peek().is_some_and(is_atom_char) {
            self.pos += 1;
        }
        // Atom chars are ASCII, so this cannot fail.
        let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap_or_default();
        if text.eq_ignore_ascii_case("NIL") {
            Token::Nil
        } else if text.bytes().all(|b| b.is_ascii_digit())
            && let Ok(n) = text.parse::<u32>()
        {
            Token::Number(n)
        } else {
            Token::Atom(text)
        }
    }

    /// Consumes a token of the same kind as `expected`.
    #[allow(clippy::needless_pass_by_value)]
    pub fn expect(&mut self, expected: Token<'_>) -> Result<()> {
        let got = self.next_token()?;
        if std::mem::discriminant(&got) == std::mem::discriminant(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, got {got:?}")))
        }
    }

    /// Consumes a single space.
    pub fn expect_space(&mut self) -> Result<()> {
        self.expect(Token::Space)
    }

    /// Reads an atom.
    pub fn atom_str(&mut self) -> Result<&'a str> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s),
            other => Err(self.error(format!("expected atom, got {other:?}"))),
        }
    }

    /// Reads a number.
    pub fn number(&mut self) -> Result<u32> {
        match self.next_token()? {
            Token::Number(n) => Ok(n),
            other => Err(self.error(format!("expected number, got {other:?}"))),
        }
    }

    /// Reads an astring: atom, number, quoted string or literal.
    pub fn astring(&mut self) -> Result<String> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s.to_string()),
            Token::Number(n) => Ok(n.to_string()),
            Token::Quoted(s) => Ok(s),
            Token::Literal(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
            other => Err(self.error(format!("expected astring, got {other:?}"))),
        }
    }

    /// Reads an nstring: `NIL`, quoted string or literal.
    pub fn nstring(&mut self) -> Result<Option<String>> {
        match self.next_token()? {
            Token::Nil => Ok(None),
            Token::Quoted(s) => Ok(Some(s)),
            Token::Literal(data) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
            other => Err(self.error(format!("expected nstring, got {other:?}"))),
        }
    }

    /// Returns the rest of the line as text and consumes the CRLF.
    pub fn rest_of_line(&mut self) -> String {
        let rest = self.remaining();
        let end = rest.windows(2).position(|w| w == b"\r\n").unwrap_or(rest.len());
        self.skip(end + 2);
        String::from_utf8_lossy(&rest[..end]).into_owned()
    }
}

/// True for bytes allowed in an atom.
///
/// `\` is accepted so that system flags like `\Seen` lex as one atom, and
/// `]` is excluded so response codes close correctly.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    matches!(b, 0x21..=0x7E) && !matches!(b, b'(' | b')' | b'{' | b'"' | b'%' | b'*' | b']' | b'[')
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

    fn tokens(input: &[u8]) -> Vec<Token<'_>> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token().unwrap();
            if t == Token::Eof {
                break;
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn tagged_line() {
        assert_eq!(
            tokens(b"A0001 OK done\r\n"),
            vec![
                Token::Atom("A0001"),
                Token::Space,
                Token::Atom("OK"),
                Token::Space,
                Token::Atom("done"),
                Token::Crlf,
            ]
        );
    }

    #[test]
    fn numbers_and_nil() {
        assert_eq!(
            tokens(b"* 23 EXISTS NIL"),
            vec![
                Token::Asterisk,
                Token::Space,
                Token::Number(23),
                Token::Space,
                Token::Atom("EXISTS"),
                Token::Space,
                Token::Nil,
            ]
        );
    }

    #[test]
    fn flag_is_single_atom() {
        assert_eq!(tokens(b"(\\Seen)"), vec![Token::LParen, Token::Atom("\\Seen"), Token::RParen]);
    }

    #[test]
    fn quoted_with_escapes() {
        assert_eq!(
            tokens(br#""say \"hi\" \\ bye""#),
            vec![Token::Quoted(r#"say "hi" \ bye"#.to_string())]
        );
    }

    #[test]
    fn quoted_invalid_utf8_is_lossy() {
        let toks = tokens(b"\"caf\xe9\"");
        assert_eq!(toks, vec![Token::Quoted("caf\u{fffd}".to_string())]);
    }

    #[test]
    fn literal_payload() {
        assert_eq!(tokens(b"{5}\r\nhello"), vec![Token::Literal(b"hello".to_vec())]);
        assert_eq!(tokens(b"{0}\r\n"), vec![Token::Literal(Vec::new())]);
    }

    #[test]
    fn truncated_literal_is_error() {
        let mut lexer = Lexer::new(b"{10}\r\nshort");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn oversized_number_becomes_atom() {
        assert_eq!(tokens(b"99999999999"), vec![Token::Atom("99999999999")]);
    }

    #[test]
    fn rest_of_line_consumes_crlf() {
        let mut lexer = Lexer::new(b"some text here\r\nNEXT");
        assert_eq!(lexer.rest_of_line(), "some text here");
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("NEXT"));
    }

    proptest::proptest! {
        #[test]
        fn never_panics(input in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..256)) {
            let mut lexer = Lexer::new(&input);
            for _ in 0..512 {
                match lexer.next_token() {
                    Ok(Token::Eof) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }
    }
}
