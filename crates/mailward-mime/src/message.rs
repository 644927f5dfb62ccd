//! MIME entity tree and parser.

use std::fmt;

use chrono::{DateTime, FixedOffset};

use crate::address::{Mailbox, parse_address_list};
use crate::content_type::{ContentDisposition, ContentType};
use crate::encoding::{decode_base64, decode_charset, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::Headers;

/// Nesting deeper than this is treated as an opaque leaf.
const MAX_DEPTH: usize = 32;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit text.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses a `Content-Transfer-Encoding` value; unknown names mean 7bit.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Binary => "binary",
        })
    }
}

/// Body of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Still transfer-encoded bytes.
    Leaf(Vec<u8>),
    /// Child entities of a `multipart/*`.
    Multipart(Vec<Part>),
}

/// A MIME entity: headers plus a leaf body or children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body.
    pub body: Body,
}

impl Part {
    /// Creates a part.
    #[must_use]
    pub const fn new(headers: Headers, body: Body) -> Self {
        Self { headers, body }
    }

    /// Parses an entity. Anything that is not well-formed multipart ends up
    /// as a leaf; only a multipart type with no boundary is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingBoundary`] for `multipart/*` without a
    /// `boundary` parameter.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        parse_entity(raw, 0)
    }

    /// Content type, defaulting to `text/plain` when absent or unreadable.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|v| ContentType::parse(v).ok())
            .unwrap_or_else(|| ContentType::new("text", "plain"))
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// `Content-Disposition`, if present.
    #[must_use]
    pub fn disposition(&self) -> Option<ContentDisposition> {
        self.headers.get("content-disposition").map(ContentDisposition::parse)
    }

    /// Filename from the disposition, else the content type's `name`.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.disposition()
            .and_then(|d| d.filename().map(str::to_string))
            .or_else(|| self.content_type().parameters.get("name").cloned())
            .filter(|name| !name.trim().is_empty())
    }

    /// `Content-ID` without the angle brackets.
    #[must_use]
    pub fn content_id(&self) -> Option<String> {
        self.headers
            .get("content-id")
            .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// True if the part is explicitly an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.disposition().is_some_and(|d| d.is_attachment())
    }

    /// Child parts, empty for a leaf.
    #[must_use]
    pub fn children(&self) -> &[Part] {
        match &self.body {
            Body::Multipart(parts) => parts,
            Body::Leaf(_) => &[],
        }
    }

    /// All leaf parts, depth first.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }

    /// Body with the transfer encoding removed. Multipart bodies are empty.
    ///
    /// # Errors
    ///
    /// Returns an error if a Base64 body does not decode.
    pub fn decoded(&self) -> Result<Vec<u8>> {
        let Body::Leaf(raw) = &self.body else {
            return Ok(Vec::new());
        };
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(raw),
            TransferEncoding::QuotedPrintable => Ok(decode_quoted_printable(raw)),
            _ => Ok(raw.clone()),
        }
    }

    /// Decoded body as text in the declared charset.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer encoding does not decode.
    pub fn decoded_text(&self) -> Result<String> {
        let bytes = self.decoded()?;
        Ok(decode_charset(&bytes, self.content_type().charset()))
    }

    /// Serializes the entity. Multipart parts must carry a boundary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingBoundary`] for a multipart without one.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(self.headers.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        match &self.body {
            Body::Leaf(bytes) => out.extend_from_slice(bytes),
            Body::Multipart(parts) => {
                let content_type = self.content_type();
                let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?;
                for part in parts {
                    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                    part.write_to(out)?;
                    if !out.ends_with(b"\r\n") {
                        out.extend_from_slice(b"\r\n");
                    }
                }
                out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
            }
        }
        Ok(())
    }
}

fn collect_leaves<'a>(part: &'a Part, out: &mut Vec<&'a Part>) {
    match &part.body {
        Body::Leaf(_) => out.push(part),
        Body::Multipart(children) => {
            for child in children {
                collect_leaves(child, out);
            }
        }
    }
}

fn parse_entity(raw: &[u8], depth: usize) -> Result<Part> {
    let (head, body) = split_head_body(raw);
    let headers = Headers::parse(head);
    let part = Part::new(headers, Body::Leaf(body.to_vec()));

    let content_type = part.content_type();
    if !content_type.is_multipart() || depth >= MAX_DEPTH {
        return Ok(part);
    }
    let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?;
    let children = split_multipart(body, boundary)
        .into_iter()
        .map(|chunk| parse_entity(chunk, depth + 1))
        .collect::<Result<Vec<_>>>()?;
    Ok(Part::new(part.headers, Body::Multipart(children)))
}

/// Splits at the first empty line. A message that starts with one has no
/// headers; one without any has no body.
fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") {
        return (&[], &raw[2..]);
    }
    if raw.starts_with(b"\n") {
        return (&[], &raw[1..]);
    }
    let crlf = find(raw, b"\r\n\r\n").map(|i| (i + 2, i + 4));
    let lf = find(raw, b"\n\n").map(|i| (i + 1, i + 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((head_end, body_start)) => (&raw[..head_end], &raw[body_start..]),
        None => (raw, &[]),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Cuts a multipart body into its parts. Preamble and epilogue are
/// dropped; a missing close delimiter ends the last part at the end.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..].iter().position(|&b| b == b'\n').map_or(body.len(), |i| pos + i);
        let line = trim_line(&body[pos..line_end]);
        if let Some(rest) = line.strip_prefix(delimiter.as_bytes())
            && (rest.is_empty() || rest == b"--")
        {
            if let Some(s) = start {
                let mut end = pos;
                if end > s && body[end - 1] == b'\n' {
                    end -= 1;
                    if end > s && body[end - 1] == b'\r' {
                        end -= 1;
                    }
                }
                parts.push(&body[s..end]);
            }
            if rest == b"--" {
                return parts;
            }
            start = Some((line_end + 1).min(body.len()));
        }
        pos = line_end + 1;
    }
    if let Some(s) = start {
        parts.push(&body[s..]);
    }
    parts
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}

/// A parsed message with convenience accessors over its root entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    root: Part,
}

impl Message {
    /// Parses raw RFC 5322 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingBoundary`] for a multipart without a
    /// boundary and [`Error::Parse`] for empty input.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::Parse("empty message".to_string()));
        }
        Ok(Self { root: Part::parse(raw)? })
    }

    /// Wraps an already-built root entity.
    #[must_use]
    pub const fn from_part(root: Part) -> Self {
        Self { root }
    }

    /// The root entity.
    #[must_use]
    pub const fn root(&self) -> &Part {
        &self.root
    }

    /// Top-level headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.root.headers
    }

    /// Decoded `Subject`.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.headers().get_decoded("subject")
    }

    /// Mailboxes in `From`.
    #[must_use]
    pub fn from(&self) -> Vec<Mailbox> {
        self.addresses("from")
    }

    /// Mailboxes in every `To` header.
    #[must_use]
    pub fn to(&self) -> Vec<Mailbox> {
        self.addresses("to")
    }

    /// Mailboxes in every `Cc` header.
    #[must_use]
    pub fn cc(&self) -> Vec<Mailbox> {
        self.addresses("cc")
    }

    fn addresses(&self, name: &str) -> Vec<Mailbox> {
        self.headers()
            .get_all(name)
            .into_iter()
            .flat_map(parse_address_list)
            .collect()
    }

    /// `Message-ID` as written, angle brackets included.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.headers().get("message-id").map(str::trim).filter(|v| !v.is_empty())
    }

    /// `Date` parsed as RFC 2822.
    #[must_use]
    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.headers().get("date")?;
        // Trailing comments like `(UTC)` trip the strict parser.
        let cleaned = raw.split('(').next().unwrap_or(raw).trim();
        DateTime::parse_from_rfc2822(cleaned).ok()
    }

    /// First inline `text/plain` body.
    #[must_use]
    pub fn text_body(&self) -> Option<String> {
        self.first_body("plain")
    }

    /// First inline `text/html` body.
    #[must_use]
    pub fn html_body(&self) -> Option<String> {
        self.first_body("html")
    }

    fn first_body(&self, subtype: &str) -> Option<String> {
        self.root.leaves().into_iter().find_map(|part| {
            let ct = part.content_type();
            if ct.main_type != "text" || ct.sub_type != subtype || part.is_attachment() {
                return None;
            }
            part.decoded_text().ok()
        })
    }

    /// Leaf entities, depth first.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Part> {
        self.root.leaves()
    }

    /// Serializes the whole message.
    ///
    /// # Errors
    ///
    /// See [`Part::to_bytes`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.root.to_bytes()
    }

    /// Consumes the message, returning the root entity.
    #[must_use]
    pub fn into_part(self) -> Part {
        self.root
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
    use proptest::prelude::*;

    use super::*;

    const NESTED: &str = concat!(
        "From: \"Eve\" <eve@example.com>\r\n",
        "To: a@example.com, b@example.com\r\n",
        "Cc: c@example.com\r\n",
        "Subject: =?utf-8?Q?Quarterly_r=C3=A9port?=\r\n",
        "Message-ID: <abc@example.com>\r\n",
        "Date: Tue, 1 Jul 2003 10:52:37 +0200 (CEST)\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
        "\r\n",
        "preamble\r\n",
        "--outer\r\n",
        "Content-Type: multipart/alternative; boundary=inner\r\n",
        "\r\n",
        "--inner\r\n",
        "Content-Type: text/plain; charset=iso-8859-1\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "caf=E9 time\r\n",
        "--inner\r\n",
        "Content-Type: text/html\r\n",
        "\r\n",
        "<p>cafe</p>\r\n",
        "--inner--\r\n",
        "--outer\r\n",
        "Content-Type: application/pdf; name=\"q3.pdf\"\r\n",
        "Content-Disposition: attachment\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "JVBERi0=\r\n",
        "--outer--\r\n",
        "epilogue\r\n",
    );

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(TransferEncoding::parse("quoted-printable"), TransferEncoding::QuotedPrintable);
        assert_eq!(TransferEncoding::parse("x-unknown"), TransferEncoding::SevenBit);
    }

    #[test]
    fn parses_nested_multipart() {
        let message = Message::parse(NESTED.as_bytes()).unwrap();
        assert_eq!(message.subject().as_deref(), Some("Quarterly réport"));
        assert_eq!(message.from()[0].email, "eve@example.com");
        assert_eq!(message.to().len(), 2);
        assert_eq!(message.cc()[0].email, "c@example.com");
        assert_eq!(message.message_id(), Some("<abc@example.com>"));
        assert!(message.date().is_some());

        assert_eq!(message.text_body().as_deref(), Some("café time"));
        assert_eq!(message.html_body().as_deref(), Some("<p>cafe</p>"));

        let leaves = message.leaves();
        assert_eq!(leaves.len(), 3);
        let pdf = leaves[2];
        assert!(pdf.is_attachment());
        assert_eq!(pdf.filename().as_deref(), Some("q3.pdf"));
        assert_eq!(pdf.decoded().unwrap(), b"%PDF-");
    }

    #[test]
    fn single_part_defaults() {
        let message = Message::parse(b"Subject: hi\n\nhello\n").unwrap();
        assert_eq!(message.text_body().as_deref(), Some("hello\n"));
        assert_eq!(message.html_body(), None);
        assert!(message.from().is_empty());
        assert_eq!(message.leaves().len(), 1);
    }

    #[test]
    fn headers_only_message() {
        let message = Message::parse(b"Subject: only headers\r\n").unwrap();
        assert_eq!(message.subject().as_deref(), Some("only headers"));
        assert_eq!(message.text_body().as_deref(), Some(""));
    }

    #[test]
    fn missing_boundary_is_error() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\nbody";
        assert!(matches!(Message::parse(raw), Err(Error::MissingBoundary)));
    }

    #[test]
    fn empty_input_is_error() {
        assert!(matches!(Message::parse(b"  \r\n"), Err(Error::Parse(_))));
    }

    #[test]
    fn unterminated_multipart_keeps_last_part() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n--b\r\n\r\none\r\n--b\r\n\r\ntwo";
        let message = Message::parse(raw).unwrap();
        let texts: Vec<_> = message.leaves().iter().map(|p| p.decoded_text().unwrap()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn content_id_and_inline() {
        let raw = concat!(
            "Content-Type: image/png\r\n",
            "Content-Disposition: inline\r\n",
            "Content-ID: <logo@x>\r\n",
            "\r\n",
            "png",
        );
        let part = Part::parse(raw.as_bytes()).unwrap();
        assert_eq!(part.content_id().as_deref(), Some("logo@x"));
        assert!(part.disposition().unwrap().is_inline());
        assert!(!part.is_attachment());
    }

    #[test]
    fn serializes_back_to_parseable_bytes() {
        let message = Message::parse(NESTED.as_bytes()).unwrap();
        let bytes = message.to_bytes().unwrap();
        let reparsed = Message::parse(&bytes).unwrap();
        assert_eq!(reparsed.leaves().len(), 3);
        assert_eq!(reparsed.text_body(), message.text_body());
    }

    proptest! {
        #[test]
        fn parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = Message::parse(&data);
        }

        #[test]
        fn multipart_split_never_panics(body in "[-a-z\r\n ]{0,200}") {
            let _ = split_multipart(body.as_bytes(), "a");
        }
    }
}
