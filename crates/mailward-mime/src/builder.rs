//! Building new MIME entities.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::content_type::{ContentDisposition, ContentType};
use crate::encoding::{encode_base64_wrapped, encode_quoted_printable, encode_rfc2047};
use crate::error::Result;
use crate::header::Headers;
use crate::message::{Body, Message, Part, TransferEncoding};

/// Longest line a 7bit body may carry.
const MAX_7BIT_LINE: usize = 998;

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique multipart boundary. Nested parts built in the same
/// millisecond still get different values.
#[must_use]
pub fn generate_boundary() -> String {
    let n = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    let millis = Utc::now().timestamp_millis();
    format!("----=_Part_{millis}_{n}")
}

/// Binary content to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename shown to the recipient.
    pub filename: String,
    /// MIME type, e.g. `application/pdf`.
    pub mime_type: String,
    /// Raw bytes.
    pub data: Vec<u8>,
    /// Inline rather than attachment disposition.
    pub inline: bool,
    /// `Content-ID` without angle brackets.
    pub content_id: Option<String>,
}

impl Part {
    /// `text/plain; charset=utf-8`, 7bit when possible, else QP.
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self::text_leaf(ContentType::text_plain(), text)
    }

    /// `text/html; charset=utf-8`, 7bit when possible, else QP.
    #[must_use]
    pub fn html(html: &str) -> Self {
        Self::text_leaf(ContentType::text_html(), html)
    }

    fn text_leaf(content_type: ContentType, text: &str) -> Self {
        let normalized = normalize_newlines(text);
        let mut headers = Headers::new();
        headers.add("Content-Type", content_type.to_string());
        let seven_bit = normalized.is_ascii()
            && normalized.split("\r\n").all(|line| line.len() <= MAX_7BIT_LINE);
        let body = if seven_bit {
            headers.add("Content-Transfer-Encoding", TransferEncoding::SevenBit.to_string());
            normalized.into_bytes()
        } else {
            headers.add("Content-Transfer-Encoding", TransferEncoding::QuotedPrintable.to_string());
            encode_quoted_printable(normalized.as_bytes()).into_bytes()
        };
        Self::new(headers, Body::Leaf(body))
    }

    /// Base64 leaf for an attachment or inline resource.
    #[must_use]
    pub fn attachment(attachment: &Attachment) -> Self {
        let content_type = ContentType::parse(&attachment.mime_type)
            .unwrap_or_else(|_| ContentType::new("application", "octet-stream"))
            .with_parameter("name", attachment.filename.clone());
        let kind = if attachment.inline { "inline" } else { "attachment" };
        let disposition = ContentDisposition::new(kind, Some(&attachment.filename));

        let mut headers = Headers::new();
        headers.add("Content-Type", content_type.to_string());
        headers.add("Content-Disposition", disposition.to_string());
        headers.add("Content-Transfer-Encoding", TransferEncoding::Base64.to_string());
        if let Some(cid) = &attachment.content_id {
            headers.add("Content-ID", format!("<{cid}>"));
        }
        Self::new(headers, Body::Leaf(encode_base64_wrapped(&attachment.data).into_bytes()))
    }

    /// `multipart/{subtype}` with a fresh boundary.
    #[must_use]
    pub fn multipart(sub_type: &str, parts: Vec<Self>) -> Self {
        let mut headers = Headers::new();
        headers.add("Content-Type", ContentType::multipart(sub_type, generate_boundary()).to_string());
        Self::new(headers, Body::Multipart(parts))
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\r\n")
}

/// Assembles a top-level message from envelope headers and a body entity.
///
/// Content headers of the body entity are merged into the top-level block
/// after the envelope headers, with `MIME-Version: 1.0` in front of them.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    headers: Headers,
    body: Option<Part>,
}

/// Headers that describe the entity rather than the message.
const CONTENT_HEADERS: [&str; 4] =
    ["content-type", "content-transfer-encoding", "content-disposition", "mime-version"];

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every header from `source` except the named ones
    /// (case-insensitive).
    #[must_use]
    pub fn headers_from(mut self, source: &Headers, except: &[&str]) -> Self {
        for (name, value) in source.iter() {
            if !except.iter().any(|e| e.eq_ignore_ascii_case(name)) {
                self.headers.add(name, value);
            }
        }
        self
    }

    /// Appends a header as-is.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Sets `Subject`, RFC 2047 encoding it when needed.
    #[must_use]
    pub fn subject(mut self, subject: &str) -> Self {
        self.headers.set("Subject", encode_rfc2047(subject));
        self
    }

    /// Sets `Message-ID`; angle brackets are added if missing.
    #[must_use]
    pub fn message_id(mut self, id: &str) -> Self {
        let id = id.trim();
        let id = if id.starts_with('<') { id.to_string() } else { format!("<{id}>") };
        self.headers.set("Message-ID", id);
        self
    }

    /// The body entity.
    #[must_use]
    pub fn body(mut self, part: Part) -> Self {
        self.body = Some(part);
        self
    }

    /// Builds the message. Without a body an empty text part is used.
    ///
    /// # Errors
    ///
    /// Returns an error if a header cannot go on the wire.
    pub fn build(self) -> Result<Message> {
        let body = self.body.unwrap_or_else(|| Part::text(""));
        let mut headers = self.headers;
        for name in CONTENT_HEADERS {
            headers.remove(name);
        }
        headers.add("MIME-Version", "1.0");
        for (name, value) in body.headers.iter() {
            headers.add(name, value);
        }
        headers.validate()?;
        Ok(Message::from_part(Part::new(headers, body.body)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pdf() -> Attachment {
        Attachment {
            filename: "q3.pdf".into(),
            mime_type: "application/pdf".into(),
            data: b"%PDF-1.4 fake".to_vec(),
            inline: false,
            content_id: None,
        }
    }

    #[test]
    fn boundaries_are_unique() {
        assert_ne!(generate_boundary(), generate_boundary());
    }

    #[test]
    fn ascii_text_is_7bit_with_crlf() {
        let part = Part::text("line one\nline two");
        assert_eq!(part.headers.get("Content-Transfer-Encoding"), Some("7bit"));
        assert_eq!(part.decoded_text().unwrap(), "line one\r\nline two");
    }

    #[test]
    fn non_ascii_text_round_trips_through_qp() {
        let part = Part::html("<p>héllo</p>");
        assert_eq!(part.headers.get("Content-Transfer-Encoding"), Some("quoted-printable"));
        assert_eq!(part.decoded_text().unwrap(), "<p>héllo</p>");
    }

    #[test]
    fn attachment_round_trips() {
        let mut inline = pdf();
        inline.inline = true;
        inline.content_id = Some("img1@x".into());
        let part = Part::attachment(&inline);
        assert_eq!(part.filename().as_deref(), Some("q3.pdf"));
        assert_eq!(part.content_id().as_deref(), Some("img1@x"));
        assert!(part.disposition().unwrap().is_inline());
        assert_eq!(part.decoded().unwrap(), inline.data);
    }

    #[test]
    fn builds_mixed_alternative_message() {
        let mut original = Headers::new();
        original.add("From", "a@example.com");
        original.add("Subject", "old");
        original.add("Content-Type", "text/plain");
        original.add("Received", "from mx");

        let alternative = Part::multipart("alternative", vec![Part::text("hi"), Part::html("<b>hi</b>")]);
        let mixed = Part::multipart("mixed", vec![alternative, Part::attachment(&pdf())]);
        let message = MessageBuilder::new()
            .headers_from(&original, &["subject", "content-type"])
            .subject("Révisé")
            .message_id("new@mailward")
            .header("X-Mailward-Email-ID", "7")
            .body(mixed)
            .build()
            .unwrap();

        let bytes = message.to_bytes().unwrap();
        let reparsed = Message::parse(&bytes).unwrap();
        assert_eq!(reparsed.subject().as_deref(), Some("Révisé"));
        assert_eq!(reparsed.message_id(), Some("<new@mailward>"));
        assert_eq!(reparsed.headers().get("Received"), Some("from mx"));
        assert_eq!(reparsed.headers().get("MIME-Version"), Some("1.0"));
        assert_eq!(reparsed.headers().get_all("Content-Type").len(), 1);
        assert_eq!(reparsed.text_body().as_deref(), Some("hi"));
        assert_eq!(reparsed.html_body().as_deref(), Some("<b>hi</b>"));
        let leaves = reparsed.leaves();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[2].decoded().unwrap(), b"%PDF-1.4 fake");
    }

    #[test]
    fn empty_builder_yields_text_message() {
        let message = MessageBuilder::new().build().unwrap();
        assert_eq!(message.headers().get("Content-Type"), Some("text/plain; charset=utf-8"));
    }
}
