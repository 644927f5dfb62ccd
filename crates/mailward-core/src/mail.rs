//! Fields pulled out of raw MIME for storage and rule evaluation.

use mailward_mime::{Headers, Message, parse_address_list};
use tracing::debug;

use crate::rules::MessageFields;

/// Header a released copy carries so the watcher does not intercept it
/// again.
pub const RELEASE_BYPASS_HEADER: &str = "X-Mailward-Release-Bypass";

/// Row id of the message a released copy came from.
pub const RELEASE_EMAIL_ID_HEADER: &str = "X-Mailward-Email-ID";

/// Subject used when a message has none.
pub const DEFAULT_SUBJECT: &str = "No Subject";

/// A received message, reduced to what the store and the rule engine need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMail {
    /// Decoded subject, or [`DEFAULT_SUBJECT`].
    pub subject: String,
    /// First From address, bare.
    pub sender: String,
    /// To and Cc addresses, in header order.
    pub recipients: Vec<String>,
    /// `Message-ID` with brackets, if present.
    pub message_id: Option<String>,
    /// First text/plain body.
    pub body_text: Option<String>,
    /// First text/html body.
    pub body_html: Option<String>,
    /// Row id claimed by a `release-{id}` bypass header that agrees with
    /// [`RELEASE_EMAIL_ID_HEADER`]. Only a claim: the watcher checks it
    /// against the store before trusting it.
    pub release_claim: Option<i64>,
}

impl ParsedMail {
    /// Parses `raw`. Never fails: when the MIME structure is broken only
    /// the header block is used.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        match Message::parse(raw) {
            Ok(message) => Self {
                body_text: message.text_body(),
                body_html: message.html_body(),
                ..Self::from_headers(message.headers())
            },
            Err(e) => {
                debug!(error = %e, "MIME parse failed, using headers only");
                Self::from_headers(&Headers::parse(raw))
            }
        }
    }

    fn from_headers(headers: &Headers) -> Self {
        let addresses = |name: &str| -> Vec<String> {
            headers
                .get_all(name)
                .into_iter()
                .flat_map(parse_address_list)
                .map(|m| m.email)
                .collect()
        };
        let mut recipients = addresses("to");
        recipients.extend(addresses("cc"));

        Self {
            subject: headers
                .get_decoded("subject")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            sender: addresses("from").into_iter().next().unwrap_or_default(),
            recipients,
            message_id: headers
                .get("message-id")
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            body_text: None,
            body_html: None,
            release_claim: release_claim(headers),
        }
    }

    /// Rule engine view. The html body stands in for a missing text body.
    #[must_use]
    pub fn fields(&self) -> MessageFields {
        MessageFields {
            subject: self.subject.clone(),
            body: self.body_text.clone().or_else(|| self.body_html.clone()).unwrap_or_default(),
            sender: self.sender.clone(),
            recipients: self.recipients.clone(),
        }
    }
}

fn release_claim(headers: &Headers) -> Option<i64> {
    let bypass = headers.get(RELEASE_BYPASS_HEADER)?.trim();
    let id: i64 = bypass.strip_prefix("release-")?.parse().ok()?;
    let echoed: i64 = headers.get(RELEASE_EMAIL_ID_HEADER)?.trim().parse().ok()?;
    (id == echoed).then_some(id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers_and_bodies() {
        let raw = concat!(
            "From: \"Boss\" <boss@corp.example>\r\n",
            "To: me@corp.example, other@corp.example\r\n",
            "Cc: audit@corp.example\r\n",
            "Subject: =?utf-8?B?VVJHRU5UIHdpcmU=?=\r\n",
            "Message-ID: <m1@corp.example>\r\n",
            "\r\n",
            "Please pay today.\r\n"
        );
        let mail = ParsedMail::parse(raw.as_bytes());
        assert_eq!(mail.subject, "URGENT wire");
        assert_eq!(mail.sender, "boss@corp.example");
        assert_eq!(mail.recipients, vec!["me@corp.example", "other@corp.example", "audit@corp.example"]);
        assert_eq!(mail.message_id.as_deref(), Some("<m1@corp.example>"));
        assert_eq!(mail.body_text.as_deref().map(str::trim), Some("Please pay today."));
        assert_eq!(mail.release_claim, None);
        assert_eq!(mail.fields().body.trim(), "Please pay today.");
    }

    #[test]
    fn defaults_for_bare_message() {
        let mail = ParsedMail::parse(b"X-Mailward-Release-Bypass: release-4\r\nX-Mailward-Email-ID: 4\r\n\r\nhi");
        assert_eq!(mail.subject, DEFAULT_SUBJECT);
        assert!(mail.sender.is_empty());
        assert!(mail.message_id.is_none());
        assert_eq!(mail.release_claim, Some(4));
    }

    #[test]
    fn release_claim_needs_matching_headers() {
        let claim = |raw: &str| ParsedMail::parse(raw.as_bytes()).release_claim;
        assert_eq!(claim("X-Mailward-Release-Bypass: spoofed\r\n\r\nx"), None);
        assert_eq!(claim("X-Mailward-Release-Bypass: release-4\r\n\r\nx"), None);
        assert_eq!(claim("X-Mailward-Release-Bypass: release-4\r\nX-Mailward-Email-ID: 5\r\n\r\nx"), None);
        assert_eq!(claim("X-Mailward-Release-Bypass: release-x\r\nX-Mailward-Email-ID: x\r\n\r\nx"), None);
    }

    #[test]
    fn html_stands_in_for_text() {
        let raw = "Subject: x\r\nContent-Type: text/html\r\n\r\n<b>pay</b>";
        let mail = ParsedMail::parse(raw.as_bytes());
        assert!(mail.body_text.is_none());
        assert_eq!(mail.fields().body.trim(), "<b>pay</b>");
    }
}
