//! Header blocks.
//!
//! Order and original capitalisation are kept so a message can be rebuilt
//! with its headers as the sender wrote them.

use std::fmt;

use crate::encoding::decode_rfc2047;
use crate::error::{Error, Result};

/// Longest header line we accept on output (RFC 5322 §2.1.1).
const MAX_LINE: usize = 998;

/// Ordered, case-insensitive header collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every `name` header with one value, kept at the position of
    /// the first occurrence.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(pos) = self.position(&name) {
            self.entries[pos].1 = value;
            let mut seen = 0;
            self.entries.retain(|(n, _)| {
                if n.eq_ignore_ascii_case(&name) {
                    seen += 1;
                    seen == 1
                } else {
                    true
                }
            });
        } else {
            self.entries.push((name, value));
        }
    }

    /// First raw value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// First value for `name` with RFC 2047 words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Every raw value for `name`, in order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// True if `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes every `name` header.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Iterates `(name, value)` in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Parses a raw header block, unfolding continuation lines.
    ///
    /// Lines without a colon (including an mbox `From ` line) are skipped.
    /// Parsing stops at the first empty line.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = current.as_mut() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = current.take() {
                headers.add(name, value);
            }
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim_end();
                if !name.is_empty() && !name.contains(char::is_whitespace) {
                    current = Some((name.to_string(), value.trim().to_string()));
                }
            }
        }
        if let Some((name, value)) = current {
            headers.add(name, value);
        }
        headers
    }

    /// Checks that every header can go on the wire as written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] for empty names, bare line breaks
    /// inside a value or lines longer than 998 octets.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in &self.entries {
            if name.is_empty() || name.contains([':', ' ', '\t', '\r', '\n']) {
                return Err(Error::InvalidHeader(format!("bad header name {name:?}")));
            }
            for (i, line) in value.split("\r\n").enumerate() {
                if line.contains(['\r', '\n']) {
                    return Err(Error::InvalidHeader(format!("bare line break in {name}")));
                }
                if i > 0 && !line.starts_with([' ', '\t']) {
                    return Err(Error::InvalidHeader(format!("unindented fold in {name}")));
                }
                if line.len() + name.len() + 2 > MAX_LINE {
                    return Err(Error::InvalidHeader(format!("{name} line too long")));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
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
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_headers_set_keeps_first_position() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("Subject", "hi");
        headers.add("to", "bob@example.com");
        headers.set("TO", "carol@example.com");
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["To", "Subject"]);
        assert_eq!(headers.get_all("to"), vec!["carol@example.com"]);
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.add("Subject", "Test");
        headers.add("X-Other", "1");
        headers.remove("subject");
        assert!(headers.get("Subject").is_none());
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_headers_parse_unfolds() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "Subject: Test\r\n",
            "\tMessage\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n",
            "Body: not a header\r\n"
        );
        let headers = Headers::parse(text.as_bytes());
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(headers.get("Content-Type"), Some("text/plain; charset=utf-8"));
        assert!(headers.get("Body").is_none());
    }

    #[test]
    fn test_headers_parse_skips_junk_lines() {
        let text = "From nobody Mon Jan 1 00:00:00 2024\nX-A: 1\ngarbage line\nX-B: 2\n";
        let headers = Headers::parse(text.as_bytes());
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["X-A", "X-B"]);
    }

    #[test]
    fn test_headers_keep_order_and_case_on_output() {
        let mut headers = Headers::new();
        headers.add("X-Zeta", "1");
        headers.add("Received", "from a");
        headers.add("Received", "from b");
        assert_eq!(headers.to_string(), "X-Zeta: 1\r\nReceived: from a\r\nReceived: from b\r\n");
    }

    #[test]
    fn test_decoded_value() {
        let mut headers = Headers::new();
        headers.add("Subject", "=?utf-8?B?SMOpbGxv?=");
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("Héllo"));
    }

    #[test]
    fn test_validate() {
        let mut headers = Headers::new();
        headers.add("Subject", "=?utf-8?B?YQ==?=\r\n =?utf-8?B?Yg==?=");
        assert!(headers.validate().is_ok());
        headers.add("X-Bad", "a\nb");
        assert!(matches!(headers.validate(), Err(Error::InvalidHeader(_))));
    }
}
