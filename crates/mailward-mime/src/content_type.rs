//! `Content-Type` and `Content-Disposition` values.

use std::collections::BTreeMap;
use std::fmt;

use crate::encoding::{decode_charset, decode_rfc2047};
use crate::error::{Error, Result};

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart"), lowercased.
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg"), lowercased.
    pub sub_type: String,
    /// Parameters keyed by lowercased name.
    pub parameters: BTreeMap<String, String>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into().to_ascii_lowercase(),
            sub_type: sub_type.into().to_ascii_lowercase(),
            parameters: BTreeMap::new(),
        }
    }

    /// `text/plain; charset=utf-8`
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "utf-8")
    }

    /// `text/html; charset=utf-8`
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text", "html").with_parameter("charset", "utf-8")
    }

    /// `multipart/{subtype}` with the given boundary.
    #[must_use]
    pub fn multipart(sub_type: &str, boundary: impl Into<String>) -> Self {
        Self::new("multipart", sub_type).with_parameter("boundary", boundary)
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// `type/subtype` without parameters.
    #[must_use]
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type == "text"
    }

    /// Parses `type/subtype; param=value; ...`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `type/subtype` part is missing or empty.
    pub fn parse(s: &str) -> Result<Self> {
        let (head, parameters) = split_parameters(s);
        let (main, sub) = head
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(s.trim().to_string()))?;
        let (main, sub) = (main.trim(), sub.trim());
        if main.is_empty() || sub.is_empty() || main.contains(char::is_whitespace) {
            return Err(Error::InvalidContentType(s.trim().to_string()));
        }
        let mut content_type = Self::new(main, sub);
        content_type.parameters = parameters;
        Ok(content_type)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;
        write_parameters(f, &self.parameters)
    }
}

/// `Content-Disposition` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// `inline`, `attachment` or whatever the sender wrote, lowercased.
    pub kind: String,
    /// Parameters keyed by lowercased name.
    pub parameters: BTreeMap<String, String>,
}

impl ContentDisposition {
    /// Disposition of `kind` with an optional filename.
    #[must_use]
    pub fn new(kind: &str, filename: Option<&str>) -> Self {
        let mut parameters = BTreeMap::new();
        if let Some(name) = filename {
            parameters.insert("filename".to_string(), name.to_string());
        }
        Self { kind: kind.to_ascii_lowercase(), parameters }
    }

    /// Parses a disposition header value. Never fails; an empty value
    /// yields an empty kind.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let (head, parameters) = split_parameters(s);
        Self { kind: head.trim().to_ascii_lowercase(), parameters }
    }

    /// True for `attachment`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.kind == "attachment"
    }

    /// True for `inline`.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.kind == "inline"
    }

    /// The `filename` parameter.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.parameters.get("filename").map(String::as_str)
    }
}

impl fmt::Display for ContentDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)?;
        write_parameters(f, &self.parameters)
    }
}

fn write_parameters(f: &mut fmt::Formatter<'_>, parameters: &BTreeMap<String, String>) -> fmt::Result {
    for (key, value) in parameters {
        if !value.is_ascii() {
            let encoded: String = value.bytes().map(percent_encode).collect();
            write!(f, "; {key}*=utf-8''{encoded}")?;
        } else if value.is_empty() || value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c)) {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, "; {key}=\"{escaped}\"")?;
        } else {
            write!(f, "; {key}={value}")?;
        }
    }
    Ok(())
}

fn percent_encode(byte: u8) -> String {
    if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
        char::from(byte).to_string()
    } else {
        format!("%{byte:02X}")
    }
}

/// Splits `head; a=b; c="d;e"` into the head and its parameters.
///
/// Handles quoted values, RFC 2231 extended (`name*=utf-8''...`) and
/// continued (`name*0=`, `name*1=`) parameters, and RFC 2047 words some
/// mailers put inside quoted filenames.
fn split_parameters(s: &str) -> (String, BTreeMap<String, String>) {
    let mut segments = split_unquoted(s, ';').into_iter();
    let head = segments.next().unwrap_or_default();

    let mut plain = BTreeMap::new();
    let mut continued: BTreeMap<String, Vec<(u32, String, bool)>> = BTreeMap::new();
    for segment in segments {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = unquote(value.trim());
        if key.is_empty() {
            continue;
        }
        if let Some((name, rest)) = key.split_once('*') {
            let extended = rest.ends_with('*') || rest.is_empty();
            let index = rest.trim_end_matches('*').parse().unwrap_or(0);
            continued.entry(name.to_string()).or_default().push((index, value, extended));
        } else {
            plain.insert(key, decode_rfc2047(&value));
        }
    }

    for (name, mut pieces) in continued {
        pieces.sort_by_key(|(index, _, _)| *index);
        let mut charset = None;
        let mut bytes = Vec::new();
        for (i, (_, value, extended)) in pieces.into_iter().enumerate() {
            if extended {
                let mut value = value.as_str();
                if i == 0 {
                    let mut fields = value.splitn(3, '\'');
                    if let (Some(cs), Some(_lang), Some(text)) = (fields.next(), fields.next(), fields.next()) {
                        charset = Some(cs.to_string()).filter(|c| !c.is_empty());
                        value = text;
                    }
                }
                bytes.extend(percent_decode(value));
            } else {
                bytes.extend_from_slice(value.as_bytes());
            }
        }
        plain.insert(name, decode_charset(&bytes, charset.as_deref()));
    }

    (head, plain)
}

fn percent_decode(s: &str) -> Vec<u8> {
    let raw = s.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%'
            && let Some(hex) = raw.get(i + 1..i + 3)
            && let Ok(text) = std::str::from_utf8(hex)
            && let Ok(byte) = u8::from_str_radix(text, 16)
        {
            out.push(byte);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

/// Splits on `sep` outside double quotes.
fn split_unquoted(s: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c == sep && !quoted => out.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    out.push(current);
    out
}

/// Strips surrounding quotes and backslash escapes.
pub(crate) fn unquote(s: &str) -> String {
    let Some(inner) = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return s.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_new() {
        let ct = ContentType::new("Text", "Plain");
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert!(ct.parameters.is_empty());
    }

    #[test]
    fn test_multipart_with_boundary() {
        let ct = ContentType::multipart("mixed", "boundary123");
        assert_eq!(ct.essence(), "multipart/mixed");
        assert_eq!(ct.boundary(), Some("boundary123"));
        assert!(ct.is_multipart());
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("TEXT/Plain; Charset=\"UTF-8\"").unwrap();
        assert_eq!(ct.essence(), "text/plain");
        assert_eq!(ct.charset(), Some("UTF-8"));
    }

    #[test]
    fn test_content_type_parse_quoted_semicolon() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part;123\"").unwrap();
        assert_eq!(ct.boundary(), Some("----=_Part;123"));
    }

    #[test]
    fn test_content_type_parse_rejects_garbage() {
        assert!(ContentType::parse("textplain").is_err());
        assert!(ContentType::parse("/html").is_err());
        assert!(ContentType::parse("").is_err());
    }

    #[test]
    fn test_content_type_display() {
        let ct = ContentType::multipart("alternative", "a b");
        assert_eq!(ct.to_string(), "multipart/alternative; boundary=\"a b\"");
        assert_eq!(ContentType::text_plain().to_string(), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_disposition_filename() {
        let d = ContentDisposition::parse("Attachment; filename=\"report q3.pdf\"; size=10");
        assert!(d.is_attachment());
        assert_eq!(d.filename(), Some("report q3.pdf"));
    }

    #[test]
    fn test_rfc2231_extended_filename() {
        let d = ContentDisposition::parse("attachment; filename*=utf-8''na%C3%AFve%20plan.txt");
        assert_eq!(d.filename(), Some("naïve plan.txt"));
    }

    #[test]
    fn test_rfc2231_continuations() {
        let d = ContentDisposition::parse("attachment; filename*0=\"long\"; filename*1=\"name.txt\"");
        assert_eq!(d.filename(), Some("longname.txt"));
    }

    #[test]
    fn test_rfc2047_in_quoted_filename() {
        let d = ContentDisposition::parse("attachment; filename=\"=?utf-8?B?w6lsYW4udHh0?=\"");
        assert_eq!(d.filename(), Some("élan.txt"));
    }

    #[test]
    fn test_disposition_display_roundtrip_non_ascii() {
        let d = ContentDisposition::new("attachment", Some("résumé.pdf"));
        let text = d.to_string();
        assert!(text.starts_with("attachment; filename*=utf-8''r%C3%A9sum%C3%A9.pdf"));
        assert_eq!(ContentDisposition::parse(&text).filename(), Some("résumé.pdf"));
    }
}
