//! Transfer and header encodings: Base64, Quoted-Printable and RFC 2047.
//!
//! Decoders are lenient. Real-world mail is full of slightly broken
//! encodings and a quarantine proxy must still show the reviewer something.

use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Maximum encoded line length (RFC 2045).
const MAX_LINE_LENGTH: usize = 76;

/// Input bytes per RFC 2047 encoded-word; keeps each word under 75 chars.
const WORD_CHUNK: usize = 45;

/// Encodes data as Base64 on a single line.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64 wrapped at 76 columns with CRLF.
#[must_use]
pub fn encode_base64_wrapped(data: &[u8]) -> String {
    let flat = STANDARD.encode(data);
    let mut out = String::with_capacity(flat.len() + flat.len() / MAX_LINE_LENGTH * 2 + 2);
    for chunk in flat.as_bytes().chunks(MAX_LINE_LENGTH) {
        // Base64 output is ASCII, so every chunk boundary is a char boundary.
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

/// Decodes Base64, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    match STANDARD.decode(&cleaned) {
        Ok(bytes) => Ok(bytes),
        // Some senders drop the padding.
        Err(e) => {
            let mut padded = cleaned;
            while padded.len() % 4 != 0 {
                padded.push(b'=');
            }
            STANDARD.decode(&padded).map_err(|_| Error::Base64Decode(e))
        }
    }
}

/// Encodes bytes as Quoted-Printable (RFC 2045).
///
/// CRLF pairs in the input stay hard line breaks; everything else that is
/// not printable ASCII is escaped.
#[must_use]
pub fn encode_quoted_printable(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3 / 2);
    let mut lines = data.split(|&b| b == b'\n').peekable();
    while let Some(line) = lines.next() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let mut col = 0;
        for (i, &byte) in line.iter().enumerate() {
            let last = i + 1 == line.len();
            let literal = matches!(byte, b'!'..=b'<' | b'>'..=b'~')
                || (matches!(byte, b' ' | b'\t') && !last);
            let width = if literal { 1 } else { 3 };
            if col + width > MAX_LINE_LENGTH - 1 {
                out.push_str("=\r\n");
                col = 0;
            }
            if literal {
                out.push(char::from(byte));
            } else {
                let _ = write!(out, "={byte:02X}");
            }
            col += width;
        }
        if lines.peek().is_some() {
            out.push_str("\r\n");
        }
    }
    out
}

/// Decodes Quoted-Printable. Broken escapes are kept as literal text.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            out.push(byte);
            i += 1;
            continue;
        }
        let next = &data[i + 1..(i + 3).min(data.len())];
        match next {
            // Trailing `=` at the very end of the body.
            [] => i += 1,
            [b'\r', b'\n'] => i += 3,
            [b'\n', ..] | [b'\r'] => i += 2,
            &[hi, lo] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                out.push((hex_value(hi) << 4) | hex_value(lo));
                i += 3;
            }
            [b' ' | b'\t', ..] if soft_break_with_padding(&data[i + 1..]) => {
                i += 1;
                while i < data.len() && matches!(data[i], b' ' | b'\t') {
                    i += 1;
                }
                if data.get(i) == Some(&b'\r') {
                    i += 1;
                }
                if data.get(i) == Some(&b'\n') {
                    i += 1;
                }
            }
            _ => {
                out.push(byte);
                i += 1;
            }
        }
    }
    out
}

/// True when `rest` is whitespace up to a line break or the end.
fn soft_break_with_padding(rest: &[u8]) -> bool {
    rest.iter()
        .find(|b| !matches!(b, b' ' | b'\t'))
        .is_none_or(|&b| b == b'\r' || b == b'\n')
}

const fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Converts bytes in `charset` to a `String`.
///
/// UTF-8 and ASCII decode lossily; Latin-1 and windows-1252 map byte to
/// code point. Unknown charsets are treated as UTF-8.
#[must_use]
pub fn decode_charset(bytes: &[u8], charset: Option<&str>) -> String {
    let charset = charset.unwrap_or("utf-8").trim().to_ascii_lowercase();
    match charset.as_str() {
        "iso-8859-1" | "latin1" | "latin-1" | "iso8859-1" | "windows-1252" | "cp1252" => {
            if let Ok(s) = std::str::from_utf8(bytes) {
                // Mislabelled UTF-8 is common; prefer it when it validates.
                return s.to_string();
            }
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Encodes a header value as RFC 2047 `B` words when it is not plain ASCII.
///
/// Long values are split into several words folded onto continuation lines.
#[must_use]
pub fn encode_rfc2047(text: &str) -> String {
    if text.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) && !text.contains("=?") {
        return text.to_string();
    }
    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if chunk.len() + c.len_utf8() > WORD_CHUNK {
            words.push(format!("=?utf-8?B?{}?=", encode_base64(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?utf-8?B?{}?=", encode_base64(chunk.as_bytes())));
    }
    words.join("\r\n ")
}

/// Decodes every RFC 2047 encoded-word in a header value.
///
/// Whitespace between adjacent encoded-words is dropped; malformed words
/// are left as they are.
#[must_use]
pub fn decode_rfc2047(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut last_was_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        if let Some((decoded, consumed)) = decode_word(candidate) {
            if !(last_was_word && before.chars().all(char::is_whitespace)) {
                out.push_str(before);
            }
            out.push_str(&decoded);
            rest = &candidate[consumed..];
            last_was_word = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            last_was_word = false;
        }
    }
    out.push_str(rest);
    out
}

/// Decodes one `=?charset?enc?text?=` word at the start of `s`.
///
/// Returns the decoded text and how many bytes of `s` it covered.
fn decode_word(s: &str) -> Option<(String, usize)> {
    let body = s.strip_prefix("=?")?;
    let (charset, body) = body.split_once('?')?;
    let (encoding, body) = body.split_once('?')?;
    let end = body.find("?=")?;
    let text = &body[..end];
    if text.contains(char::is_whitespace) || charset.is_empty() {
        return None;
    }
    // RFC 2231 language suffix: `utf-8*en`.
    let charset = charset.split('*').next().unwrap_or(charset);
    let bytes = match encoding {
        "B" | "b" => decode_base64(text.as_bytes()).ok()?,
        "Q" | "q" => decode_quoted_printable(text.replace('_', " ").as_bytes()),
        _ => return None,
    };
    let consumed = s.len() - body.len() + end + 2;
    Some((decode_charset(&bytes, Some(charset)), consumed))
}

/// Rejects unknown transfer encodings instead of silently passing bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidEncoding`] for names outside RFC 2045.
pub fn check_transfer_encoding(name: &str) -> Result<()> {
    match name.trim().to_ascii_lowercase().as_str() {
        "7bit" | "8bit" | "binary" | "base64" | "quoted-printable" => Ok(()),
        other => Err(Error::InvalidEncoding(format!("unknown transfer encoding: {other}"))),
    }
}
