//! Line framing with literal support.
//!
//! A server response is one CRLF-terminated line, unless the line ends in a
//! `{n}` literal marker; then `n` raw bytes and another line follow, and so on.

#![allow(clippy::missing_errors_doc)]

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

const BUFFER_SIZE: usize = 8192;

/// Longest line accepted before the peer is considered hostile.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Largest literal accepted (a full message body).
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

/// Buffered reader/writer over a connected stream.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    /// Bytes of a line not yet terminated; survives a cancelled read.
    partial: Vec<u8>,
    out: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, stream),
            partial: Vec::new(),
            out: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    /// Reads one complete response, literals included.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();
        loop {
            let line = self.read_line().await?;
            let literal = literal_length(&line);
            response.extend_from_slice(&line);
            let Some(len) = literal else {
                return Ok(response);
            };
            if len > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                )));
            }
            let start = response.len();
            response.resize(start + len, 0);
            self.reader.read_exact(&mut response[start..]).await?;
        }
    }

    /// Reads responses until the tagged completion for `tag`, returning all
    /// of them in arrival order.
    pub async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Vec<u8>>> {
        let mut responses = Vec::new();
        loop {
            let response = self.read_response().await?;
            let done = is_tagged(&response, tag);
            responses.push(response);
            if done {
                return Ok(responses);
            }
        }
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::ConnectionClosed);
            }
            // The CR may already sit at the end of `partial`.
            let search_from = self.partial.len().saturating_sub(1);
            self.partial.extend_from_slice(buf);
            let consumed = buf.len();
            if let Some(pos) = find_crlf(&self.partial[search_from..]) {
                let end = search_from + pos + 2;
                let overshoot = self.partial.len() - end;
                self.reader.consume(consumed - overshoot);
                self.partial.truncate(end);
                return Ok(std::mem::take(&mut self.partial));
            }
            self.reader.consume(consumed);
            if self.partial.len() > MAX_LINE_LENGTH {
                self.partial.clear();
                return Err(Error::Protocol("line too long".to_string()));
            }
        }
    }

    /// Writes a serialized command and flushes.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        self.out.clear();
        self.out.extend_from_slice(data);
        let stream = self.reader.get_mut();
        stream.write_all(&self.out).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Writes literal payload bytes and flushes.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Shuts down the write half.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.reader.get_mut().shutdown().await
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn is_tagged(response: &[u8], tag: &str) -> bool {
    response.strip_prefix(tag.as_bytes()).is_some_and(|rest| rest.first() == Some(&b' '))
}

/// Length of the `{n}` or `{n+}` literal announced at the end of `line`.
fn literal_length(line: &[u8]) -> Option<usize> {
    let body = line.strip_suffix(b"\r\n")?.strip_suffix(b"}")?;
    let body = body.strip_suffix(b"+").unwrap_or(body);
    let open = body.iter().rposition(|&b| b == b'{')?;
    let digits = &body[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
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
    use tokio_test::io::Builder;

    use super::*;

    #[test]
    fn literal_markers() {
        assert_eq!(literal_length(b"* 1 FETCH (BODY[] {123}\r\n"), Some(123));
        assert_eq!(literal_length(b"A1 APPEND INBOX {9+}\r\n"), Some(9));
        assert_eq!(literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(literal_length(b"* OK done\r\n"), None);
        assert_eq!(literal_length(b"* OK {abc}\r\n"), None);
        assert_eq!(literal_length(b"* OK {}\r\n"), None);
        assert_eq!(literal_length(b"{12}"), None);
    }

    #[test]
    fn tag_match_requires_space() {
        assert!(is_tagged(b"A0001 OK done\r\n", "A0001"));
        assert!(!is_tagged(b"A00011 OK done\r\n", "A0001"));
        assert!(!is_tagged(b"* OK\r\n", "A0001"));
    }

    #[tokio::test]
    async fn reads_line_split_across_reads() {
        let mock = Builder::new().read(b"* OK re").read(b"ady\r").read(b"\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_response().await.unwrap(), b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn keeps_bytes_after_line() {
        let mock = Builder::new().read(b"* 1 EXISTS\r\n* 2 EXISTS\r\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_response().await.unwrap(), b"* 1 EXISTS\r\n");
        assert_eq!(framed.read_response().await.unwrap(), b"* 2 EXISTS\r\n");
    }

    #[tokio::test]
    async fn reads_embedded_literal() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (UID 4 BODY[] {5}\r\n")
            .read(b"hel")
            .read(b"lo)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(
            framed.read_response().await.unwrap(),
            b"* 1 FETCH (UID 4 BODY[] {5}\r\nhello)\r\n"
        );
    }

    #[tokio::test]
    async fn collects_until_tagged() {
        let mock = Builder::new()
            .read(b"* SEARCH 3 4\r\n")
            .read(b"A0002 OK SEARCH completed\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        let responses = framed.read_until_tagged("A0002").await.unwrap();
        assert_eq!(responses.len(), 2);
    }

    #[tokio::test]
    async fn eof_is_connection_closed() {
        let mock = Builder::new().read(b"* OK partial").build();
        let mut framed = FramedStream::new(mock);
        assert!(matches!(framed.read_response().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn rejects_oversized_literal() {
        let header = format!("* 1 FETCH (BODY[] {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);
        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("literal too large"));
    }

    #[tokio::test]
    async fn rejects_endless_line() {
        let line = vec![b'x'; MAX_LINE_LENGTH + 10];
        let mock = Builder::new().read(&line).build();
        let mut framed = FramedStream::new(mock);
        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("line too long"));
    }

    #[tokio::test]
    async fn writes_command() {
        let mock = Builder::new().write(b"A0001 NOOP\r\n").build();
        let mut framed = FramedStream::new(mock);
        framed.write_command(b"A0001 NOOP\r\n").await.unwrap();
    }
}
