//! Server-side SMTP session.
//!
//! One [`Session`] serves one client connection. Completed transactions are
//! handed to a [`DeliveryHandler`], whose reply is sent back after the
//! final dot.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::command::{Command, Extension};
use crate::error::{Error, Result};
use crate::parser::parse_command;
use crate::types::{Envelope, Reply, ReplyCode};

/// Longest command line read before giving up on the client.
const MAX_COMMAND_LINE: u64 = 4096;
/// Chunk size when reading DATA; longer lines are read in pieces.
const MAX_DATA_LINE: u64 = 64 * 1024;
/// Recipients accepted per transaction.
const MAX_RECIPIENTS: usize = 100;

/// Receives completed transactions.
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Takes a message whose DATA was fully received. The reply is sent
    /// to the client as the answer to the final dot.
    fn deliver(&self, envelope: &Envelope, data: &[u8]) -> impl Future<Output = Reply> + Send;
}

/// Settings shared by every session.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name used in the greeting and EHLO reply.
    pub hostname: String,
    /// Largest DATA accepted, in bytes.
    pub max_message_size: usize,
    /// How long to wait for the next command or DATA line.
    pub command_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "mailward".to_string(),
            max_message_size: 10 * 1024 * 1024,
            command_timeout: Duration::from_secs(300),
        }
    }
}

impl ServerConfig {
    fn extensions(&self) -> [Extension; 3] {
        [Extension::Size(self.max_message_size), Extension::EightBitMime, Extension::Pipelining]
    }
}

/// Where the client is in the dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Greeting sent, no HELO/EHLO yet.
    Connected,
    /// HELO/EHLO accepted, no transaction open.
    Greeted,
    /// MAIL accepted.
    Mail,
    /// At least one RCPT accepted.
    Rcpt,
}

/// One client connection.
pub struct Session<S, H> {
    stream: BufReader<S>,
    config: Arc<ServerConfig>,
    handler: Arc<H>,
    state: SessionState,
    envelope: Envelope,
}

impl<S, H> Session<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: DeliveryHandler,
{
    /// Wraps an accepted stream.
    pub fn new(stream: S, config: Arc<ServerConfig>, handler: Arc<H>, peer: Option<SocketAddr>) -> Self {
        Self {
            stream: BufReader::new(stream),
            config,
            handler,
            state: SessionState::Connected,
            envelope: Envelope { peer, ..Envelope::default() },
        }
    }

    /// Current dialogue state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the dialogue until QUIT, EOF or a timeout.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or when the client sends an
    /// over-long command line.
    pub async fn run(mut self) -> Result<()> {
        let greeting = Reply::line(ReplyCode::SERVICE_READY, format!("{} ESMTP", self.config.hostname));
        self.send(&greeting).await?;

        let mut line = Vec::new();
        loop {
            line.clear();
            let Some(n) = self.read_line(&mut line, MAX_COMMAND_LINE).await? else {
                let bye = Reply::line(
                    ReplyCode::SERVICE_UNAVAILABLE,
                    format!("{} Timeout waiting for command", self.config.hostname),
                );
                self.send(&bye).await?;
                return Ok(());
            };
            if n == 0 {
                tracing::debug!(peer = ?self.envelope.peer, "client closed connection");
                return Ok(());
            }
            if !line.ends_with(b"\n") && n >= MAX_COMMAND_LINE as usize {
                self.send(&Reply::line(ReplyCode::SYNTAX_ERROR, "Line too long")).await?;
                return Err(Error::Protocol("command line too long".into()));
            }

            let text = String::from_utf8_lossy(&line);
            let command = match parse_command(&text) {
                Ok(command) => command,
                Err(e) => {
                    tracing::debug!(line = %text.trim_end(), error = %e, "rejected command");
                    self.send(&Reply::from(e)).await?;
                    continue;
                }
            };
            tracing::debug!(verb = command.verb(), state = ?self.state, "command");

            if command == Command::Quit {
                let bye = Reply::line(
                    ReplyCode::CLOSING,
                    format!("{} Service closing transmission channel", self.config.hostname),
                );
                self.send(&bye).await?;
                return Ok(());
            }
            let reply = self.handle(command).await?;
            self.send(&reply).await?;
        }
    }

    async fn handle(&mut self, command: Command) -> Result<Reply> {
        let reply = match command {
            Command::Helo { hostname } => {
                self.greet(hostname);
                Reply::line(ReplyCode::OK, self.config.hostname.clone())
            }
            Command::Ehlo { hostname } => {
                self.greet(hostname);
                let mut lines = vec![self.config.hostname.clone()];
                lines.extend(self.config.extensions().iter().map(ToString::to_string));
                Reply::new(ReplyCode::OK, lines)
            }
            Command::MailFrom { from, size } => match self.state {
                SessionState::Connected => bad_sequence("Send HELO/EHLO first"),
                SessionState::Mail | SessionState::Rcpt => bad_sequence("Nested MAIL command"),
                SessionState::Greeted => {
                    if let Some(size) = size
                        && size > self.config.max_message_size
                    {
                        Reply::from(Error::MessageTooLarge(size))
                    } else {
                        self.envelope.mail_from = from;
                        self.envelope.rcpt_to.clear();
                        self.state = SessionState::Mail;
                        Reply::ok()
                    }
                }
            },
            Command::RcptTo { to } => match self.state {
                SessionState::Mail | SessionState::Rcpt => {
                    if self.envelope.rcpt_to.len() >= MAX_RECIPIENTS {
                        Reply::line(ReplyCode::INSUFFICIENT_STORAGE, "Too many recipients")
                    } else {
                        self.envelope.rcpt_to.push(to);
                        self.state = SessionState::Rcpt;
                        Reply::ok()
                    }
                }
                _ => bad_sequence("Need MAIL before RCPT"),
            },
            Command::Data => {
                if self.state == SessionState::Rcpt {
                    return self.data().await;
                }
                bad_sequence("Need RCPT before DATA")
            }
            Command::Rset => {
                self.reset();
                Reply::ok()
            }
            Command::Noop => Reply::ok(),
            Command::Quit => Reply::line(ReplyCode::CLOSING, "Bye"),
        };
        Ok(reply)
    }

    fn greet(&mut self, hostname: String) {
        self.envelope.helo = Some(hostname);
        self.envelope.reset();
        self.state = SessionState::Greeted;
    }

    fn reset(&mut self) {
        self.envelope.reset();
        if self.state != SessionState::Connected {
            self.state = SessionState::Greeted;
        }
    }

    async fn data(&mut self) -> Result<Reply> {
        self.send(&Reply::line(ReplyCode::START_DATA, "End data with <CR><LF>.<CR><LF>")).await?;

        let max = self.config.max_message_size;
        let mut data = Vec::new();
        let mut chunk = Vec::new();
        let mut at_line_start = true;
        let mut too_large = false;

        loop {
            chunk.clear();
            let Some(n) = self.read_line(&mut chunk, MAX_DATA_LINE).await? else {
                return Err(Error::Protocol("timeout during DATA".into()));
            };
            if n == 0 {
                return Err(Error::Protocol("connection closed during DATA".into()));
            }
            if at_line_start && (chunk == b".\r\n" || chunk == b".\n") {
                break;
            }
            let piece = if at_line_start && chunk.starts_with(b".") { &chunk[1..] } else { &chunk[..] };
            at_line_start = chunk.ends_with(b"\n");

            // Keep reading to the dot so the client stays in sync.
            if too_large || data.len() + piece.len() > max {
                too_large = true;
                continue;
            }
            data.extend_from_slice(piece);
        }

        let reply = if too_large {
            tracing::warn!(peer = ?self.envelope.peer, limit = max, "message over size limit");
            Reply::from(Error::MessageTooLarge(max))
        } else {
            tracing::debug!(bytes = data.len(), recipients = self.envelope.rcpt_to.len(), "DATA complete");
            self.handler.deliver(&self.envelope, &data).await
        };
        self.reset();
        Ok(reply)
    }

    /// Reads up to `limit` bytes through the next LF. `None` on timeout.
    async fn read_line(&mut self, buf: &mut Vec<u8>, limit: u64) -> Result<Option<usize>> {
        let mut limited = (&mut self.stream).take(limit);
        match tokio::time::timeout(self.config.command_timeout, limited.read_until(b'\n', buf)).await {
            Ok(n) => Ok(Some(n?)),
            Err(_) => Ok(None),
        }
    }

    async fn send(&mut self, reply: &Reply) -> Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(&reply.to_wire()).await?;
        stream.flush().await?;
        Ok(())
    }
}

fn bad_sequence(text: &str) -> Reply {
    Reply::line(ReplyCode::BAD_SEQUENCE, text)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use std::sync::Mutex;

    use tokio_test::io::Builder;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<Vec<(Envelope, Vec<u8>)>>,
    }

    impl DeliveryHandler for Recorder {
        async fn deliver(&self, envelope: &Envelope, data: &[u8]) -> Reply {
            self.delivered.lock().unwrap().push((envelope.clone(), data.to_vec()));
            Reply::line(ReplyCode::OK, "Message accepted for delivery")
        }
    }

    fn config(max: usize) -> Arc<ServerConfig> {
        Arc::new(ServerConfig { hostname: "mx.test".into(), max_message_size: max, ..ServerConfig::default() })
    }

    async fn run(mock: tokio_test::io::Mock, max: usize) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        Session::new(mock, config(max), Arc::clone(&recorder), None).run().await.unwrap();
        recorder
    }

    #[tokio::test]
    async fn ehlo_advertises_extensions() {
        let mock = Builder::new()
            .write(b"220 mx.test ESMTP\r\n")
            .read(b"EHLO client\r\n")
            .write(b"250-mx.test\r\n250-SIZE 2048\r\n250-8BITMIME\r\n250 PIPELINING\r\n")
            .read(b"QUIT\r\n")
            .write(b"221 mx.test Service closing transmission channel\r\n")
            .build();
        let recorder = run(mock, 2048).await;
        assert!(recorder.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_transaction_unstuffs_dots() {
        let mock = Builder::new()
            .write(b"220 mx.test ESMTP\r\n")
            .read(b"HELO client\r\n")
            .write(b"250 mx.test\r\n")
            .read(b"MAIL FROM:<alice@example.com>\r\n")
            .write(b"250 OK\r\n")
            .read(b"RCPT TO:<bob@example.com>\r\n")
            .write(b"250 OK\r\n")
            .read(b"RCPT TO:<carol@example.com>\r\n")
            .write(b"250 OK\r\n")
            .read(b"DATA\r\n")
            .write(b"354 End data with <CR><LF>.<CR><LF>\r\n")
            .read(b"Subject: hi\r\n\r\n..leading dot\r\nbody\r\n.\r\n")
            .write(b"250 Message accepted for delivery\r\n")
            .read(b"QUIT\r\n")
            .write(b"221 mx.test Service closing transmission channel\r\n")
            .build();
        let recorder = run(mock, 1024).await;

        let delivered = recorder.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let (envelope, data) = &delivered[0];
        assert_eq!(envelope.helo.as_deref(), Some("client"));
        assert_eq!(envelope.sender(), "alice@example.com");
        assert_eq!(envelope.recipients(), vec!["bob@example.com", "carol@example.com"]);
        assert_eq!(data.as_slice(), b"Subject: hi\r\n\r\n.leading dot\r\nbody\r\n");
    }

    #[tokio::test]
    async fn pipelined_commands() {
        let mock = Builder::new()
            .write(b"220 mx.test ESMTP\r\n")
            .read(b"EHLO c\r\n")
            .write(b"250-mx.test\r\n250-SIZE 100\r\n250-8BITMIME\r\n250 PIPELINING\r\n")
            .read(b"MAIL FROM:<>\r\nRCPT TO:<x@y.z>\r\nDATA\r\n")
            .write(b"250 OK\r\n")
            .write(b"250 OK\r\n")
            .write(b"354 End data with <CR><LF>.<CR><LF>\r\n")
            .read(b"hi\r\n.\r\n")
            .write(b"250 Message accepted for delivery\r\n")
            .build();
        let recorder = run(mock, 100).await;
        let delivered = recorder.delivered.lock().unwrap();
        assert_eq!(delivered[0].0.mail_from, None);
        assert_eq!(delivered[0].1.as_slice(), b"hi\r\n");
    }

    #[tokio::test]
    async fn out_of_order_commands_get_503() {
        let mock = Builder::new()
            .write(b"220 mx.test ESMTP\r\n")
            .read(b"MAIL FROM:<a@b.c>\r\n")
            .write(b"503 Send HELO/EHLO first\r\n")
            .read(b"HELO c\r\n")
            .write(b"250 mx.test\r\n")
            .read(b"RCPT TO:<a@b.c>\r\n")
            .write(b"503 Need MAIL before RCPT\r\n")
            .read(b"MAIL FROM:<a@b.c>\r\n")
            .write(b"250 OK\r\n")
            .read(b"DATA\r\n")
            .write(b"503 Need RCPT before DATA\r\n")
            .read(b"MAIL FROM:<a@b.c>\r\n")
            .write(b"503 Nested MAIL command\r\n")
            .read(b"RSET\r\n")
            .write(b"250 OK\r\n")
            .read(b"DATA\r\n")
            .write(b"503 Need RCPT before DATA\r\n")
            .read(b"QUIT\r\n")
            .write(b"221 mx.test Service closing transmission channel\r\n")
            .build();
        run(mock, 100).await;
    }

    #[tokio::test]
    async fn unknown_commands_get_502() {
        let mock = Builder::new()
            .write(b"220 mx.test ESMTP\r\n")
            .read(b"STARTTLS\r\n")
            .write(b"502 Command not implemented\r\n")
            .read(b"NOOP\r\n")
            .write(b"250 OK\r\n")
            .build();
        run(mock, 100).await;
    }

    #[tokio::test]
    async fn oversize_data_gets_552_and_session_continues() {
        let mock = Builder::new()
            .write(b"220 mx.test ESMTP\r\n")
            .read(b"HELO c\r\n")
            .write(b"250 mx.test\r\n")
            .read(b"MAIL FROM:<a@b.c>\r\n")
            .write(b"250 OK\r\n")
            .read(b"RCPT TO:<d@e.f>\r\n")
            .write(b"250 OK\r\n")
            .read(b"DATA\r\n")
            .write(b"354 End data with <CR><LF>.<CR><LF>\r\n")
            .read(b"0123456789\r\n0123456789\r\n.\r\n")
            .write(b"552 Message exceeds fixed maximum message size\r\n")
            .read(b"MAIL FROM:<a@b.c> SIZE=500\r\n")
            .write(b"552 Message exceeds fixed maximum message size\r\n")
            .read(b"QUIT\r\n")
            .write(b"221 mx.test Service closing transmission channel\r\n")
            .build();
        let recorder = run(mock, 16).await;
        assert!(recorder.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn eof_during_data_is_an_error() {
        let mock = Builder::new()
            .write(b"220 mx.test ESMTP\r\n")
            .read(b"HELO c\r\nMAIL FROM:<a@b.c>\r\nRCPT TO:<d@e.f>\r\nDATA\r\n")
            .write(b"250 mx.test\r\n250 OK\r\n250 OK\r\n354 End data with <CR><LF>.<CR><LF>\r\n")
            .read(b"partial")
            .build();
        let recorder = Arc::new(Recorder::default());
        let result = Session::new(mock, config(100), Arc::clone(&recorder), None).run().await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
