//! The SMTP envelope of one transaction.

use std::net::SocketAddr;

use super::Address;

/// Envelope of a transaction: who said hello, the reverse path and the
/// accepted recipients in RCPT order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Name given in HELO/EHLO.
    pub helo: Option<String>,
    /// `MAIL FROM`; `None` for the null reverse path `<>`.
    pub mail_from: Option<Address>,
    /// Accepted `RCPT TO` addresses.
    pub rcpt_to: Vec<Address>,
    /// Remote socket, when known.
    pub peer: Option<SocketAddr>,
}

impl Envelope {
    /// Sender as text, empty for the null reverse path.
    #[must_use]
    pub fn sender(&self) -> &str {
        self.mail_from.as_ref().map_or("", Address::as_str)
    }

    /// Recipients as owned strings.
    #[must_use]
    pub fn recipients(&self) -> Vec<String> {
        self.rcpt_to.iter().map(ToString::to_string).collect()
    }

    /// Clears the transaction, keeping HELO and peer.
    pub fn reset(&mut self) {
        self.mail_from = None;
        self.rcpt_to.clear();
    }
}
