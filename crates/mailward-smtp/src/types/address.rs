//! Envelope addresses.

use crate::error::{Error, Result};

/// A forward- or reverse-path address from `MAIL FROM` / `RCPT TO`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Validates and wraps an address.
    ///
    /// # Errors
    ///
    /// Returns an error unless the address has exactly one `@` with
    /// non-empty local and domain parts and no whitespace.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased domain part.
    #[must_use]
    pub fn domain(&self) -> String {
        self.0.rsplit_once('@').map(|(_, d)| d.to_ascii_lowercase()).unwrap_or_default()
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("address cannot be empty".into()));
        }
        if addr.contains(char::is_whitespace) || addr.contains(['<', '>']) {
            return Err(Error::InvalidAddress(format!("malformed address: {addr}")));
        }
        let Some((local, domain)) = addr.rsplit_once('@') else {
            return Err(Error::InvalidAddress("address must contain @".into()));
        };
        // A quoted local part may legally contain `@`.
        if !local.starts_with('"') && local.contains('@') {
            return Err(Error::InvalidAddress("address must have exactly one @".into()));
        }
        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress("local and domain parts cannot be empty".into()));
        }
        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert_eq!(Address::new("a@Example.ORG").unwrap().domain(), "example.org");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in ["", "userexample.com", "@example.com", "user@", "a@b@c", "a b@c", "<a@b>"] {
            assert!(Address::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_quoted_local_part() {
        assert!(Address::new("\"odd@local\"@example.com").is_ok());
    }
}
