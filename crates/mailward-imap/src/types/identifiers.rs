//! Numeric message identifiers.
//!
//! Sequence numbers shift as messages are expunged; UIDs are stable for the
//! lifetime of a `UIDVALIDITY` epoch. Both are non-zero on the wire.

use std::fmt;
use std::num::NonZeroU32;

/// Message sequence number (position in the selected mailbox).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNum(NonZeroU32);

impl SeqNum {
    /// Creates a sequence number, rejecting zero.
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

/// Message unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(NonZeroU32);

impl Uid {
    /// Creates a UID, rejecting zero.
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

/// `UIDVALIDITY` value of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UidValidity(NonZeroU32);

impl UidValidity {
    /// Creates a validity value, rejecting zero.
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
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
    fn zero_is_rejected() {
        assert!(SeqNum::new(0).is_none());
        assert!(Uid::new(0).is_none());
        assert!(UidValidity::new(0).is_none());
    }

    #[test]
    fn values_round_trip() {
        assert_eq!(SeqNum::new(7).unwrap().get(), 7);
        assert_eq!(Uid::new(u32::MAX).unwrap().get(), u32::MAX);
        assert_eq!(UidValidity::new(3857529045).unwrap().get(), 3857529045);
    }

    #[test]
    fn uids_order_numerically() {
        let mut uids = vec![Uid::new(12).unwrap(), Uid::new(3).unwrap(), Uid::new(7).unwrap()];
        uids.sort();
        let raw: Vec<u32> = uids.into_iter().map(Uid::get).collect();
        assert_eq!(raw, vec![3, 7, 12]);
    }

    #[test]
    fn display_is_plain_number() {
        assert_eq!(Uid::new(42).unwrap().to_string(), "42");
        assert_eq!(SeqNum::new(1).unwrap().to_string(), "1");
    }
}
