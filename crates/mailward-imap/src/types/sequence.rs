//! UID sets as sent in `UID FETCH`, `UID MOVE` and friends.

use std::fmt;

use super::Uid;

/// A set of UIDs in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UidSet {
    /// `n`
    Single(Uid),
    /// `a:b`
    Range(Uid, Uid),
    /// `a:*`
    From(Uid),
    /// Comma-separated runs, each `(start, end)` inclusive.
    Runs(Vec<(Uid, Uid)>),
}

impl UidSet {
    /// Builds the most compact set covering exactly `uids`.
    ///
    /// Input order and duplicates do not matter. Returns `None` for an empty
    /// slice since an empty set cannot be expressed on the wire.
    #[must_use]
    pub fn from_uids(uids: &[Uid]) -> Option<Self> {
        let mut sorted = uids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut runs: Vec<(Uid, Uid)> = Vec::new();
        for uid in sorted {
            match runs.last_mut() {
                Some((_, end)) if end.get().checked_add(1) == Some(uid.get()) => *end = uid,
                _ => runs.push((uid, uid)),
            }
        }

        match runs.as_slice() {
            [] => None,
            [(a, b)] if a == b => Some(Self::Single(*a)),
            [(a, b)] => Some(Self::Range(*a, *b)),
            _ => Some(Self::Runs(runs)),
        }
    }
}

impl From<Uid> for UidSet {
    fn from(uid: Uid) -> Self {
        Self::Single(uid)
    }
}

impl fmt::Display for UidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(uid) => write!(f, "{uid}"),
            Self::Range(a, b) => write!(f, "{a}:{b}"),
            Self::From(a) => write!(f, "{a}:*"),
            Self::Runs(runs) => {
                for (i, (a, b)) in runs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if a == b {
                        write!(f, "{a}")?;
                    } else {
                        write!(f, "{a}:{b}")?;
                    }
                }
                Ok(())
            }
        }
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

    fn uids(raw: &[u32]) -> Vec<Uid> {
        raw.iter().map(|&n| Uid::new(n).unwrap()).collect()
    }

    #[test]
    fn empty_has_no_set() {
        assert!(UidSet::from_uids(&[]).is_none());
    }

    #[test]
    fn single_uid() {
        let set = UidSet::from_uids(&uids(&[42])).unwrap();
        assert_eq!(set.to_string(), "42");
    }

    #[test]
    fn contiguous_run_becomes_range() {
        let set = UidSet::from_uids(&uids(&[5, 3, 4, 6])).unwrap();
        assert_eq!(set, UidSet::Range(Uid::new(3).unwrap(), Uid::new(6).unwrap()));
        assert_eq!(set.to_string(), "3:6");
    }

    #[test]
    fn gaps_split_runs() {
        let set = UidSet::from_uids(&uids(&[1, 2, 3, 7, 9, 10, 9])).unwrap();
        assert_eq!(set.to_string(), "1:3,7,9:10");
    }

    #[test]
    fn open_range() {
        assert_eq!(UidSet::From(Uid::new(151).unwrap()).to_string(), "151:*");
    }

    #[test]
    fn max_uid_does_not_overflow() {
        let set = UidSet::from_uids(&uids(&[u32::MAX - 1, u32::MAX])).unwrap();
        assert_eq!(set.to_string(), format!("{}:{}", u32::MAX - 1, u32::MAX));
    }
}
