//! Command tags.

use std::sync::atomic::{AtomicU32, Ordering};

/// Produces `A0001`, `A0002`, ... for one connection.
///
/// The counter wraps instead of panicking; a tag only has to be unique among
/// the commands in flight, and a session never has billions of those.
#[derive(Debug)]
pub struct TagGenerator {
    prefix: char,
    counter: AtomicU32,
}

impl TagGenerator {
    /// Creates a generator whose tags start with `prefix`.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self {
            prefix,
            counter: AtomicU32::new(1),
        }
    }

    /// Returns the next tag.
    #[must_use]
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{n:04}", self.prefix)
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
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
    fn sequential_tags() {
        let tags = TagGenerator::default();
        assert_eq!(tags.next(), "A0001");
        assert_eq!(tags.next(), "A0002");
    }

    #[test]
    fn custom_prefix_and_width() {
        let tags = TagGenerator::new('W');
        for _ in 0..9999 {
            let _ = tags.next();
        }
        assert_eq!(tags.next(), "W10000");
    }

    #[test]
    fn wraps_without_panic() {
        let tags = TagGenerator::new('A');
        tags.counter.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(tags.next(), format!("A{}", u32::MAX));
        assert_eq!(tags.next(), "A0000");
    }
}
