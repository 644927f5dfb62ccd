//! Type-state markers.
//!
//! `NotAuthenticated → Authenticated → Selected`. Commands valid in both
//! authenticated states (LIST, CREATE, APPEND) are gated on [`Session`].

/// Connected, greeting read, not logged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Logged in, no mailbox selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// Logged in with a mailbox selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Selected;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Authenticated {}
    impl Sealed for super::Selected {}
}

/// States in which the user is logged in.
pub trait Session: sealed::Sealed {}

impl Session for Authenticated {}
impl Session for Selected {}
