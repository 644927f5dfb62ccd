//! Attachment extraction, staging and the release plan.
//!
//! Originals are extracted from the stored MIME the first time anything
//! asks for them. Reviewer changes are recorded in a [`Manifest`] and
//! resolved into a [`Plan`] at release time.

mod extract;
mod manifest;
mod plan;

pub use extract::{ensure_originals, sanitize_filename, stage};
pub use manifest::{Manifest, ManifestAction, ManifestItem};
pub use plan::{Plan, build_plan};
