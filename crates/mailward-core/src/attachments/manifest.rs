use serde::{Deserialize, Serialize};
use tracing::warn;

/// What a manifest item asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestAction {
    /// Attach a staged file.
    Add,
    /// Drop an original.
    Remove,
    /// Swap an original for a staged file.
    Replace,
}

/// One reviewer change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    /// Requested change.
    pub action: ManifestAction,
    /// Original attachment id, for remove and replace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aid: Option<i64>,
    /// Staged attachment id, for add and replace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_ref: Option<i64>,
}

/// Pending attachment changes for a held message, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Changes in the order they were made.
    #[serde(default)]
    pub items: Vec<ManifestItem>,
    /// When the manifest was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Manifest {
    /// Reads the stored JSON. A missing or unreadable manifest is empty.
    #[must_use]
    pub fn from_stored(json: Option<&str>) -> Self {
        let Some(json) = json.filter(|j| !j.trim().is_empty()) else {
            return Self::default();
        };
        serde_json::from_str(json).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable attachment manifest");
            Self::default()
        })
    }

    /// True if no changes are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
