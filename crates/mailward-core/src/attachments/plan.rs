//! Resolving originals, staged files and the manifest into what ships.

use std::collections::{HashMap, HashSet};

use super::manifest::{Manifest, ManifestAction};
use crate::store::Attachment;

/// Attachments of the released message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// What goes into the rebuilt message, in order.
    pub attachments: Vec<Attachment>,
    /// Original ids dropped.
    pub removed: Vec<i64>,
    /// Original ids swapped for a staged file.
    pub replaced: Vec<i64>,
    /// Staged ids appended.
    pub added: Vec<i64>,
}

impl Plan {
    /// True if the attachment set differs from the original.
    #[must_use]
    pub fn changed(&self) -> bool {
        !(self.removed.is_empty() && self.replaced.is_empty() && self.added.is_empty())
    }

    /// Inline parts, referenced by `Content-ID`.
    pub fn inline(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(|a| a.is_inline())
    }

    /// Regular attachments.
    pub fn regular(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(|a| !a.is_inline())
    }
}

/// Builds the release plan.
///
/// Originals are walked by id: a replace with a valid staged file wins,
/// then a remove (or `strip_all`), otherwise the original is kept. Adds
/// with a valid staged ref follow.
#[must_use]
pub fn build_plan(originals: &[Attachment], staged: &[Attachment], manifest: &Manifest, strip_all: bool) -> Plan {
    let staged_by_id: HashMap<i64, &Attachment> = staged.iter().map(|a| (a.id, a)).collect();
    let mut removals = HashSet::new();
    let mut replacements = HashMap::new();
    let mut additions = Vec::new();
    for item in &manifest.items {
        match (item.action, item.aid, item.staged_ref) {
            (ManifestAction::Remove, Some(aid), _) => {
                removals.insert(aid);
            }
            (ManifestAction::Replace, Some(aid), Some(sref)) if staged_by_id.contains_key(&sref) => {
                replacements.insert(aid, sref);
            }
            (ManifestAction::Add, _, Some(sref)) if staged_by_id.contains_key(&sref) => additions.push(sref),
            _ => {}
        }
    }

    let mut sorted: Vec<&Attachment> = originals.iter().collect();
    sorted.sort_by_key(|a| a.id);

    let mut plan = Plan::default();
    let mut used = HashSet::new();
    for original in sorted {
        if let Some(replacement) = replacements.get(&original.id).and_then(|sref| staged_by_id.get(sref)) {
            let mut replacement = (*replacement).clone();
            // Keep the slot the original occupied, inline references included.
            replacement.disposition.clone_from(&original.disposition);
            if replacement.content_id.is_none() {
                replacement.content_id.clone_from(&original.content_id);
            }
            used.insert(replacement.id);
            plan.replaced.push(original.id);
            plan.attachments.push(replacement);
        } else if strip_all || removals.contains(&original.id) {
            plan.removed.push(original.id);
        } else {
            plan.attachments.push(original.clone());
        }
    }

    for sref in additions {
        if used.insert(sref)
            && let Some(staged) = staged_by_id.get(&sref)
        {
            plan.attachments.push((*staged).clone());
            plan.added.push(sref);
        }
    }
    plan
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::attachments::ManifestItem;

    fn attachment(id: i64, name: &str, original: bool) -> Attachment {
        Attachment {
            id,
            email_id: 1,
            filename: name.to_string(),
            mime_type: "application/octet-stream".into(),
            size: 1,
            sha256: String::new(),
            disposition: "attachment".into(),
            content_id: None,
            is_original: original,
            is_staged: !original,
            storage_path: format!("/tmp/{name}"),
        }
    }

    fn item(action: ManifestAction, aid: Option<i64>, staged_ref: Option<i64>) -> ManifestItem {
        ManifestItem { action, aid, staged_ref }
    }

    fn names(plan: &Plan) -> Vec<&str> {
        plan.attachments.iter().map(|a| a.filename.as_str()).collect()
    }

    #[test]
    fn test_empty_manifest_keeps_originals_in_id_order() {
        let originals = vec![attachment(2, "b", true), attachment(1, "a", true)];
        let plan = build_plan(&originals, &[], &Manifest::default(), false);
        assert_eq!(names(&plan), vec!["a", "b"]);
        assert!(!plan.changed());
    }

    #[test]
    fn test_remove_replace_and_add() {
        let originals = vec![attachment(1, "a", true), attachment(2, "b", true), attachment(3, "c", true)];
        let staged = vec![attachment(10, "b2", false), attachment(11, "extra", false)];
        let manifest = Manifest {
            items: vec![
                item(ManifestAction::Remove, Some(1), None),
                item(ManifestAction::Replace, Some(2), Some(10)),
                item(ManifestAction::Add, None, Some(11)),
                item(ManifestAction::Add, None, Some(99)),
            ],
            updated_at: None,
        };
        let plan = build_plan(&originals, &staged, &manifest, false);
        assert_eq!(names(&plan), vec!["b2", "c", "extra"]);
        assert_eq!(plan.removed, vec![1]);
        assert_eq!(plan.replaced, vec![2]);
        assert_eq!(plan.added, vec![11]);
        assert!(plan.changed());
    }

    #[test]
    fn test_strip_all_keeps_replacements_and_additions() {
        let originals = vec![attachment(1, "a", true), attachment(2, "b", true)];
        let staged = vec![attachment(10, "b2", false)];
        let manifest = Manifest { items: vec![item(ManifestAction::Replace, Some(2), Some(10))], updated_at: None };
        let plan = build_plan(&originals, &staged, &manifest, true);
        assert_eq!(names(&plan), vec!["b2"]);
        assert_eq!(plan.removed, vec![1]);
    }

    #[test]
    fn test_replacement_inherits_inline_slot() {
        let mut logo = attachment(1, "logo.png", true);
        logo.disposition = "inline".into();
        logo.content_id = Some("logo@x".into());
        let staged = vec![attachment(5, "logo2.png", false)];
        let manifest = Manifest { items: vec![item(ManifestAction::Replace, Some(1), Some(5))], updated_at: None };
        let plan = build_plan(&[logo], &staged, &manifest, false);
        assert_eq!(plan.inline().count(), 1);
        assert_eq!(plan.attachments[0].content_id.as_deref(), Some("logo@x"));
        assert_eq!(plan.regular().count(), 0);
    }

    #[test]
    fn test_replace_with_unknown_staged_ref_keeps_original() {
        let originals = vec![attachment(1, "a", true)];
        let manifest = Manifest { items: vec![item(ManifestAction::Replace, Some(1), Some(42))], updated_at: None };
        let plan = build_plan(&originals, &[], &manifest, false);
        assert_eq!(names(&plan), vec!["a"]);
        assert!(!plan.changed());
    }
}
