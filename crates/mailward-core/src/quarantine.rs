//! Picks the folder held messages are moved into.
//!
//! Servers disagree on where user folders may live: some allow top-level
//! names, others only accept children of INBOX, with `/` or `.` as the
//! separator. The resolver tries the plausible spellings in order and keeps
//! the first one it can select.

use tracing::{debug, info, warn};

use crate::Result;
use crate::config::QuarantinePreference;
use crate::watcher::Mailbox;

/// Folder name used when an account has none configured.
pub const DEFAULT_QUARANTINE: &str = "Quarantine";

/// Candidate folder names, best first, without duplicates.
#[must_use]
pub fn candidates(base: &str, delimiter: Option<char>, preference: QuarantinePreference) -> Vec<String> {
    let base = base_or_default(base);
    let mut nested = vec![format!("INBOX/{base}"), format!("INBOX.{base}")];
    if let Some(delim @ ('/' | '.')) = delimiter {
        let preferred = format!("INBOX{delim}{base}");
        nested.retain(|c| *c != preferred);
        nested.insert(0, preferred);
    }

    let ordered = match preference {
        QuarantinePreference::Auto => std::iter::once(base.to_string()).chain(nested).collect::<Vec<_>>(),
        QuarantinePreference::Inbox => nested.into_iter().chain(std::iter::once(base.to_string())).collect(),
    };

    let mut out: Vec<String> = Vec::with_capacity(ordered.len());
    for candidate in ordered {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

fn base_or_default(base: &str) -> &str {
    let base = base.trim();
    if base.is_empty() { DEFAULT_QUARANTINE } else { base }
}

/// Finds or creates the quarantine folder and reselects INBOX.
///
/// Each candidate is selected, or created and then selected. When nothing
/// works `INBOX.{base}` is returned so the move routine still has a target.
///
/// # Errors
///
/// Returns an error only if INBOX cannot be reselected afterwards.
pub async fn resolve<M: Mailbox>(mailbox: &mut M, base: &str, preference: QuarantinePreference) -> Result<String> {
    let delimiter = match mailbox.delimiter().await {
        Ok(delimiter) => delimiter,
        Err(e) => {
            warn!(error = %e, "LIST for hierarchy delimiter failed");
            None
        }
    };

    let mut resolved = None;
    for candidate in candidates(base, delimiter, preference) {
        if mailbox.select(&candidate).await.is_ok() {
            resolved = Some(candidate);
            break;
        }
        match mailbox.create(&candidate).await {
            Ok(()) if mailbox.select(&candidate).await.is_ok() => {
                info!(folder = %candidate, "Created quarantine folder");
                resolved = Some(candidate);
                break;
            }
            Ok(()) => debug!(folder = %candidate, "Created but could not select"),
            Err(e) => debug!(folder = %candidate, error = %e, "Quarantine candidate rejected"),
        }
    }

    let folder = resolved.unwrap_or_else(|| {
        let fallback = format!("INBOX.{}", base_or_default(base));
        warn!(folder = %fallback, "No quarantine candidate usable, using fallback");
        fallback
    });

    mailbox.select("INBOX").await?;
    Ok(folder)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::watcher::fake::{FakeMailbox, FakeServer};

    #[test]
    fn test_candidates_default_order() {
        assert_eq!(
            candidates("Quarantine", None, QuarantinePreference::Auto),
            vec!["Quarantine", "INBOX/Quarantine", "INBOX.Quarantine"]
        );
    }

    #[test]
    fn test_candidates_follow_delimiter() {
        assert_eq!(
            candidates("Quarantine", Some('.'), QuarantinePreference::Auto),
            vec!["Quarantine", "INBOX.Quarantine", "INBOX/Quarantine"]
        );
        assert_eq!(
            candidates("Held", Some('.'), QuarantinePreference::Inbox),
            vec!["INBOX.Held", "INBOX/Held", "Held"]
        );
        assert_eq!(
            candidates(" ", Some('|'), QuarantinePreference::Auto),
            vec!["Quarantine", "INBOX/Quarantine", "INBOX.Quarantine"]
        );
    }

    #[tokio::test]
    async fn test_resolve_uses_existing_folder() {
        let server = FakeServer::shared();
        server.lock().unwrap().deliver("INBOX/Quarantine", b"Subject: old\r\n\r\n");
        server.lock().unwrap().deny_create.insert("Quarantine".into());
        let mut mailbox = FakeMailbox::open(server.clone());

        let folder = resolve(&mut mailbox, "Quarantine", QuarantinePreference::Auto).await.unwrap();
        assert_eq!(folder, "INBOX/Quarantine");
        // INBOX is selected again.
        server.lock().unwrap().deliver("INBOX", b"Subject: new\r\n\r\n");
        assert_eq!(mailbox.uid_search_all().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_resolve_creates_first_allowed_candidate() {
        let server = FakeServer::shared();
        {
            let mut s = server.lock().unwrap();
            s.delimiter = Some('.');
            s.deny_create.insert("Quarantine".into());
        }
        let mut mailbox = FakeMailbox::open(server.clone());

        let folder = resolve(&mut mailbox, "Quarantine", QuarantinePreference::Auto).await.unwrap();
        assert_eq!(folder, "INBOX.Quarantine");
        assert!(server.lock().unwrap().folders.contains_key("INBOX.Quarantine"));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_when_nothing_works() {
        let server = FakeServer::shared();
        {
            let mut s = server.lock().unwrap();
            for name in ["Quarantine", "INBOX/Quarantine", "INBOX.Quarantine"] {
                s.deny_create.insert(name.into());
            }
        }
        let mut mailbox = FakeMailbox::open(server);
        let folder = resolve(&mut mailbox, "Quarantine", QuarantinePreference::Auto).await.unwrap();
        assert_eq!(folder, "INBOX.Quarantine");
    }
}
