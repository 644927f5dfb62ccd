//! Writing attachment files and their rows.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use mailward_mime::{Message, Part};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::Result;
use crate::store::{Attachment, AttachmentKind, NewAttachment, Store};

const MAX_FILENAME: usize = 200;

/// Reduces a client-supplied filename to something safe on disk.
///
/// Directory components are dropped and anything outside `[A-Za-z0-9._ -]`
/// becomes `_`. Returns `None` when nothing usable remains.
#[must_use]
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') { c } else { '_' })
        .take(MAX_FILENAME)
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    (!cleaned.is_empty() && cleaned.chars().any(|c| c != '_')).then(|| cleaned.to_string())
}

fn has_extension(name: &str) -> bool {
    name.rsplit_once('.').is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
}

/// `name`, or `stem_1.ext`, `stem_2.ext`... until unused.
fn dedupe(name: String, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (name.clone(), String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{stem}_{n}{ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn is_extractable(part: &Part) -> bool {
    part.filename().is_some() || part.is_attachment() || part.content_id().is_some()
}

fn file_name_for(part: &Part, index: usize) -> String {
    let content_type = part.content_type();
    let mut name = part
        .filename()
        .and_then(|f| sanitize_filename(&f))
        .unwrap_or_else(|| format!("attachment-{index}"));
    let sub_type = content_type.sub_type.to_ascii_lowercase();
    if !has_extension(&name) && sub_type != "plain" && sub_type != "html" {
        if let Some(ext) = sanitize_filename(&sub_type) {
            name = format!("{name}.{ext}");
        }
    }
    name
}

async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension("tmp");
    tokio::fs::write(&temp, data).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Extracts attachments from `raw` into `root/{email_id}/` unless that
/// already happened, and returns the original rows by id.
///
/// A part counts when it has a filename, an `attachment` disposition or a
/// `Content-ID`.
///
/// # Errors
///
/// Returns an error if the MIME cannot be parsed, a file cannot be written
/// or the store fails.
pub async fn ensure_originals(store: &Store, email_id: i64, raw: &[u8], root: &Path) -> Result<Vec<Attachment>> {
    let existing = store.attachments(email_id, AttachmentKind::Original).await?;
    if !existing.is_empty() {
        return Ok(existing);
    }

    let message = Message::parse(raw)?;
    let dir = root.join(email_id.to_string());
    let mut used = HashSet::new();

    for (i, part) in message.leaves().into_iter().filter(|p| is_extractable(p)).enumerate() {
        let name = dedupe(file_name_for(part, i + 1), &mut used);
        let data = part.decoded()?;
        let path = dir.join(&name);
        write_file(&path, &data).await?;

        let disposition = match part.disposition() {
            Some(d) if d.is_inline() => "inline",
            Some(_) => "attachment",
            None if part.content_id().is_some() => "inline",
            None => "attachment",
        };
        store
            .insert_attachment(&NewAttachment {
                email_id,
                filename: name,
                mime_type: part.content_type().essence(),
                size: i64::try_from(data.len()).unwrap_or(i64::MAX),
                sha256: sha256_hex(&data),
                disposition: disposition.to_string(),
                content_id: part.content_id(),
                kind: AttachmentKind::Original,
                storage_path: path.to_string_lossy().into_owned(),
            })
            .await?;
    }

    let originals = store.attachments(email_id, AttachmentKind::Original).await?;
    debug!(email_id, count = originals.len(), "Extracted original attachments");
    Ok(originals)
}

/// Stores an uploaded file under `root/{email_id}/staged/` and returns the
/// staged row id.
///
/// # Errors
///
/// Returns an error if the file cannot be written or the store fails.
pub async fn stage(
    store: &Store,
    root: &Path,
    email_id: i64,
    filename: &str,
    data: &[u8],
    mime_type: &str,
) -> Result<i64> {
    let name = sanitize_filename(filename).unwrap_or_else(|| "attachment".to_string());
    let path: PathBuf = root.join(email_id.to_string()).join("staged").join(&name);
    write_file(&path, data).await?;

    store
        .insert_attachment(&NewAttachment {
            email_id,
            filename: name,
            mime_type: mime_type.to_string(),
            size: i64::try_from(data.len()).unwrap_or(i64::MAX),
            sha256: sha256_hex(data),
            disposition: "attachment".to_string(),
            content_id: None,
            kind: AttachmentKind::Staged,
            storage_path: path.to_string_lossy().into_owned(),
        })
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MIXED: &str = concat!(
        "Subject: files\r\n",
        "Content-Type: multipart/mixed; boundary=\"b1\"\r\n",
        "\r\n",
        "--b1\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "see attached\r\n",
        "--b1\r\n",
        "Content-Type: application/pdf; name=\"../../etc/report.pdf\"\r\n",
        "Content-Disposition: attachment; filename=\"../../etc/report.pdf\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "JVBERi0xLjQ=\r\n",
        "--b1\r\n",
        "Content-Type: application/pdf\r\n",
        "Content-Disposition: attachment; filename=\"report.pdf\"\r\n",
        "\r\n",
        "second\r\n",
        "--b1\r\n",
        "Content-Type: image/png\r\n",
        "Content-ID: <logo@x>\r\n",
        "\r\n",
        "png\r\n",
        "--b1--\r\n",
    );

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\temp\\a b.txt").as_deref(), Some("a b.txt"));
        assert_eq!(sanitize_filename("r\u{e9}sum\u{e9}.doc").as_deref(), Some("r_sum_.doc"));
        assert_eq!(sanitize_filename("..."), None);
        assert_eq!(sanitize_filename(""), None);
    }

    #[test]
    fn test_dedupe() {
        let mut used = HashSet::new();
        assert_eq!(dedupe("a.pdf".into(), &mut used), "a.pdf");
        assert_eq!(dedupe("a.pdf".into(), &mut used), "a_1.pdf");
        assert_eq!(dedupe("a.pdf".into(), &mut used), "a_2.pdf");
        assert_eq!(dedupe("noext".into(), &mut used), "noext");
        assert_eq!(dedupe("noext".into(), &mut used), "noext_1");
    }

    #[tokio::test]
    async fn test_ensure_originals_extracts_once() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let originals = ensure_originals(&store, 7, MIXED.as_bytes(), dir.path()).await.unwrap();
        let names: Vec<&str> = originals.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["report.pdf", "report_1.pdf", "attachment-3.png"]);

        let pdf = &originals[0];
        assert_eq!(pdf.size, 8);
        assert_eq!(pdf.sha256, sha256_hex(b"%PDF-1.4"));
        assert_eq!(std::fs::read(&pdf.storage_path).unwrap(), b"%PDF-1.4");
        assert!(pdf.storage_path.starts_with(dir.path().join("7").to_str().unwrap()));

        let logo = &originals[2];
        assert_eq!(logo.content_id.as_deref(), Some("logo@x"));
        assert_eq!(logo.disposition, "inline");
        assert!(logo.is_inline());

        let again = ensure_originals(&store, 7, b"Subject: changed\r\n\r\n", dir.path()).await.unwrap();
        assert_eq!(again, originals);
    }

    #[tokio::test]
    async fn test_stage_writes_file() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let id = stage(&store, dir.path(), 3, "new/plan.txt", b"v2", "text/plain").await.unwrap();

        let staged = store.attachments(3, AttachmentKind::Staged).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].id, id);
        assert_eq!(staged[0].filename, "plan.txt");
        assert!(staged[0].is_staged);
        assert_eq!(std::fs::read(&staged[0].storage_path).unwrap(), b"v2");
    }
}
