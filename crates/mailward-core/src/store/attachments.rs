//! `email_attachments` queries.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::model::{Attachment, AttachmentKind, NewAttachment};
use super::{Store, now};
use crate::Result;

const ATTACHMENT_COLUMNS: &str = r"
    id, email_id, filename, mime_type, size, sha256, disposition,
    content_id, is_original, is_staged, storage_path
";

impl Store {
    /// Attachments of one kind for a message, by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn attachments(&self, email_id: i64, kind: AttachmentKind) -> Result<Vec<Attachment>> {
        let column = match kind {
            AttachmentKind::Original => "is_original",
            AttachmentKind::Staged => "is_staged",
        };
        let rows = sqlx::query(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM email_attachments WHERE email_id = ? AND {column} = 1 ORDER BY id"
        ))
        .bind(email_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_attachment).collect())
    }

    /// Inserts or replaces the row with the same
    /// `(email_id, filename, kind)` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert_attachment(&self, attachment: &NewAttachment) -> Result<i64> {
        let is_original = attachment.kind == AttachmentKind::Original;
        let result = sqlx::query(
            r"
            INSERT OR REPLACE INTO email_attachments (
                email_id, filename, mime_type, size, sha256, disposition,
                content_id, is_original, is_staged, storage_path, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(attachment.email_id)
        .bind(&attachment.filename)
        .bind(&attachment.mime_type)
        .bind(attachment.size)
        .bind(&attachment.sha256)
        .bind(&attachment.disposition)
        .bind(&attachment.content_id)
        .bind(is_original)
        .bind(!is_original)
        .bind(&attachment.storage_path)
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Deletes the staged rows of a message and returns them so their files
    /// can be removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_staged(&self, email_id: i64) -> Result<Vec<Attachment>> {
        let staged = self.attachments(email_id, AttachmentKind::Staged).await?;
        sqlx::query("DELETE FROM email_attachments WHERE email_id = ? AND is_staged = 1")
            .bind(email_id)
            .execute(&self.pool)
            .await?;
        Ok(staged)
    }
}

fn row_to_attachment(row: &SqliteRow) -> Attachment {
    Attachment {
        id: row.get("id"),
        email_id: row.get("email_id"),
        filename: row.get("filename"),
        mime_type: row.get("mime_type"),
        size: row.get("size"),
        sha256: row.get("sha256"),
        disposition: row.get("disposition"),
        content_id: row.get("content_id"),
        is_original: row.get("is_original"),
        is_staged: row.get("is_staged"),
        storage_path: row.get("storage_path"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn new_attachment(email_id: i64, filename: &str, kind: AttachmentKind) -> NewAttachment {
        NewAttachment {
            email_id,
            filename: filename.to_string(),
            mime_type: "application/pdf".into(),
            size: 4,
            sha256: "00".repeat(32),
            disposition: "attachment".into(),
            content_id: None,
            kind,
            storage_path: format!("/tmp/{email_id}/{filename}"),
        }
    }

    #[tokio::test]
    async fn test_original_and_staged_are_separate() {
        let store = Store::in_memory().await.unwrap();
        let original = store
            .insert_attachment(&new_attachment(1, "q3.pdf", AttachmentKind::Original))
            .await
            .unwrap();
        let staged = store
            .insert_attachment(&new_attachment(1, "q3.pdf", AttachmentKind::Staged))
            .await
            .unwrap();
        assert_ne!(original, staged);

        let originals = store.attachments(1, AttachmentKind::Original).await.unwrap();
        assert_eq!(originals.len(), 1);
        assert!(originals[0].is_original && !originals[0].is_staged);
        assert!(!originals[0].is_inline());
        assert_eq!(store.attachments(1, AttachmentKind::Staged).await.unwrap()[0].id, staged);
        assert!(store.attachments(2, AttachmentKind::Original).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reinsert_replaces_row() {
        let store = Store::in_memory().await.unwrap();
        store
            .insert_attachment(&new_attachment(1, "a.txt", AttachmentKind::Staged))
            .await
            .unwrap();
        let mut again = new_attachment(1, "a.txt", AttachmentKind::Staged);
        again.size = 99;
        store.insert_attachment(&again).await.unwrap();

        let staged = store.attachments(1, AttachmentKind::Staged).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].size, 99);
    }

    #[tokio::test]
    async fn test_delete_staged_keeps_originals() {
        let store = Store::in_memory().await.unwrap();
        store
            .insert_attachment(&new_attachment(1, "a.pdf", AttachmentKind::Original))
            .await
            .unwrap();
        store
            .insert_attachment(&new_attachment(1, "b.pdf", AttachmentKind::Staged))
            .await
            .unwrap();

        let removed = store.delete_staged(1).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].filename, "b.pdf");
        assert!(store.attachments(1, AttachmentKind::Staged).await.unwrap().is_empty());
        assert_eq!(store.attachments(1, AttachmentKind::Original).await.unwrap().len(), 1);
    }
}
