//! `email_messages` queries.
//!
//! Every status write carries the allowed source status in its WHERE clause,
//! so a row can only move along the edges of
//! [`InterceptionStatus::can_transition`].

use std::collections::HashSet;

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::model::{
    AccountId, Direction, InsertOutcome, InterceptionStatus, Message, MessageStatus, NewMessage,
};
use super::{Store, now, parse_timestamp};
use crate::Result;
use crate::attachments::Manifest;

const MESSAGE_COLUMNS: &str = r"
    id, account_id, message_id, direction, interception_status, status,
    sender, recipients, subject, body_text, body_html, raw_content, raw_path,
    original_uid, original_internaldate, original_message_id, edited_message_id,
    risk_score, keywords_matched, quarantine_folder, attachments_manifest,
    version, latency_ms, created_at, processed_at, action_taken_at
";

impl Store {
    /// Highest `original_uid` stored for the account, 0 if none.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub async fn max_uid(&self, account_id: AccountId) -> Result<u32> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(original_uid) FROM email_messages WHERE account_id = ?",
        )
        .bind(account_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(max.unwrap_or(0).clamp(0, i64::from(u32::MAX)) as u32)
    }

    /// The subset of `uids` already stored for the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub async fn known_uids(&self, account_id: AccountId, uids: &[u32]) -> Result<HashSet<u32>> {
        let mut known = HashSet::new();
        // Stay well below SQLite's bound parameter limit.
        for chunk in uids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT original_uid FROM email_messages WHERE account_id = ? AND original_uid IN ({placeholders})"
            );
            let mut query = sqlx::query_scalar::<sqlx::Sqlite, i64>(&sql).bind(account_id.0);
            for uid in chunk {
                query = query.bind(i64::from(*uid));
            }
            known.extend(query.fetch_all(&self.pool).await?.into_iter().map(|uid| uid as u32));
        }
        Ok(known)
    }

    /// Inserts a message unless one with the same `message_id` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert_message(&self, message: &NewMessage) -> Result<InsertOutcome> {
        let recipients = serde_json::to_string(&message.recipients)?;
        let keywords = serde_json::to_string(&message.keywords_matched)?;
        let created_at = now();
        let processed_at = message.interception_status.is_some().then(|| created_at.clone());

        let result = sqlx::query(
            r"
            INSERT OR IGNORE INTO email_messages (
                account_id, message_id, direction, interception_status, status,
                sender, recipients, subject, body_text, body_html, raw_content, raw_path,
                original_uid, original_internaldate, original_message_id,
                risk_score, keywords_matched, quarantine_folder, latency_ms,
                created_at, processed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(message.account_id.map(|a| a.0))
        .bind(&message.message_id)
        .bind(message.direction.as_str())
        .bind(message.interception_status.map(InterceptionStatus::as_str))
        .bind(message.status.as_str())
        .bind(&message.sender)
        .bind(recipients)
        .bind(&message.subject)
        .bind(&message.body_text)
        .bind(&message.body_html)
        .bind(&message.raw_content)
        .bind(&message.raw_path)
        .bind(message.original_uid.map(i64::from))
        .bind(&message.original_internaldate)
        .bind(&message.original_message_id)
        .bind(i64::from(message.risk_score))
        .bind(keywords)
        .bind(&message.quarantine_folder)
        .bind(message.latency_ms)
        .bind(&created_at)
        .bind(processed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted(result.last_insert_rowid()))
        }
    }

    /// Get message by row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_message(&self, id: i64) -> Result<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM email_messages WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    /// Get message by its `Message-ID` header value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn message_by_message_id(&self, message_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM email_messages WHERE message_id = ?"))
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    /// True if `email_id` belongs to `account_id` and is either RELEASED or
    /// holding a release lock, i.e. an INBOX copy of it is expected.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_release_copy(&self, account_id: AccountId, email_id: i64) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM email_messages m WHERE m.id = ? AND m.account_id = ? \
             AND (m.interception_status = 'RELEASED' \
                  OR EXISTS (SELECT 1 FROM email_release_locks l WHERE l.email_id = m.id))",
        )
        .bind(email_id)
        .bind(account_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// INTERCEPTED → HELD once the quarantine move is confirmed. Returns
    /// false if the row was not INTERCEPTED.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_held(&self, id: i64, folder: &str, latency_ms: Option<i64>) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE email_messages
            SET interception_status = 'HELD', status = 'PENDING', quarantine_folder = ?,
                latency_ms = COALESCE(?, latency_ms), action_taken_at = ?
            WHERE id = ? AND interception_status = 'INTERCEPTED'
            ",
        )
        .bind(folder)
        .bind(latency_ms)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `(id, uid)` of INTERCEPTED rows whose move has not succeeded yet,
    /// oldest UID first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub async fn intercepted_uids(&self, account_id: AccountId) -> Result<Vec<(i64, u32)>> {
        let rows = sqlx::query(
            r"
            SELECT id, original_uid FROM email_messages
            WHERE account_id = ? AND interception_status = 'INTERCEPTED' AND original_uid IS NOT NULL
            ORDER BY original_uid
            ",
        )
        .bind(account_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get::<i64, _>("original_uid") as u32))
            .collect())
    }

    /// HELD → RELEASED. Clears the manifest and bumps the version.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_released(&self, id: i64, edited_message_id: Option<&str>) -> Result<bool> {
        let at = now();
        let result = sqlx::query(
            r"
            UPDATE email_messages
            SET interception_status = 'RELEASED', status = 'DELIVERED',
                edited_message_id = ?, attachments_manifest = NULL,
                version = version + 1, processed_at = ?, action_taken_at = ?
            WHERE id = ? AND interception_status = 'HELD'
            ",
        )
        .bind(edited_message_id)
        .bind(&at)
        .bind(&at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// HELD → DISCARDED. Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_discarded(&self, id: i64) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE email_messages
            SET interception_status = 'DISCARDED', status = 'REJECTED', action_taken_at = ?
            WHERE id = ? AND interception_status = 'HELD'
            ",
        )
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Stores the pending attachment actions.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be serialized or the query fails.
    pub async fn set_manifest(&self, id: i64, manifest: &Manifest) -> Result<()> {
        let json = serde_json::to_string(manifest)?;
        sqlx::query("UPDATE email_messages SET attachments_manifest = ? WHERE id = ?")
            .bind(json)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Overwrites the fields a reviewer supplied; `None` keeps the stored
    /// value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_edits(
        &self,
        id: i64,
        subject: Option<&str>,
        body_text: Option<&str>,
        body_html: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE email_messages
            SET subject = COALESCE(?, subject),
                body_text = COALESCE(?, body_text),
                body_html = COALESCE(?, body_html)
            WHERE id = ?
            ",
        )
        .bind(subject)
        .bind(body_text)
        .bind(body_html)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let recipients: String = row.get("recipients");
    let keywords: String = row.get("keywords_matched");
    let interception: Option<String> = row.get("interception_status");
    let direction: String = row.get("direction");
    let status: String = row.get("status");

    Ok(Message {
        id: row.get("id"),
        account_id: row.get::<Option<i64>, _>("account_id").map(AccountId::new),
        message_id: row.get("message_id"),
        direction: Direction::parse(&direction),
        interception_status: interception.as_deref().and_then(InterceptionStatus::parse),
        status: MessageStatus::parse(&status),
        sender: row.get("sender"),
        recipients: serde_json::from_str(&recipients)?,
        subject: row.get("subject"),
        body_text: row.get("body_text"),
        body_html: row.get("body_html"),
        raw_content: row.get("raw_content"),
        raw_path: row.get("raw_path"),
        original_uid: row.get::<Option<i64>, _>("original_uid").map(|uid| uid as u32),
        original_internaldate: row.get("original_internaldate"),
        original_message_id: row.get("original_message_id"),
        edited_message_id: row.get("edited_message_id"),
        risk_score: row.get::<i64, _>("risk_score").clamp(0, 100) as u8,
        keywords_matched: serde_json::from_str(&keywords)?,
        quarantine_folder: row.get("quarantine_folder"),
        attachments_manifest: row.get("attachments_manifest"),
        version: row.get("version"),
        latency_ms: row.get("latency_ms"),
        created_at: parse_timestamp(row.get("created_at")),
        processed_at: parse_timestamp(row.get("processed_at")),
        action_taken_at: parse_timestamp(row.get("action_taken_at")),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::attachments::{ManifestAction, ManifestItem};

    fn intercepted(account: AccountId, uid: u32, message_id: &str) -> NewMessage {
        NewMessage {
            account_id: Some(account),
            message_id: Some(message_id.to_string()),
            interception_status: Some(InterceptionStatus::Intercepted),
            sender: "boss@corp.example".into(),
            recipients: vec!["me@corp.example".into()],
            subject: "URGENT invoice".into(),
            raw_content: Some(b"Subject: URGENT invoice\r\n\r\nbody".to_vec()),
            original_uid: Some(uid),
            original_message_id: Some(message_id.to_string()),
            risk_score: 20,
            keywords_matched: vec!["urgent".into()],
            ..NewMessage::default()
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_message() {
        let store = Store::in_memory().await.unwrap();
        let account = AccountId::new(1);
        let InsertOutcome::Inserted(id) = store.insert_message(&intercepted(account, 42, "<m1@x>")).await.unwrap()
        else {
            panic!("expected insert");
        };

        let message = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.interception_status, Some(InterceptionStatus::Intercepted));
        assert_eq!(message.status, MessageStatus::Pending);
        assert_eq!(message.direction, Direction::Inbound);
        assert_eq!(message.recipients, vec!["me@corp.example"]);
        assert_eq!(message.keywords_matched, vec!["urgent"]);
        assert_eq!(message.original_uid, Some(42));
        assert_eq!(message.version, 0);
        assert!(message.created_at.is_some());

        let by_mid = store.message_by_message_id("<m1@x>").await.unwrap().unwrap();
        assert_eq!(by_mid.id, id);
        assert!(store.get_message(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_message_id_is_ignored() {
        let store = Store::in_memory().await.unwrap();
        let account = AccountId::new(1);
        assert!(matches!(
            store.insert_message(&intercepted(account, 1, "<dup@x>")).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert_eq!(
            store.insert_message(&intercepted(account, 2, "<dup@x>")).await.unwrap(),
            InsertOutcome::Duplicate
        );

        // Rows without a Message-ID never collide.
        let mut anonymous = intercepted(account, 3, "");
        anonymous.message_id = None;
        assert!(matches!(store.insert_message(&anonymous).await.unwrap(), InsertOutcome::Inserted(_)));
        assert!(matches!(store.insert_message(&anonymous).await.unwrap(), InsertOutcome::Inserted(_)));
    }

    #[tokio::test]
    async fn test_uid_tracking() {
        let store = Store::in_memory().await.unwrap();
        let account = AccountId::new(7);
        assert_eq!(store.max_uid(account).await.unwrap(), 0);

        store.insert_message(&intercepted(account, 10, "<a@x>")).await.unwrap();
        store.insert_message(&intercepted(account, 12, "<b@x>")).await.unwrap();
        store.insert_message(&intercepted(AccountId::new(8), 99, "<c@x>")).await.unwrap();

        assert_eq!(store.max_uid(account).await.unwrap(), 12);
        let known = store.known_uids(account, &[9, 10, 11, 12, 99]).await.unwrap();
        assert_eq!(known, HashSet::from([10, 12]));
        assert!(store.known_uids(account, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_writes_follow_workflow() {
        let store = Store::in_memory().await.unwrap();
        let account = AccountId::new(1);
        let InsertOutcome::Inserted(id) = store.insert_message(&intercepted(account, 5, "<w@x>")).await.unwrap()
        else {
            panic!("expected insert");
        };

        assert_eq!(store.intercepted_uids(account).await.unwrap(), vec![(id, 5)]);
        // Not HELD yet.
        assert!(!store.mark_released(id, None).await.unwrap());
        assert_eq!(store.mark_discarded(id).await.unwrap(), 0);

        assert!(store.mark_held(id, "Quarantine", Some(120)).await.unwrap());
        assert!(!store.mark_held(id, "Quarantine", None).await.unwrap());
        assert!(store.intercepted_uids(account).await.unwrap().is_empty());
        let held = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(held.interception_status, Some(InterceptionStatus::Held));
        assert_eq!(held.quarantine_folder.as_deref(), Some("Quarantine"));
        assert_eq!(held.latency_ms, Some(120));
        assert!(held.action_taken_at.is_some());

        let manifest = Manifest {
            items: vec![ManifestItem { action: ManifestAction::Remove, aid: Some(3), staged_ref: None }],
            updated_at: None,
        };
        store.set_manifest(id, &manifest).await.unwrap();
        assert!(store.get_message(id).await.unwrap().unwrap().attachments_manifest.is_some());

        assert!(store.mark_released(id, Some("<new@mailward>")).await.unwrap());
        let released = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(released.interception_status, Some(InterceptionStatus::Released));
        assert_eq!(released.status, MessageStatus::Delivered);
        assert_eq!(released.edited_message_id.as_deref(), Some("<new@mailward>"));
        assert!(released.attachments_manifest.is_none());
        assert_eq!(released.version, 1);

        // Terminal.
        assert_eq!(store.mark_discarded(id).await.unwrap(), 0);
        assert!(!store.mark_released(id, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_copy_needs_release_or_lock() {
        let store = Store::in_memory().await.unwrap();
        let account = AccountId::new(1);
        let InsertOutcome::Inserted(id) = store.insert_message(&intercepted(account, 7, "<r@x>")).await.unwrap()
        else {
            panic!("expected insert");
        };

        assert!(!store.is_release_copy(account, id).await.unwrap());
        assert!(!store.is_release_copy(account, id + 100).await.unwrap());

        store.try_acquire_release_lock(id, std::time::Duration::from_secs(300)).await.unwrap();
        assert!(store.is_release_copy(account, id).await.unwrap());
        assert!(!store.is_release_copy(AccountId::new(2), id).await.unwrap());
        store.release_lock(id).await.unwrap();
        assert!(!store.is_release_copy(account, id).await.unwrap());

        store.mark_held(id, "Quarantine", None).await.unwrap();
        store.mark_released(id, None).await.unwrap();
        assert!(store.is_release_copy(account, id).await.unwrap());
        assert!(!store.is_release_copy(AccountId::new(2), id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_edits_keeps_unset_fields() {
        let store = Store::in_memory().await.unwrap();
        let mut new = intercepted(AccountId::new(1), 1, "<e@x>");
        new.body_text = Some("original body".into());
        let InsertOutcome::Inserted(id) = store.insert_message(&new).await.unwrap() else {
            panic!("expected insert");
        };

        assert!(store.update_edits(id, Some("Reviewed"), None, Some("<p>hi</p>")).await.unwrap());
        let message = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.subject, "Reviewed");
        assert_eq!(message.body_text.as_deref(), Some("original body"));
        assert_eq!(message.body_html.as_deref(), Some("<p>hi</p>"));
        assert!(!store.update_edits(999, Some("x"), None, None).await.unwrap());
    }
}
