//! Release locks and idempotency keys.

use std::time::Duration;

use chrono::Utc;
use sqlx::Row;

use super::model::{IdempotencyRecord, IdempotencyStatus};
use super::{Store, now, timestamp};
use crate::Result;

impl Store {
    /// Takes the release lock for a message. Locks older than `stale` are
    /// reclaimed first. Returns false if another release holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn try_acquire_release_lock(&self, email_id: i64, stale: Duration) -> Result<bool> {
        let cutoff = chrono::Duration::from_std(stale)
            .ok()
            .and_then(|stale| Utc::now().checked_sub_signed(stale))
            .map(timestamp);
        if let Some(cutoff) = cutoff {
            sqlx::query("DELETE FROM email_release_locks WHERE email_id = ? AND acquired_at < ?")
                .bind(email_id)
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        }

        let result = sqlx::query("INSERT OR IGNORE INTO email_release_locks (email_id, acquired_at) VALUES (?, ?)")
            .bind(email_id)
            .bind(now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drops the release lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn release_lock(&self, email_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM email_release_locks WHERE email_id = ?")
            .bind(email_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Looks up an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query("SELECT key, email_id, status, response_json FROM idempotency_keys WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| {
            let status: String = row.get("status");
            IdempotencyRecord {
                key: row.get("key"),
                email_id: row.get("email_id"),
                status: IdempotencyStatus::parse(&status),
                response_json: row.get("response_json"),
            }
        }))
    }

    /// Records `key` as pending for `email_id`, overwriting an earlier row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn begin_idempotency(&self, key: &str, email_id: i64) -> Result<()> {
        let at = now();
        sqlx::query(
            r"
            INSERT INTO idempotency_keys (key, email_id, status, response_json, created_at, updated_at)
            VALUES (?, ?, 'pending', NULL, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                email_id = excluded.email_id, status = 'pending',
                response_json = NULL, updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(email_id)
        .bind(&at)
        .bind(&at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stores the final status and response of a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn finish_idempotency(&self, key: &str, status: IdempotencyStatus, response_json: &str) -> Result<()> {
        sqlx::query("UPDATE idempotency_keys SET status = ?, response_json = ?, updated_at = ? WHERE key = ?")
            .bind(status.as_str())
            .bind(response_json)
            .bind(now())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Forgets a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_idempotency(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
