//! `email_accounts` queries.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::model::{Account, AccountId, Endpoint, NewAccount};
use super::{Store, now, parse_timestamp};
use crate::Result;

const ACCOUNT_COLUMNS: &str = r"
    id, account_name, email_address,
    imap_host, imap_port, imap_username, imap_password, imap_use_ssl,
    smtp_host, smtp_port, smtp_username, smtp_password, smtp_use_ssl,
    is_active, quarantine_folder, last_error, last_checked
";

impl Store {
    /// Inserts an account and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert_account(&self, account: &NewAccount) -> Result<AccountId> {
        let result = sqlx::query(
            r"
            INSERT INTO email_accounts (
                account_name, email_address,
                imap_host, imap_port, imap_username, imap_password, imap_use_ssl,
                smtp_host, smtp_port, smtp_username, smtp_password, smtp_use_ssl,
                is_active, quarantine_folder, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&account.account_name)
        .bind(&account.email_address)
        .bind(&account.imap.host)
        .bind(i64::from(account.imap.port))
        .bind(&account.imap.username)
        .bind(&account.imap.password)
        .bind(account.imap.use_ssl)
        .bind(&account.smtp.host)
        .bind(i64::from(account.smtp.port))
        .bind(&account.smtp.username)
        .bind(&account.smtp.password)
        .bind(account.smtp.use_ssl)
        .bind(account.is_active)
        .bind(&account.quarantine_folder)
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(AccountId::new(result.last_insert_rowid()))
    }

    /// Get account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM email_accounts WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_account))
    }

    /// Accounts with `is_active` set, by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn active_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM email_accounts WHERE is_active = 1 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_account).collect())
    }

    /// False for inactive or missing accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_account_active(&self, id: AccountId) -> Result<bool> {
        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM email_accounts WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(active.unwrap_or(false))
    }

    /// First account whose address equals one of `recipients`, ignoring
    /// case and surrounding angle brackets.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_account_by_recipient(&self, recipients: &[String]) -> Result<Option<Account>> {
        for recipient in recipients {
            let address = recipient.trim().trim_start_matches('<').trim_end_matches('>');
            if address.is_empty() {
                continue;
            }
            let row = sqlx::query(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM email_accounts WHERE lower(email_address) = lower(?) ORDER BY id LIMIT 1"
            ))
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                return Ok(Some(row_to_account(&row)));
            }
        }
        Ok(None)
    }

    /// Sets `is_active`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_account_active(&self, id: AccountId, active: bool) -> Result<()> {
        sqlx::query("UPDATE email_accounts SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records or clears `last_error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_account_error(&self, id: AccountId, error: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE email_accounts SET last_error = ? WHERE id = ?")
            .bind(error)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sets `last_checked` to now.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn touch_last_checked(&self, id: AccountId) -> Result<()> {
        sqlx::query("UPDATE email_accounts SET last_checked = ? WHERE id = ?")
            .bind(now())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_account(row: &SqliteRow) -> Account {
    Account {
        id: AccountId::new(row.get("id")),
        account_name: row.get("account_name"),
        email_address: row.get("email_address"),
        imap: Endpoint {
            host: row.get("imap_host"),
            port: row.get::<i64, _>("imap_port") as u16,
            username: row.get("imap_username"),
            password: row.get("imap_password"),
            use_ssl: row.get("imap_use_ssl"),
        },
        smtp: Endpoint {
            host: row.get("smtp_host"),
            port: row.get::<i64, _>("smtp_port") as u16,
            username: row.get("smtp_username"),
            password: row.get("smtp_password"),
            use_ssl: row.get("smtp_use_ssl"),
        },
        is_active: row.get("is_active"),
        quarantine_folder: row.get("quarantine_folder"),
        last_error: row.get("last_error"),
        last_checked: parse_timestamp(row.get("last_checked")),
    }
}
