//! SMTP submissions are held before anything is delivered.

use chrono::Utc;
use mailward_smtp::{DeliveryHandler, Envelope, Reply, ReplyCode};
use tracing::{debug, info, warn};

use crate::Result;
use crate::mail::ParsedMail;
use crate::policy::RetryPolicy;
use crate::rules::evaluate;
use crate::store::{Direction, InsertOutcome, InterceptionStatus, MessageStatus, NewMessage, Store};

/// Stores every submitted message as HELD.
#[derive(Debug, Clone)]
pub struct InterceptHandler {
    store: Store,
    retry: RetryPolicy,
}

impl InterceptHandler {
    /// Handler writing to `store`.
    #[must_use]
    pub const fn new(store: Store, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Parses, evaluates and stores one submission.
    async fn hold(&self, envelope: &Envelope, data: &[u8]) -> Result<InsertOutcome> {
        let parsed = ParsedMail::parse(data);
        let recipients = envelope.recipients();
        let account = self.store.find_account_by_recipient(&recipients).await?;

        let mut fields = parsed.fields();
        fields.sender = envelope.sender().to_string();
        fields.recipients.clone_from(&recipients);
        let evaluation = evaluate(&fields, &self.store.active_rules().await?);

        let message = NewMessage {
            account_id: account.map(|a| a.id),
            message_id: Some(
                parsed.message_id.clone().unwrap_or_else(|| format!("msg_{}", Utc::now().timestamp())),
            ),
            direction: Direction::Inbound,
            interception_status: Some(InterceptionStatus::Held),
            status: MessageStatus::Pending,
            sender: envelope.sender().to_string(),
            recipients,
            subject: parsed.subject,
            body_text: parsed.body_text,
            body_html: parsed.body_html,
            raw_content: Some(data.to_vec()),
            raw_path: None,
            original_uid: None,
            original_internaldate: None,
            original_message_id: parsed.message_id,
            risk_score: evaluation.risk_score,
            keywords_matched: evaluation.matched_keywords,
            quarantine_folder: None,
            latency_ms: None,
        };
        self.retry.retry_store_write(|| self.store.insert_message(&message)).await
    }
}

impl DeliveryHandler for InterceptHandler {
    async fn deliver(&self, envelope: &Envelope, data: &[u8]) -> Reply {
        match self.hold(envelope, data).await {
            Ok(InsertOutcome::Inserted(id)) => {
                info!(id, sender = envelope.sender(), bytes = data.len(), "Held SMTP submission");
                Reply::line(ReplyCode::OK, "Message accepted for delivery")
            }
            Ok(InsertOutcome::Duplicate) => {
                debug!(sender = envelope.sender(), "Duplicate submission");
                Reply::line(ReplyCode::OK, "Message accepted for delivery")
            }
            Err(e) => {
                warn!(sender = envelope.sender(), error = %e, "Could not hold submission");
                Reply::line(ReplyCode::TRANSACTION_FAILED, format!("Error: {e}"))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mailward_smtp::Address;

    use super::*;
    use crate::rules::{ConditionField, NewRule};
    use crate::store::NewAccount;

    fn envelope(from: &str, to: &[&str]) -> Envelope {
        Envelope {
            helo: Some("client.example".into()),
            mail_from: Some(Address::new(from).unwrap()),
            rcpt_to: to.iter().map(|r| Address::new(*r).unwrap()).collect(),
            peer: None,
        }
    }

    const RAW: &[u8] = b"From: Boss <boss@outside.example>\r\nTo: Ops@Corp.example\r\nSubject: Urgent payment\r\nMessage-ID: <s1@outside>\r\n\r\nplease pay\r\n";

    #[tokio::test]
    async fn test_submission_is_held_for_matching_account() {
        let store = Store::in_memory().await.unwrap();
        let account = store.insert_account(&NewAccount::with_email("ops@corp.example")).await.unwrap();
        store
            .insert_rule(&NewRule::keyword("urgent", ConditionField::Subject, "urgent", 60))
            .await
            .unwrap();
        let handler = InterceptHandler::new(store.clone(), RetryPolicy::default());

        let reply = handler.deliver(&envelope("boss@outside.example", &["OPS@corp.example"]), RAW).await;
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.lines, vec!["Message accepted for delivery"]);

        let row = store.message_by_message_id("<s1@outside>").await.unwrap().unwrap();
        assert_eq!(row.account_id, Some(account));
        assert_eq!(row.interception_status, Some(InterceptionStatus::Held));
        assert_eq!(row.status, MessageStatus::Pending);
        assert_eq!(row.sender, "boss@outside.example");
        assert_eq!(row.recipients, vec!["OPS@corp.example"]);
        assert_eq!(row.subject, "Urgent payment");
        assert!(row.risk_score > 0);
        assert_eq!(row.raw_content.as_deref(), Some(RAW));
    }

    #[tokio::test]
    async fn test_duplicate_still_accepted() {
        let store = Store::in_memory().await.unwrap();
        let handler = InterceptHandler::new(store.clone(), RetryPolicy::default());
        let env = envelope("a@b.example", &["x@y.example"]);

        assert_eq!(handler.deliver(&env, RAW).await.code, ReplyCode::OK);
        assert_eq!(handler.deliver(&env, RAW).await.code, ReplyCode::OK);
        let row = store.message_by_message_id("<s1@outside>").await.unwrap().unwrap();
        assert_eq!(row.account_id, None);
    }

    #[tokio::test]
    async fn test_missing_message_id_is_generated() {
        let store = Store::in_memory().await.unwrap();
        let handler = InterceptHandler::new(store.clone(), RetryPolicy::default());
        let reply = handler
            .deliver(&envelope("a@b.example", &["x@y.example"]), b"Subject: plain\r\n\r\nhi\r\n")
            .await;
        assert!(reply.is_success());
        let row = store.get_message(1).await.unwrap().unwrap();
        assert!(row.message_id.unwrap().starts_with("msg_"));
    }

    #[tokio::test]
    async fn test_store_failure_is_transaction_failed() {
        let store = Store::in_memory().await.unwrap();
        let handler = InterceptHandler::new(store.clone(), RetryPolicy::default());
        store.close().await;

        let reply = handler.deliver(&envelope("a@b.example", &["x@y.example"]), RAW).await;
        assert_eq!(reply.code, ReplyCode::TRANSACTION_FAILED);
        assert!(!reply.is_success());
        assert!(reply.lines[0].starts_with("Error:"));
    }
}
