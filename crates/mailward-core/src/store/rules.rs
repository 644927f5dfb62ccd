//! `moderation_rules` queries.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::warn;

use super::{Store, now};
use crate::Result;
use crate::rules::{ConditionField, NewRule, Operator, Rule, RuleAction, RuleType};

impl Store {
    /// Inserts a rule and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert_rule(&self, rule: &NewRule) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO moderation_rules (
                rule_name, rule_type, condition_field, condition_operator,
                condition_value, action, priority, is_active, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&rule.name)
        .bind(rule.rule_type.as_str())
        .bind(rule.field.as_str())
        .bind(rule.operator.as_str())
        .bind(&rule.value)
        .bind(rule.action.as_str())
        .bind(i64::from(rule.priority.min(100)))
        .bind(rule.is_active)
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Active rules, highest priority first, ties by id.
    ///
    /// Rows whose type, field, operator or action is unknown are skipped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn active_rules(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query(
            r"
            SELECT id, rule_name, rule_type, condition_field, condition_operator,
                   condition_value, action, priority, is_active
            FROM moderation_rules
            WHERE is_active = 1
            ORDER BY priority DESC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_rule).collect())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_rule(row: &SqliteRow) -> Option<Rule> {
    let id: i64 = row.get("id");
    let rule_type: String = row.get("rule_type");
    let field: String = row.get("condition_field");
    let operator: String = row.get("condition_operator");
    let action: String = row.get("action");

    let parsed = (
        RuleType::parse(&rule_type),
        ConditionField::parse(&field),
        Operator::parse(&operator),
        RuleAction::parse(&action),
    );
    let (Some(rule_type), Some(field), Some(operator), Some(action)) = parsed else {
        warn!(rule_id = id, %rule_type, %field, %operator, %action, "Skipping rule with unknown values");
        return None;
    };

    Some(Rule {
        id,
        name: row.get("rule_name"),
        rule_type,
        field,
        operator,
        value: row.get("condition_value"),
        action,
        priority: row.get::<i64, _>("priority").clamp(0, 100) as u8,
        is_active: row.get("is_active"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_active_rules_ordering() {
        let store = Store::in_memory().await.unwrap();
        let low = store
            .insert_rule(&NewRule::keyword("low", ConditionField::Body, "invoice", 10))
            .await
            .unwrap();
        let high_a = store
            .insert_rule(&NewRule::keyword("high a", ConditionField::Subject, "urgent", 90))
            .await
            .unwrap();
        let high_b = store
            .insert_rule(&NewRule::keyword("high b", ConditionField::Subject, "wire", 90))
            .await
            .unwrap();
        let mut inactive = NewRule::keyword("off", ConditionField::Subject, "x", 100);
        inactive.is_active = false;
        store.insert_rule(&inactive).await.unwrap();

        let ids: Vec<_> = store.active_rules().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![high_a, high_b, low]);
    }

    #[tokio::test]
    async fn test_unknown_values_are_skipped() {
        let store = Store::in_memory().await.unwrap();
        store
            .insert_rule(&NewRule::keyword("ok", ConditionField::Subject, "urgent", 50))
            .await
            .unwrap();
        sqlx::query(
            r"
            INSERT INTO moderation_rules (rule_name, rule_type, condition_field, condition_value, created_at)
            VALUES ('bad', 'KEYWORD', 'HEADERS', 'x', '2026-01-01T00:00:00.000Z')
            ",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let rules = store.active_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "ok");
        assert_eq!(rules[0].operator, Operator::Contains);
        assert_eq!(rules[0].action, RuleAction::Hold);
    }
}
