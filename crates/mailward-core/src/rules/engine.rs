//! Pure rule evaluation.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{ConditionField, Operator, Rule, RuleAction};

/// Score ceiling.
const MAX_RISK: u32 = 100;

/// Weighted terms checked when no rule matches. They raise the score but
/// never hold a message on their own.
const FALLBACK_KEYWORDS: [(&str, u32); 10] = [
    ("urgent", 5),
    ("confidential", 10),
    ("payment", 8),
    ("password", 10),
    ("account", 5),
    ("verify", 7),
    ("suspended", 9),
    ("click here", 8),
    ("act now", 7),
    ("limited time", 6),
];

/// The parts of a message rules look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFields {
    /// Decoded subject.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// Sender address, possibly with display name.
    pub sender: String,
    /// Recipient addresses.
    pub recipients: Vec<String>,
}

/// A rule that matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRef {
    /// Rule id.
    pub id: i64,
    /// Rule name.
    pub name: String,
    /// Its action.
    pub action: RuleAction,
    /// Its priority.
    pub priority: u8,
}

/// Outcome of evaluating one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Hold the message for review.
    pub should_hold: bool,
    /// 0..=100.
    pub risk_score: u8,
    /// Terms (or patterns) that matched, in match order.
    pub matched_keywords: Vec<String>,
    /// Matching rules, highest priority first.
    pub matched_rules: Vec<RuleRef>,
}

/// Evaluates `fields` against `rules`. Never fails: a bad pattern only
/// disqualifies its own rule.
#[must_use]
pub fn evaluate(fields: &MessageFields, rules: &[Rule]) -> Evaluation {
    let mut ordered: Vec<&Rule> = rules.iter().filter(|r| r.is_active).collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

    let body_raw = format!("{} {}", fields.subject, fields.body);
    let recipients_raw = fields.recipients.join(" ");
    let domain = sender_domain(&fields.sender);

    let mut eval = Evaluation::default();
    let mut risk: u32 = 0;
    let mut hold = false;

    for rule in ordered {
        let value = rule.value.trim();
        if value.is_empty() {
            continue;
        }
        let raw = match rule.effective_field() {
            ConditionField::Subject => fields.subject.as_str(),
            ConditionField::Body => body_raw.as_str(),
            ConditionField::Sender => fields.sender.as_str(),
            ConditionField::Recipient => recipients_raw.as_str(),
            ConditionField::SenderDomain => domain.as_str(),
        };

        let terms = if rule.is_regex() {
            match_regex(rule, value, raw.trim())
        } else {
            match_terms(rule.operator, value, &raw.to_lowercase())
        };
        if terms.is_empty() {
            continue;
        }

        risk = (risk + u32::from(rule.priority.max(1))).min(MAX_RISK);
        hold |= rule.action.holds();
        eval.matched_keywords.extend(terms);
        eval.matched_rules.push(RuleRef {
            id: rule.id,
            name: rule.name.clone(),
            action: rule.action,
            priority: rule.priority,
        });
    }

    if eval.matched_rules.is_empty() {
        let content = body_raw.to_lowercase();
        for (word, weight) in FALLBACK_KEYWORDS {
            if content.contains(word) {
                eval.matched_keywords.push(word.to_string());
                risk = (risk + weight).min(MAX_RISK);
            }
        }
    }

    eval.should_hold = hold || !eval.matched_rules.is_empty();
    eval.risk_score = u8::try_from(risk.min(MAX_RISK)).unwrap_or(u8::MAX);
    eval
}

fn match_regex(rule: &Rule, pattern: &str, text: &str) -> Vec<String> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) if re.is_match(text) => vec![pattern.to_string()],
        Ok(_) => Vec::new(),
        Err(e) => {
            debug!(rule_id = rule.id, error = %e, "skipping rule with invalid pattern");
            Vec::new()
        }
    }
}

/// `text` is already lowercased.
fn match_terms(operator: Operator, value: &str, text: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|term| {
            let needle = term.to_lowercase();
            match operator {
                Operator::Equals => text == needle,
                Operator::StartsWith => text.starts_with(&needle),
                Operator::EndsWith => text.ends_with(&needle),
                Operator::Contains | Operator::Regex => text.contains(&needle),
            }
        })
        .map(str::to_string)
        .collect()
}

/// Lowercased domain following the first `@`, up to the first character
/// that cannot appear in a host name.
fn sender_domain(sender: &str) -> String {
    sender
        .split_once('@')
        .map(|(_, rest)| {
            rest.chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::rules::model::RuleType;

    fn rule(id: i64, field: ConditionField, operator: Operator, value: &str, priority: u8) -> Rule {
        Rule {
            id,
            name: format!("rule-{id}"),
            rule_type: RuleType::Keyword,
            field,
            operator,
            value: value.to_string(),
            action: RuleAction::Hold,
            priority,
            is_active: true,
        }
    }

    fn fields(subject: &str, body: &str, sender: &str) -> MessageFields {
        MessageFields {
            subject: subject.into(),
            body: body.into(),
            sender: sender.into(),
            recipients: vec!["ops@corp.example".into()],
        }
    }

    #[test]
    fn keyword_in_subject_holds() {
        let rules = [rule(1, ConditionField::Subject, Operator::Contains, "invoice", 50)];
        let eval = evaluate(&fields("Your INVOICE is ready", "", "billing@vendor.example"), &rules);
        assert!(eval.should_hold);
        assert_eq!(eval.risk_score, 50);
        assert_eq!(eval.matched_keywords, vec!["invoice"]);
        assert_eq!(eval.matched_rules[0].id, 1);
    }

    #[test]
    fn body_rule_also_searches_subject() {
        let rules = [rule(1, ConditionField::Body, Operator::Contains, "invoice", 75)];
        let eval = evaluate(&fields("Invoice #1", "please pay", "billing@vendor.example"), &rules);
        assert!(eval.should_hold);
        assert_eq!(eval.risk_score, 75);
        assert_eq!(eval.matched_keywords, vec!["invoice"]);

        let miss = evaluate(&fields("Lunch", "please pay", "billing@vendor.example"), &rules);
        assert!(!miss.should_hold);
    }

    #[test]
    fn clean_message_is_not_held() {
        // No rule matches and no fallback word appears.
        let rules = [rule(1, ConditionField::Subject, Operator::Contains, "invoice", 50)];
        let eval = evaluate(&fields("hello team", "see you at lunch", "a@b.example"), &rules);
        assert!(!eval.should_hold);
        assert_eq!(eval.risk_score, 0);
        assert!(eval.matched_keywords.is_empty());
    }

    #[test]
    fn fallback_scores_without_holding() {
        let eval = evaluate(&fields("URGENT", "verify your password, click here", "x@y.example"), &[]);
        assert!(!eval.should_hold);
        assert_eq!(eval.matched_keywords, vec!["urgent", "password", "verify", "click here"]);
        assert_eq!(eval.risk_score, 5 + 10 + 7 + 8);
    }

    #[test]
    fn fallback_skipped_when_a_rule_matches() {
        let rules = [rule(1, ConditionField::Body, Operator::Contains, "lunch", 3)];
        let eval = evaluate(&fields("urgent", "lunch", "a@b.example"), &rules);
        assert_eq!(eval.matched_keywords, vec!["lunch"]);
        assert_eq!(eval.risk_score, 3);
    }

    #[test]
    fn comma_terms_and_operators() {
        let f = fields("Quarterly Report", "", "Alice <alice@Example.COM>");
        let contains = rule(1, ConditionField::Subject, Operator::Contains, " , report, budget", 10);
        assert_eq!(evaluate(&f, &[contains]).matched_keywords, vec!["report"]);

        let equals = rule(2, ConditionField::SenderDomain, Operator::Equals, "other.org, example.com", 10);
        assert_eq!(evaluate(&f, &[equals]).matched_keywords, vec!["example.com"]);

        let starts = rule(3, ConditionField::Subject, Operator::StartsWith, "quarterly", 10);
        assert!(evaluate(&f, &[starts]).should_hold);

        let ends = rule(4, ConditionField::Sender, Operator::EndsWith, "example.com", 10);
        assert!(!evaluate(&f, &[ends]).should_hold, "sender ends with '>'");

        let recipient = rule(5, ConditionField::Recipient, Operator::Contains, "OPS@", 10);
        assert!(evaluate(&f, &[recipient]).should_hold);
    }

    #[test]
    fn regex_rules() {
        let f = fields("Order #12345 shipped", "", "a@b.example");
        let mut re = rule(1, ConditionField::Subject, Operator::Regex, r"order\s+#\d{5}", 20);
        let eval = evaluate(&f, &[re.clone()]);
        assert_eq!(eval.matched_keywords, vec![r"order\s+#\d{5}"]);

        // A comma is part of the pattern, not a separator.
        re.value = r"\d{2,3}".into();
        assert!(evaluate(&f, &[re.clone()]).should_hold);

        re.value = "([unclosed".into();
        let other = rule(2, ConditionField::Subject, Operator::Contains, "shipped", 5);
        let eval = evaluate(&f, &[re, other]);
        assert_eq!(eval.matched_rules.len(), 1);
        assert_eq!(eval.matched_rules[0].id, 2);
    }

    #[test]
    fn regex_rule_type_forces_regex() {
        let mut r = rule(1, ConditionField::Body, Operator::Contains, "^wire.*now$", 9);
        r.rule_type = RuleType::Regex;
        assert!(evaluate(&fields("wire funds", "now", "a@b.example"), &[r]).should_hold);
    }

    #[test]
    fn ordering_risk_cap_and_skips() {
        let mut inactive = rule(9, ConditionField::Subject, Operator::Contains, "x", 100);
        inactive.is_active = false;
        let blank = rule(8, ConditionField::Subject, Operator::Contains, "   ", 100);
        let rules = [
            rule(3, ConditionField::Subject, Operator::Contains, "x", 60),
            rule(1, ConditionField::Subject, Operator::Contains, "x", 60),
            rule(2, ConditionField::Subject, Operator::Contains, "x", 0),
            inactive,
            blank,
        ];
        let eval = evaluate(&fields("x", "", "a@b.example"), &rules);
        let ids: Vec<_> = eval.matched_rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        assert_eq!(eval.risk_score, 100);
    }

    #[test]
    fn zero_priority_counts_as_one() {
        let eval = evaluate(
            &fields("x", "", "a@b.example"),
            &[rule(1, ConditionField::Subject, Operator::Contains, "x", 0)],
        );
        assert_eq!(eval.risk_score, 1);
    }

    #[test]
    fn any_match_holds_even_for_flag_action() {
        let mut flag = rule(1, ConditionField::Subject, Operator::Contains, "x", 5);
        flag.action = RuleAction::Flag;
        assert!(evaluate(&fields("x", "", "a@b.example"), &[flag]).should_hold);
    }

    #[test]
    fn legacy_sender_rule_on_body_field() {
        let mut r = rule(1, ConditionField::Body, Operator::Contains, "spammer.example", 5);
        r.rule_type = RuleType::Sender;
        assert!(evaluate(&fields("hi", "", "bob@spammer.example"), &[r.clone()]).should_hold);
        assert!(!evaluate(&fields("hi", "spammer.example", "bob@ok.example"), &[r]).should_hold);
    }

    #[test]
    fn domain_extraction() {
        assert_eq!(sender_domain("Bob <Bob@Mail.Example.ORG>"), "mail.example.org");
        assert_eq!(sender_domain("no-at-sign"), "");
    }
}
