//! Moderation rule types.
//!
//! Rows are parsed into these closed enums when loaded; a row with a value
//! outside them never reaches the engine.

use serde::{Deserialize, Serialize};

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Parse from database string representation, ignoring case.
            #[must_use]
            pub fn parse(s: &str) -> Option<Self> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Convert to database string representation.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// What kind of rule this is. Mostly informational; `REGEX` also forces
    /// regex matching.
    RuleType {
        /// Keyword list.
        Keyword => "KEYWORD",
        /// Sender match.
        Sender => "SENDER",
        /// Recipient match.
        Recipient => "RECIPIENT",
        /// Sender domain match.
        Domain => "DOMAIN",
        /// Regular expression.
        Regex => "REGEX",
        /// Attachment match.
        Attachment => "ATTACHMENT",
    }
}

string_enum! {
    /// Message field a rule looks at.
    ConditionField {
        /// Subject only.
        Subject => "SUBJECT",
        /// Subject and body.
        Body => "BODY",
        /// Sender address.
        Sender => "SENDER",
        /// All recipients.
        Recipient => "RECIPIENT",
        /// Lowercased domain of the sender.
        SenderDomain => "SENDER_DOMAIN",
    }
}

string_enum! {
    /// How the rule value is compared, always case-insensitively.
    Operator {
        /// Substring.
        Contains => "CONTAINS",
        /// Whole field.
        Equals => "EQUALS",
        /// Prefix.
        StartsWith => "STARTS_WITH",
        /// Suffix.
        EndsWith => "ENDS_WITH",
        /// Regular expression search.
        Regex => "REGEX",
    }
}

string_enum! {
    /// What a match asks for.
    RuleAction {
        /// Hold for review.
        Hold => "HOLD",
        /// Let through.
        Approve => "APPROVE",
        /// Reject.
        Reject => "REJECT",
        /// Move to quarantine.
        Quarantine => "QUARANTINE",
        /// Mark only.
        Flag => "FLAG",
        /// Legacy spelling of hold.
        Block => "BLOCK",
    }
}

impl RuleAction {
    /// Actions that put the message on hold.
    #[must_use]
    pub const fn holds(self) -> bool {
        matches!(self, Self::Hold | Self::Quarantine | Self::Reject | Self::Block)
    }
}

/// A typed moderation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Row id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Rule type.
    pub rule_type: RuleType,
    /// Field examined.
    pub field: ConditionField,
    /// Comparison.
    pub operator: Operator,
    /// Comma-separated terms, or one pattern for regex rules.
    pub value: String,
    /// Action on match.
    pub action: RuleAction,
    /// 0..=100, higher first.
    pub priority: u8,
    /// Inactive rules are skipped.
    pub is_active: bool,
}

impl Rule {
    /// Field actually evaluated. Legacy SENDER and RECIPIENT rules stored
    /// with the BODY field look at the sender or recipients.
    #[must_use]
    pub const fn effective_field(&self) -> ConditionField {
        match (self.rule_type, self.field) {
            (RuleType::Sender, ConditionField::Body) => ConditionField::Sender,
            (RuleType::Recipient, ConditionField::Body) => ConditionField::Recipient,
            (_, field) => field,
        }
    }

    /// Regex rules match the whole value as one pattern.
    #[must_use]
    pub const fn is_regex(&self) -> bool {
        matches!(self.rule_type, RuleType::Regex) || matches!(self.operator, Operator::Regex)
    }
}

/// Fields for inserting a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRule {
    /// Display name.
    pub name: String,
    /// Rule type.
    pub rule_type: RuleType,
    /// Field examined.
    pub field: ConditionField,
    /// Comparison.
    pub operator: Operator,
    /// Terms or pattern.
    pub value: String,
    /// Action on match.
    pub action: RuleAction,
    /// 0..=100.
    pub priority: u8,
    /// Active flag.
    pub is_active: bool,
}

impl NewRule {
    /// Active `KEYWORD`/`CONTAINS` hold rule.
    #[must_use]
    pub fn keyword(name: &str, field: ConditionField, value: &str, priority: u8) -> Self {
        Self {
            name: name.to_string(),
            rule_type: RuleType::Keyword,
            field,
            operator: Operator::Contains,
            value: value.to_string(),
            action: RuleAction::Hold,
            priority,
            is_active: true,
        }
    }
}
