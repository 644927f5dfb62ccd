//! Moderation rules and their evaluation.

mod engine;
mod model;

pub use engine::{Evaluation, MessageFields, RuleRef, evaluate};
pub use model::{ConditionField, NewRule, Operator, Rule, RuleAction, RuleType};
