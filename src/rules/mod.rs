//! Rule Engine (C3): declarative conditions/actions over canonical
//! transactions, applied to a fixed point.

pub mod domain;
pub mod engine;

pub use domain::{Action, BoolOp, Condition, MatchCondition, NumericCondition, NumericOp, RegexMode, Rule};
pub use engine::apply_rules_to_transaction;
