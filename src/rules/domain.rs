//! Declarative condition/action data types (C3), ported from
//! `original_source/src/rules/domain.py`.

use bigdecimal::BigDecimal;

/// How a [`MatchCondition`]'s per-value checks combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// How each value in a [`MatchCondition`] is compared against the
/// resolved field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexMode {
    /// Plain equality (or list membership, for list-valued fields).
    None,
    /// `regex.search` semantics: matches anywhere in the field.
    Search,
    /// `regex.match` semantics: matches from the start of the field.
    Match,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

#[derive(Debug, Clone)]
pub struct MatchCondition {
    pub field_path: String,
    pub values: Vec<String>,
    pub op: BoolOp,
    pub regex_mode: RegexMode,
}

#[derive(Debug, Clone)]
pub struct NumericCondition {
    pub field_path: String,
    pub value: BigDecimal,
    pub op: NumericOp,
    pub absolute: bool,
}

#[derive(Debug, Clone)]
pub enum Condition {
    Match(MatchCondition),
    Numeric(NumericCondition),
}

#[derive(Debug, Clone)]
pub enum Action {
    /// Sets `field` to the rendered `template` (literal text, or text with
    /// `{field.path}` placeholders resolved against the transaction).
    Set { field: String, template: String },
    /// Sets `field` to a capture group of `regex` applied to the text
    /// resolved at `source_path`, falling back to the whole source text
    /// when the regex does not match.
    SetFromCapture {
        field: String,
        source_path: String,
        regex: String,
        group: usize,
    },
    /// Appends each of `values` to a list-valued field, skipping
    /// duplicates.
    Add { field: String, values: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

pub fn match_eq(field_path: impl Into<String>, value: impl Into<String>) -> Condition {
    Condition::Match(MatchCondition {
        field_path: field_path.into(),
        values: vec![value.into()],
        op: BoolOp::And,
        regex_mode: RegexMode::None,
    })
}

pub fn match_all(field_path: impl Into<String>, values: Vec<String>) -> Condition {
    Condition::Match(MatchCondition {
        field_path: field_path.into(),
        values,
        op: BoolOp::And,
        regex_mode: RegexMode::None,
    })
}

pub fn match_any(field_path: impl Into<String>, values: Vec<String>) -> Condition {
    Condition::Match(MatchCondition {
        field_path: field_path.into(),
        values,
        op: BoolOp::Or,
        regex_mode: RegexMode::None,
    })
}
