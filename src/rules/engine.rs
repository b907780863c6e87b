//! Condition evaluation, action execution, and the fixed-point driver
//! (C3), ported from `original_source/src/rules/io.py`'s
//! `check_condition`/`run_action`/`apply_rules_to_transaction`.

use bigdecimal::BigDecimal;
use regex::RegexBuilder;

use crate::model::{CategoryTree, DataOrigin, Subject, Transaction};
use crate::rules::domain::{Action, BoolOp, Condition, NumericOp, Rule};

/// A bound well above any realistic rule set; exists purely to turn a
/// cyclic rule set into a logged warning instead of a hang (spec.md §4.3).
const MAX_FIXED_POINT_ITERATIONS: usize = 32;

enum FieldValue {
    Text(Option<String>),
    List(Vec<String>),
    Number(BigDecimal),
}

fn resolve_field(transaction: &Transaction, path: &str) -> Option<FieldValue> {
    match path {
        "type" => Some(FieldValue::Text(Some(transaction.r#type.as_str().to_owned()))),
        "keywords" => Some(FieldValue::List(transaction.keywords.iter().cloned().collect())),
        "tags" => Some(FieldValue::List(transaction.tags.clone())),
        "source" => Some(FieldValue::Text(transaction.source.name().map(str::to_owned))),
        "destination" => Some(FieldValue::Text(transaction.destination.name().map(str::to_owned))),
        "category" => Some(FieldValue::Text(transaction.category.as_ref().map(|c| c.name.clone()))),
        "comment" => Some(FieldValue::Text(Some(transaction.comment.clone()))),
        "currency" => Some(FieldValue::Text(Some(transaction.currency.clone()))),
        "amount" => Some(FieldValue::Number(transaction.amount.clone())),
        _ => path
            .strip_prefix("details.")
            .map(|key| FieldValue::Text(transaction.details.get(key).cloned())),
    }
}

fn check_match_condition(condition: &crate::rules::domain::MatchCondition, transaction: &Transaction) -> bool {
    use crate::rules::domain::RegexMode;

    let Some(field) = resolve_field(transaction, &condition.field_path) else {
        return false;
    };

    let combine = |acc: bool, next: bool| match condition.op {
        BoolOp::And => acc && next,
        BoolOp::Or => acc || next,
    };
    let initial = matches!(condition.op, BoolOp::And);

    match field {
        FieldValue::List(items) => condition
            .values
            .iter()
            .fold(initial, |acc, v| combine(acc, items.contains(v))),
        FieldValue::Text(None) => false,
        FieldValue::Text(Some(text)) => condition.values.iter().fold(initial, |acc, v| {
            let matched = match condition.regex_mode {
                RegexMode::None => &text == v,
                RegexMode::Search | RegexMode::Match => {
                    match RegexBuilder::new(v).case_insensitive(true).build() {
                        Ok(re) => match condition.regex_mode {
                            RegexMode::Search => re.is_match(&text),
                            RegexMode::Match => re.find(&text).is_some_and(|m| m.start() == 0),
                            RegexMode::None => unreachable!(),
                        },
                        Err(_) => false,
                    }
                }
            };
            combine(acc, matched)
        }),
        FieldValue::Number(_) => false,
    }
}

fn check_numeric_condition(condition: &crate::rules::domain::NumericCondition, transaction: &Transaction) -> bool {
    let Some(FieldValue::Number(value)) = resolve_field(transaction, &condition.field_path) else {
        return false;
    };
    let value = if condition.absolute { value.abs() } else { value };
    match condition.op {
        NumericOp::Eq => value == condition.value,
        NumericOp::Ne => value != condition.value,
        NumericOp::Lt => value < condition.value,
        NumericOp::Le => value <= condition.value,
        NumericOp::Gt => value > condition.value,
        NumericOp::Ge => value >= condition.value,
    }
}

fn check_condition(condition: &Condition, transaction: &Transaction) -> bool {
    match condition {
        Condition::Match(c) => check_match_condition(c, transaction),
        Condition::Numeric(c) => check_numeric_condition(c, transaction),
    }
}

fn matching_rules<'a>(rules: &'a [Rule], transaction: &Transaction) -> impl Iterator<Item = &'a Rule> {
    rules
        .iter()
        .filter(move |rule| rule.conditions.iter().all(|c| check_condition(c, transaction)))
}

/// Renders `template`, substituting every `{field.path}` placeholder with
/// the text form of the resolved field. Returns `Err` with the offending
/// path when a placeholder cannot be resolved (spec.md §7,
/// `RuleTemplateFailure`).
fn render_template(transaction: &Transaction, template: &str) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            out.push_str(rest);
            return Ok(out);
        };
        out.push_str(&rest[..open]);
        let path = &rest[open + 1..open + close];
        match resolve_field(transaction, path) {
            Some(FieldValue::Text(Some(text))) => out.push_str(&text),
            Some(FieldValue::Number(n)) => out.push_str(&n.to_string()),
            Some(FieldValue::List(items)) => out.push_str(&items.join(", ")),
            Some(FieldValue::Text(None)) | None => return Err(path.to_owned()),
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn write_field(transaction: &mut Transaction, field: &str, value: String, categories: &CategoryTree) -> Result<(), String> {
    match field {
        "source" => transaction.source = Subject::Issuer { name: value },
        "destination" => transaction.destination = Subject::Recipient { name: value },
        "comment" => transaction.comment = value,
        "category" => {
            transaction.category = Some(
                categories
                    .get(&value)
                    .cloned()
                    .ok_or_else(|| format!("unknown category id {value}"))?,
            )
        }
        other => return Err(format!("cannot set unknown field {other}")),
    }
    transaction.mark_origin(field, DataOrigin::Rules);
    Ok(())
}

fn run_set(transaction: &Transaction, field: &str, template: &str, categories: &CategoryTree) -> Result<Transaction, String> {
    let mut updated = transaction.clone();
    let rendered = if field == "category" {
        template.to_owned()
    } else {
        render_template(transaction, template)?
    };
    write_field(&mut updated, field, rendered, categories)?;
    Ok(updated)
}

fn run_set_from_capture(
    transaction: &Transaction,
    field: &str,
    source_path: &str,
    pattern: &str,
    group: usize,
    categories: &CategoryTree,
) -> Result<Transaction, String> {
    let source_text = match resolve_field(transaction, source_path) {
        Some(FieldValue::Text(Some(text))) => text,
        Some(FieldValue::Number(n)) => n.to_string(),
        _ => return Err(format!("cannot resolve capture source {source_path}")),
    };
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| e.to_string())?;
    let captured = regex
        .captures(&source_text)
        .and_then(|caps| caps.get(group))
        .map(|m| m.as_str().to_owned())
        .unwrap_or(source_text);

    let mut updated = transaction.clone();
    write_field(&mut updated, field, captured, categories)?;
    Ok(updated)
}

fn run_add(transaction: &Transaction, field: &str, values: &[String]) -> Result<Transaction, String> {
    let mut updated = transaction.clone();
    match field {
        "tags" => {
            for value in values {
                updated.push_tag(value.clone());
            }
        }
        other => return Err(format!("cannot add to unknown field {other}")),
    }
    updated.mark_origin(field, DataOrigin::Rules);
    Ok(updated)
}

fn run_action(transaction: &Transaction, action: &Action, categories: &CategoryTree) -> Transaction {
    let result = match action {
        Action::Set { field, template } => run_set(transaction, field, template, categories),
        Action::SetFromCapture { field, source_path, regex, group } => {
            run_set_from_capture(transaction, field, source_path, regex, *group, categories)
        }
        Action::Add { field, values } => run_add(transaction, field, values),
    };
    match result {
        Ok(updated) => updated,
        Err(reason) => {
            tracing::warn!(action = ?action, %reason, "rule template failure, skipping action");
            transaction.clone()
        }
    }
}

fn process_once(rules: &[Rule], transaction: &Transaction, categories: &CategoryTree) -> Transaction {
    matching_rules(rules, transaction)
        .flat_map(|rule| rule.actions.iter())
        .fold(transaction.clone(), |acc, action| run_action(&acc, action, categories))
}

/// Applies every matching rule's actions, re-evaluating from scratch
/// after each pass until the output stops changing (spec.md §4.3). Stops
/// early, with a warning, if no fixed point is reached within
/// [`MAX_FIXED_POINT_ITERATIONS`] passes — a cyclic rule set is a
/// configuration bug, not a crash.
pub fn apply_rules_to_transaction(rules: &[Rule], transaction: &Transaction, categories: &CategoryTree) -> Transaction {
    let mut current = transaction.clone();
    for _ in 0..MAX_FIXED_POINT_ITERATIONS {
        let next = process_once(rules, &current, categories);
        if next == current {
            return next;
        }
        current = next;
    }
    tracing::warn!("rule set did not reach a fixed point within the iteration budget, likely a cycle");
    current
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bigdecimal::FromPrimitive;
    use chrono::NaiveDate;

    use super::*;
    use crate::model::{Category, LogKind, StatusFlags, TransactionType};
    use crate::rules::domain::{match_all, match_eq};

    fn sample_transaction() -> Transaction {
        Transaction {
            seq: 0,
            transaction_id: None,
            kind: LogKind::BankAccount,
            r#type: TransactionType::ReceivedTransfer,
            currency: "EUR".to_owned(),
            amount: BigDecimal::from_i32(4200).unwrap() / 100,
            balance: Some(BigDecimal::from_i32(10000).unwrap() / 100),
            value_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            source: Subject::UnknownSubject,
            destination: Subject::LocalAccount { id: "acc-1".into(), name: "Main".into() },
            account: None,
            card: None,
            details: BTreeMap::new(),
            keywords: ["PAYPAL", "MOLESKINE"].into_iter().map(String::from).collect(),
            comment: String::new(),
            category: None,
            tags: Vec::new(),
            flags: Default::default(),
            status_flags: StatusFlags::default(),
        }
    }

    #[test]
    fn set_action_marks_field_origin() {
        let categories = CategoryTree::new(vec![]).unwrap();
        let rule = Rule {
            conditions: vec![match_eq("type", "received_transfer")],
            actions: vec![Action::Set { field: "source".into(), template: "Agencia Tributaria".into() }],
        };
        let updated = apply_rules_to_transaction(&[rule], &sample_transaction(), &categories);
        assert_eq!(updated.source, Subject::Issuer { name: "Agencia Tributaria".into() });
        assert_eq!(updated.flags.get("source"), Some(&DataOrigin::Rules));
    }

    #[test]
    fn fixed_point_reapplies_rules_after_a_capture_sets_keywords_relevant_field() {
        let categories = CategoryTree::new(vec![Category {
            id: "books".into(),
            name: "Books".into(),
            parent_id: None,
        }]).unwrap();

        let mut tx = sample_transaction();
        tx.destination = Subject::Recipient { name: "Paypal *Moleskine".into() };

        let rules = vec![
            Rule {
                conditions: vec![match_all("keywords", vec!["PAYPAL".into(), "MOLESKINE".into()])],
                actions: vec![Action::SetFromCapture {
                    field: "destination".into(),
                    source_path: "destination".into(),
                    regex: r"\*(\w+)".into(),
                    group: 1,
                }],
            },
            Rule {
                conditions: vec![match_eq("destination", "Moleskine")],
                actions: vec![Action::Set { field: "category".into(), template: "books".into() }],
            },
        ];

        let updated = apply_rules_to_transaction(&rules, &tx, &categories);
        assert_eq!(updated.destination, Subject::Recipient { name: "Moleskine".into() });
        assert_eq!(updated.category.map(|c| c.id), Some("books".into()));
    }

    #[test]
    fn add_action_deduplicates_tags() {
        let categories = CategoryTree::new(vec![]).unwrap();
        let rule = Rule {
            conditions: vec![match_eq("type", "received_transfer")],
            actions: vec![Action::Add { field: "tags".into(), values: vec!["recurring".into(), "recurring".into()] }],
        };
        let updated = apply_rules_to_transaction(&[rule], &sample_transaction(), &categories);
        assert_eq!(updated.tags, vec!["recurring".to_owned()]);
    }

    #[test]
    fn template_failure_is_recoverable() {
        let categories = CategoryTree::new(vec![]).unwrap();
        let rule = Rule {
            conditions: vec![match_eq("type", "received_transfer")],
            actions: vec![Action::Set { field: "comment".into(), template: "{details.missing}".into() }],
        };
        let tx = sample_transaction();
        let updated = apply_rules_to_transaction(&[rule], &tx, &categories);
        assert_eq!(updated.comment, tx.comment);
    }
}
