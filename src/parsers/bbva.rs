//! `bbva` provider parser (C2): one of the two shipped provider parsers,
//! deliberately incompatible with [`crate::parsers::erste`]'s raw JSON
//! shape. Floating-point amount plus a separate currency node, and the
//! richest opcode→type dispatch table of the two, ported from
//! `original_source/src/bank/bbva/parsing.py`.

use std::collections::BTreeMap;

use bigdecimal::{BigDecimal, FromPrimitive};
use serde_json::Value;

use crate::error::{BankingError, Result};
use crate::keywords::{extract_keywords, get_nested, get_nested_str};
use crate::model::{
    DataOrigin, LogKind, StatusFlags, Subject, Transaction, TransactionDirection, TransactionType,
    WalletRef,
};
use crate::parsers::{decode_date, title_case};

/// Nested field paths scanned for keyword tokens, regardless of
/// transaction type (spec.md §4.2.4).
const KEYWORD_FIELDS: &[&str] = &[
    "name",
    "humanConceptName",
    "concept.name",
    "extendedName",
    "humanExtendedConceptName",
    "cardTransactionDetail.concept.name",
    "cardTransactionDetail.concept.shop.name",
    "wireTransactionDetail.sender.person.name",
];

/// Opcode → type dispatch, parameterized by direction (spec.md §4.2.2).
/// Unknown codes fall through to `TransactionType::Unknown`, which is not
/// itself an error (spec.md §7, `TypeUnknown`).
fn classify_type(opcode: &str, direction: TransactionDirection) -> TransactionType {
    use TransactionDirection::{Charge, Income};
    use TransactionType::*;

    const PAYCHECK: &[&str] = &["0114"];
    const PURCHASE: &[&str] = &["0017", "00400", "0005"];
    const TRANSFER: &[&str] = &["0149", "0064"];
    const WITHDRAWAL: &[&str] = &["0022", "00200", "0007"];
    const DOMICILED_RECEIPT: &[&str] = &["0058"];
    const CREDIT_CARD_INVOICE: &[&str] = &["0060", "0070"];

    if PURCHASE.contains(&opcode) {
        return match direction {
            Charge => Purchase,
            Income => PurchaseReturn,
        };
    }
    if TRANSFER.contains(&opcode) {
        return match direction {
            Charge => IssuedTransfer,
            Income => ReceivedTransfer,
        };
    }
    if PAYCHECK.contains(&opcode) {
        return match direction {
            Charge => Unknown,
            Income => ReceivedTransfer,
        };
    }
    if WITHDRAWAL.contains(&opcode) {
        return match direction {
            Charge => AtmWithdrawal,
            Income => Unknown,
        };
    }
    if DOMICILED_RECEIPT.contains(&opcode) {
        return match direction {
            Charge => DomiciledReceipt,
            Income => ReturnDeposit,
        };
    }
    if CREDIT_CARD_INVOICE.contains(&opcode) {
        return match direction {
            Charge => CreditCardInvoice,
            Income => CreditCardInvoicePayment,
        };
    }
    Unknown
}

fn decode_amount(node: &Value) -> Result<(BigDecimal, String)> {
    let amount = get_nested(node, "amount")
        .and_then(Value::as_f64)
        .and_then(BigDecimal::from_f64)
        .ok_or_else(|| BankingError::ParseFailure("missing or non-numeric amount".into()))?;
    let currency = get_nested_str(node, "currency.code")
        .ok_or_else(|| BankingError::ParseFailure("missing amount.currency.code".into()))?
        .to_owned();
    Ok((amount, currency))
}

fn title_detail(raw: &Value, path: &str) -> Option<String> {
    get_nested_str(raw, path).map(title_case)
}

fn get_source(
    details: &BTreeMap<String, String>,
    account: &WalletRef,
    bank: &WalletRef,
    kind: TransactionType,
) -> Subject {
    use TransactionType::*;
    match kind {
        AtmWithdrawal | IssuedTransfer | CreditCardInvoice | CreditCardInvoicePayment
        | DomiciledReceipt | MortgageReceipt | BankCommission | Purchase => {
            Subject::Account { id: account.id.clone(), name: account.name.clone() }
        }
        BankCommissionReturn => Subject::Bank { id: bank.id.clone(), name: bank.name.clone() },
        ReturnDeposit => details
            .get("creditor_name")
            .map(|n| Subject::Issuer { name: n.clone() })
            .unwrap_or(Subject::UnknownSubject),
        ReceivedTransfer => details
            .get("issuer_name")
            .map(|n| Subject::Issuer { name: n.clone() })
            .unwrap_or(Subject::UnknownSubject),
        PurchaseReturn => details
            .get("shop_name")
            .map(|n| Subject::Issuer { name: n.clone() })
            .unwrap_or(Subject::UnknownSubject),
        Unknown => Subject::UnknownSubject,
    }
}

fn get_destination(
    details: &BTreeMap<String, String>,
    account: &WalletRef,
    bank: &WalletRef,
    kind: TransactionType,
) -> Subject {
    use TransactionType::*;
    match kind {
        ReceivedTransfer | BankCommissionReturn | ReturnDeposit | PurchaseReturn => {
            Subject::Account { id: account.id.clone(), name: account.name.clone() }
        }
        AtmWithdrawal => Subject::UnknownWallet,
        CreditCardInvoice | MortgageReceipt | BankCommission | CreditCardInvoicePayment => {
            Subject::Bank { id: bank.id.clone(), name: bank.name.clone() }
        }
        IssuedTransfer => details
            .get("beneficiary")
            .map(|n| Subject::Recipient { name: n.clone() })
            .unwrap_or(Subject::UnknownSubject),
        DomiciledReceipt => details
            .get("creditor_name")
            .map(|n| Subject::Recipient { name: n.clone() })
            .unwrap_or(Subject::UnknownSubject),
        Purchase => details
            .get("shop_name")
            .map(|n| Subject::Recipient { name: n.clone() })
            .unwrap_or(Subject::UnknownSubject),
        Unknown => Subject::UnknownSubject,
    }
}

fn account_transaction_details(raw: &Value, kind: TransactionType) -> BTreeMap<String, String> {
    use TransactionType::*;
    let mut details = BTreeMap::new();
    match kind {
        Purchase => {
            if let Some(name) = ["comments.0.text", "cardTransactionDetail.shop.name", "humanConceptName"]
                .iter()
                .find_map(|p| title_detail(raw, p))
            {
                details.insert("shop_name".to_owned(), name);
            }
            if let Some(activity) = get_nested_str(raw, "cardTransactionDetail.shop.businessActivity.name") {
                details.insert("activity".to_owned(), activity.to_owned());
            }
        }
        AtmWithdrawal => {
            if let Some(atm_name) = get_nested_str(raw, "cardTransactionDetail.shop.name")
                .or_else(|| get_nested_str(raw, "extendedName"))
            {
                details.insert("atm_name".to_owned(), atm_name.to_owned());
            }
        }
        IssuedTransfer => {
            if let Some(beneficiary) = title_detail(raw, "wireTransactionDetail.sender.person.name") {
                details.insert("beneficiary".to_owned(), beneficiary);
            }
            if let Some(concept) = get_nested_str(raw, "humanExtendedConceptName") {
                details.insert("concept".to_owned(), concept.to_owned());
            }
        }
        ReceivedTransfer => {
            if let Some(account_number) = get_nested_str(raw, "wireTransactionDetail.sender.account.formats.ccc") {
                details.insert("origin_account_number".to_owned(), account_number.to_owned());
            }
            if let Some(issuer) = get_nested_str(raw, "wireTransactionDetail.sender.person.name") {
                details.insert("issuer_name".to_owned(), issuer.to_owned());
            }
            if let Some(concept) = get_nested_str(raw, "humanExtendedConceptName") {
                details.insert("concept".to_owned(), concept.to_owned());
            }
        }
        DomiciledReceipt => {
            if let Some(creditor) = get_nested_str(raw, "billTransactionDetail.creditor.name") {
                details.insert("creditor_name".to_owned(), creditor.to_owned());
            }
            if let Some(concept) = title_detail(raw, "billTransactionDetail.extendedBillConceptName")
                .or_else(|| title_detail(raw, "extendedName"))
            {
                details.insert("concept".to_owned(), concept);
            }
        }
        ReturnDeposit => {
            if let Some(reason) = title_detail(raw, "billTransactionDetail.extendedIntentionName") {
                details.insert("return_reason".to_owned(), reason);
            }
        }
        _ => {}
    }
    details
}

fn card_transaction_details(raw: &Value, kind: TransactionType) -> BTreeMap<String, String> {
    let mut details = BTreeMap::new();
    if kind == TransactionType::Purchase {
        if let Some(name) = title_detail(raw, "shop.name") {
            details.insert("shop_name".to_owned(), name);
        }
    }
    details
}

fn comment_for(details: &BTreeMap<String, String>, kind: TransactionType) -> String {
    use TransactionType::*;
    match kind {
        IssuedTransfer | ReceivedTransfer | DomiciledReceipt => {
            details.get("concept").cloned().unwrap_or_default()
        }
        ReturnDeposit => details.get("return_reason").cloned().unwrap_or_default(),
        _ => String::new(),
    }
}

/// `parse_account_transaction(bank_cfg, account_cfg, raw) -> Transaction | null`
/// (spec.md §4.2).
pub fn parse_account_transaction(
    bank: &WalletRef,
    account: &WalletRef,
    raw: &Value,
) -> Result<Option<Transaction>> {
    let (amount, currency) = decode_amount(raw)?;
    let mut opcode = get_nested_str(raw, "scheme.subCategory.id")
        .ok_or_else(|| BankingError::ParseFailure("missing scheme.subCategory.id".into()))?;
    let fallback;
    if opcode == "0054" {
        fallback = get_nested_str(raw, "concept.id")
            .ok_or_else(|| BankingError::ParseFailure("missing concept.id for opcode 0054".into()))?
            .to_owned();
        opcode = &fallback;
    }
    let direction = TransactionDirection::from_amount(&amount);
    let kind = classify_type(opcode, direction);

    let mut details = account_transaction_details(raw, kind);
    let source = get_source(&details, account, bank, kind);
    let destination = get_destination(&details, account, bank, kind);
    let comment = comment_for(&details, kind);
    details.remove("return_reason");

    let balance = get_nested(raw, "balance.availableBalance.amount")
        .and_then(Value::as_f64)
        .and_then(BigDecimal::from_f64)
        .ok_or_else(|| BankingError::ParseFailure("missing balance.availableBalance.amount".into()))?;
    let value_date = decode_date(
        get_nested_str(raw, "valueDate")
            .ok_or_else(|| BankingError::ParseFailure("missing valueDate".into()))?,
    )?;
    let transaction_date = decode_date(
        get_nested_str(raw, "transactionDate")
            .ok_or_else(|| BankingError::ParseFailure("missing transactionDate".into()))?,
    )?;
    let keywords = extract_keywords(raw, KEYWORD_FIELDS.iter().copied(), &details);

    Ok(Some(Transaction {
        seq: 0,
        transaction_id: get_nested_str(raw, "id").map(str::to_owned),
        kind: LogKind::BankAccount,
        r#type: kind,
        currency,
        amount,
        balance: Some(balance),
        value_date,
        transaction_date,
        source,
        destination,
        account: Some(account.clone()),
        card: None,
        details,
        keywords,
        comment,
        category: None,
        tags: Vec::new(),
        flags: [("source".to_owned(), DataOrigin::Original), ("destination".to_owned(), DataOrigin::Original)]
            .into_iter()
            .collect(),
        status_flags: StatusFlags::default(),
    }))
}

/// `parse_credit_card_transaction(bank_cfg, account_cfg, card_cfg, raw) -> Transaction | null`.
/// "Debit" and non-consolidated (pending) records are not discarded: both
/// are stored with `status_flags.invalid = true` so matching ignores them
/// until the Reconciler pairs them with a later divergence resolution
/// (spec.md §4.2 point 6).
pub fn parse_credit_card_transaction(
    bank: &WalletRef,
    account: &WalletRef,
    card: &WalletRef,
    raw: &Value,
) -> Result<Option<Transaction>> {
    let (amount, currency) = decode_amount(raw)?;
    let mut opcode = get_nested_str(raw, "concept.id")
        .ok_or_else(|| BankingError::ParseFailure("missing concept.id".into()))?
        .to_owned();
    if opcode == "0000" {
        opcode = "0005".to_owned();
    }
    let direction = TransactionDirection::from_amount(&amount);
    let kind = classify_type(&opcode, direction);

    let details = card_transaction_details(raw, kind);
    let source = get_source(&details, account, bank, kind);
    let destination = get_destination(&details, account, bank, kind);
    let comment = comment_for(&details, kind);

    let value_date = decode_date(
        get_nested_str(raw, "valueDate")
            .ok_or_else(|| BankingError::ParseFailure("missing valueDate".into()))?,
    )?;
    let transaction_date = decode_date(
        get_nested_str(raw, "transactionDate")
            .ok_or_else(|| BankingError::ParseFailure("missing transactionDate".into()))?,
    )?;
    let keywords = extract_keywords(raw, KEYWORD_FIELDS.iter().copied(), &details);

    let is_debit = get_nested_str(raw, "operationTypeIndicator") == Some("D");
    let is_consolidated = get_nested_str(raw, "status.id") == Some("7");

    Ok(Some(Transaction {
        seq: 0,
        transaction_id: get_nested_str(raw, "id").map(str::to_owned),
        kind: LogKind::BankCreditCard,
        r#type: kind,
        currency,
        amount,
        balance: None,
        value_date,
        transaction_date,
        source,
        destination,
        account: None,
        card: Some(card.clone()),
        details,
        keywords,
        comment,
        category: None,
        tags: Vec::new(),
        flags: [("source".to_owned(), DataOrigin::Original), ("destination".to_owned(), DataOrigin::Original)]
            .into_iter()
            .collect(),
        status_flags: StatusFlags { invalid: is_debit || !is_consolidated, valid_duplicate: false },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> WalletRef {
        WalletRef { id: "bbva".into(), name: "BBVA".into() }
    }
    fn account() -> WalletRef {
        WalletRef { id: "acc-1".into(), name: "Main account".into() }
    }

    #[test]
    fn parses_a_purchase_and_fills_recipient_destination() {
        let raw = serde_json::json!({
            "id": "tx-1",
            "amount": { "amount": -42.5, "currency": { "code": "EUR" } },
            "balance": { "availableBalance": { "amount": 1000.0 } },
            "valueDate": "2024-03-01T00:00:00+0100",
            "transactionDate": "2024-03-01T00:00:00+0100",
            "scheme": { "subCategory": { "id": "0017" } },
            "humanConceptName": "Coffee Shop",
        });

        let tx = parse_account_transaction(&bank(), &account(), &raw)
            .expect("no error")
            .expect("not filtered");
        assert_eq!(tx.r#type, TransactionType::Purchase);
        assert_eq!(tx.destination, Subject::Recipient { name: "Coffee Shop".into() });
        assert_eq!(tx.source, Subject::Account { id: "acc-1".into(), name: "Main account".into() });
        assert!(tx.keywords.contains("COFFEE"));
    }

    #[test]
    fn unknown_opcode_yields_unknown_type_not_an_error() {
        let raw = serde_json::json!({
            "id": "tx-2",
            "amount": { "amount": -5.0, "currency": { "code": "EUR" } },
            "balance": { "availableBalance": { "amount": 995.0 } },
            "valueDate": "2024-03-01T00:00:00+0100",
            "transactionDate": "2024-03-01T00:00:00+0100",
            "scheme": { "subCategory": { "id": "9999" } },
        });

        let tx = parse_account_transaction(&bank(), &account(), &raw)
            .expect("no error")
            .expect("not filtered");
        assert_eq!(tx.r#type, TransactionType::Unknown);
        assert_eq!(tx.source, Subject::UnknownSubject);
    }

    #[test]
    fn credit_card_debit_transaction_is_stored_but_invalid() {
        let raw = serde_json::json!({
            "id": "cc-1",
            "amount": { "amount": -12.0, "currency": { "code": "EUR" } },
            "valueDate": "2024-03-02T00:00:00+0100",
            "transactionDate": "2024-03-02T00:00:00+0100",
            "concept": { "id": "0017" },
            "operationTypeIndicator": "D",
            "status": { "id": "7" },
        });

        let tx = parse_credit_card_transaction(&bank(), &account(), &account(), &raw)
            .expect("no error")
            .expect("not filtered");
        assert!(tx.status_flags.invalid);
    }

    #[test]
    fn credit_card_non_consolidated_transaction_is_marked_invalid() {
        let raw = serde_json::json!({
            "id": "cc-2",
            "amount": { "amount": -12.0, "currency": { "code": "EUR" } },
            "valueDate": "2024-03-02T00:00:00+0100",
            "transactionDate": "2024-03-02T00:00:00+0100",
            "concept": { "id": "0017" },
            "status": { "id": "2" },
        });

        let tx = parse_credit_card_transaction(&bank(), &account(), &account(), &raw)
            .expect("no error")
            .expect("not discarded");
        assert!(tx.status_flags.invalid);
    }
}
