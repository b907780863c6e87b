//! `erste` provider parser (C2): a signed-integer-plus-precision amount
//! encoding, deliberately incompatible with [`crate::parsers::bbva`]'s
//! floating-amount-plus-currency-node shape (spec.md §4.2.1). The raw
//! JSON shape is grounded in the teacher's `ErsteTransaction`/`ErsteAmount`
//! deserialization target; the canonical-model mapping (type
//! classification, source/destination dispatch) is new, since the
//! teacher only ever turned these records into hledger postings.

use bigdecimal::{BigDecimal, FromPrimitive};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{BankingError, Result};
use crate::keywords::extract_keywords;
use crate::model::{
    DataOrigin, LogKind, StatusFlags, Subject, Transaction, TransactionDirection, TransactionType,
    WalletRef,
};
use crate::parsers::decode_date;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErsteTransaction {
    booking: String,
    #[allow(dead_code)]
    valuation: String,
    partner_name: Option<String>,
    reference: Option<String>,
    reference_number: String,
    partner_account: ErstePartnerAccount,
    amount: ErsteAmount,
    balance: Option<ErsteAmount>,
    note: Option<String>,
    card_number: Option<String>,
    virtual_card_number: Option<String>,
    sepa_mandate_id: Option<String>,
    sepa_creditor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErstePartnerAccount {
    iban: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErsteAmount {
    value: i64,
    precision: u32,
    currency: String,
}

impl ErsteAmount {
    fn to_decimal(&self) -> Result<BigDecimal> {
        BigDecimal::from_i64(self.value)
            .map(|d| d / BigDecimal::from(10_i64.pow(self.precision)))
            .ok_or_else(|| BankingError::ParseFailure(format!("amount value out of range: {}", self.value)))
    }
}

/// The provider has no opcode field; the discriminator is derived from
/// which sibling fields are populated. Still a closed, static dispatch
/// per spec.md §4.2.2 — just one keyed on field presence rather than a
/// literal provider code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpCode {
    Card,
    SepaMandate,
    SepaCreditor,
    Transfer,
}

fn opcode_of(raw: &ErsteTransaction) -> OpCode {
    if raw.card_number.as_deref().is_some_and(|s| !s.is_empty())
        || raw.virtual_card_number.as_deref().is_some_and(|s| !s.is_empty())
    {
        OpCode::Card
    } else if raw.sepa_mandate_id.as_deref().is_some_and(|s| !s.is_empty()) {
        OpCode::SepaMandate
    } else if raw.sepa_creditor_id.as_deref().is_some_and(|s| !s.is_empty()) {
        OpCode::SepaCreditor
    } else {
        OpCode::Transfer
    }
}

fn classify_type(opcode: OpCode, direction: TransactionDirection) -> TransactionType {
    use TransactionDirection::{Charge, Income};
    use TransactionType::*;
    match (opcode, direction) {
        (OpCode::Card, Charge) => Purchase,
        (OpCode::Card, Income) => PurchaseReturn,
        (OpCode::SepaMandate | OpCode::SepaCreditor, Charge) => DomiciledReceipt,
        (OpCode::SepaMandate | OpCode::SepaCreditor, Income) => ReturnDeposit,
        (OpCode::Transfer, Charge) => IssuedTransfer,
        (OpCode::Transfer, Income) => ReceivedTransfer,
    }
}

fn partner_subject(partner_name: &Option<String>, as_issuer: bool) -> Subject {
    match partner_name.as_deref().filter(|s| !s.is_empty()) {
        Some(name) if as_issuer => Subject::Issuer { name: name.to_owned() },
        Some(name) => Subject::Recipient { name: name.to_owned() },
        None => Subject::UnknownSubject,
    }
}

fn dispatch(
    kind: TransactionType,
    raw: &ErsteTransaction,
    account: &WalletRef,
) -> (Subject, Subject) {
    use TransactionType::*;
    let own = || Subject::Account { id: account.id.clone(), name: account.name.clone() };
    match kind {
        Purchase | IssuedTransfer | DomiciledReceipt => (own(), partner_subject(&raw.partner_name, false)),
        PurchaseReturn | ReceivedTransfer | ReturnDeposit => (partner_subject(&raw.partner_name, true), own()),
        _ => (Subject::UnknownSubject, Subject::UnknownSubject),
    }
}

fn build(
    account: &WalletRef,
    card: Option<&WalletRef>,
    kind: LogKind,
    raw: &Value,
) -> Result<Option<Transaction>> {
    let parsed: ErsteTransaction = serde_json::from_value(raw.clone())
        .map_err(|e| BankingError::ParseFailure(e.to_string()))?;

    let amount = parsed.amount.to_decimal()?;
    let direction = TransactionDirection::from_amount(&amount);
    let opcode = opcode_of(&parsed);
    let transaction_type = classify_type(opcode, direction);
    let (source, destination) = dispatch(transaction_type, &parsed, account);

    let balance = match (kind, &parsed.balance) {
        (LogKind::BankAccount, Some(b)) => Some(b.to_decimal()?),
        _ => None,
    };

    let mut details = std::collections::BTreeMap::new();
    if let Some(iban) = parsed.partner_account.iban.as_deref().filter(|s| !s.is_empty()) {
        details.insert("partner_iban".to_owned(), iban.to_owned());
    }
    if let Some(note) = parsed.note.as_deref().filter(|s| !s.is_empty()) {
        details.insert("note".to_owned(), note.to_owned());
    }

    let comment = parsed
        .note
        .clone()
        .or_else(|| parsed.reference.clone())
        .unwrap_or_default();

    let keywords = extract_keywords(
        raw,
        ["partnerName", "reference", "note"],
        &details,
    );

    Ok(Some(Transaction {
        seq: 0,
        transaction_id: Some(parsed.reference_number),
        kind,
        r#type: transaction_type,
        currency: parsed.amount.currency,
        amount,
        balance,
        value_date: decode_date(&parsed.valuation)?,
        transaction_date: decode_date(&parsed.booking)?,
        source,
        destination,
        account: matches!(kind, LogKind::BankAccount | LogKind::LocalAccount).then(|| account.clone()),
        card: card.cloned(),
        details,
        keywords,
        comment,
        category: None,
        tags: Vec::new(),
        flags: Default::default(),
        status_flags: StatusFlags::default(),
    }))
}

/// `parse_account_transaction(bank_cfg, account_cfg, raw) -> Transaction | null`.
pub fn parse_account_transaction(account: &WalletRef, raw: &Value) -> Result<Option<Transaction>> {
    build(account, None, LogKind::BankAccount, raw)
}

/// `parse_credit_card_transaction(bank_cfg, account_cfg, card_cfg, raw) -> Transaction | null`.
/// The provider never splits card movements into a separate feed; a card
/// movement is an account movement that happens to carry a card number.
pub fn parse_credit_card_transaction(
    account: &WalletRef,
    card: &WalletRef,
    raw: &Value,
) -> Result<Option<Transaction>> {
    build(account, Some(card), LogKind::BankCreditCard, raw)
}
