//! Store Interface (C5): per-log ordered collections of transactions, the
//! query operations the Reconciler needs (spec.md §4.5), and the
//! `__type__`-tagged JSON document encoding of the persisted layout
//! (spec.md §6), ported from `original_source/src/database/io.py`'s
//! `encode_transaction`/`decode_transaction`.
//!
//! Each log lives in memory as a `Vec<Transaction>` keyed by
//! `(LogKind, log_key)`, where `log_key` is the owning account id or card
//! number. When opened against a root directory, a log's collection is
//! persisted as one JSON document array per log under
//! `{root}/{collection}/{log_key}.json`, matching the four logical
//! collections of spec.md §6 (the fourth, `*_access_codes`, backs the SMS
//! OTP mailbox).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};

use crate::error::{BankingError, Result};
use crate::model::{
    Category, DataOrigin, LogKind, StatusFlags, Subject, Transaction, TransactionType, WalletRef,
};
use crate::reconciler::{fingerprint_matches, MergeReport, ReconcileOp};

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn encode_datetime(dt: NaiveDateTime) -> Value {
    json!({ "__type__": "datetime", "value": dt.format(DATE_FORMAT).to_string() })
}

fn decode_datetime(value: &Value) -> Result<NaiveDateTime> {
    let raw = value
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| BankingError::StoreDecode("datetime document missing `value`".into()))?;
    NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| BankingError::StoreDecode(format!("invalid datetime {raw}: {e}")))
}

fn encode_wallet_ref(wallet: &WalletRef) -> Value {
    json!({ "__type__": "dataclass::WalletRef", "id": wallet.id, "name": wallet.name })
}

fn decode_wallet_ref(value: &Value) -> Result<WalletRef> {
    Ok(WalletRef {
        id: str_field(value, "id")?,
        name: str_field(value, "name")?,
    })
}

fn encode_category(category: &Category) -> Value {
    json!({
        "__type__": "dataclass::Category",
        "id": category.id,
        "name": category.name,
        "parent_id": category.parent_id,
    })
}

fn decode_category(value: &Value) -> Result<Category> {
    Ok(Category {
        id: str_field(value, "id")?,
        name: str_field(value, "name")?,
        parent_id: value.get("parent_id").and_then(Value::as_str).map(str::to_owned),
    })
}

fn encode_subject(subject: &Subject) -> Value {
    match subject {
        Subject::Bank { id, name } => json!({ "__type__": "dataclass::Bank", "id": id, "name": name }),
        Subject::Account { id, name } => json!({ "__type__": "dataclass::Account", "id": id, "name": name }),
        Subject::Card { id, name } => json!({ "__type__": "dataclass::Card", "id": id, "name": name }),
        Subject::LocalAccount { id, name } => {
            json!({ "__type__": "dataclass::LocalAccount", "id": id, "name": name })
        }
        Subject::Issuer { name } => json!({ "__type__": "dataclass::Issuer", "name": name }),
        Subject::Recipient { name } => json!({ "__type__": "dataclass::Recipient", "name": name }),
        Subject::Wallet { name } => json!({ "__type__": "dataclass::Wallet", "name": name }),
        Subject::UnknownSubject => json!({ "__type__": "dataclass::UnknownSubject" }),
        Subject::UnknownWallet => json!({ "__type__": "dataclass::UnknownWallet" }),
    }
}

fn decode_subject(value: &Value) -> Result<Subject> {
    let tag = value
        .get("__type__")
        .and_then(Value::as_str)
        .ok_or_else(|| BankingError::StoreDecode("subject document missing __type__".into()))?;
    let (_, name) = tag
        .split_once("::")
        .ok_or_else(|| BankingError::StoreDecode(format!("malformed subject tag {tag}")))?;
    Ok(match name {
        "Bank" => Subject::Bank { id: str_field(value, "id")?, name: str_field(value, "name")? },
        "Account" => Subject::Account { id: str_field(value, "id")?, name: str_field(value, "name")? },
        "Card" => Subject::Card { id: str_field(value, "id")?, name: str_field(value, "name")? },
        "LocalAccount" => {
            Subject::LocalAccount { id: str_field(value, "id")?, name: str_field(value, "name")? }
        }
        "Issuer" => Subject::Issuer { name: str_field(value, "name")? },
        "Recipient" => Subject::Recipient { name: str_field(value, "name")? },
        "Wallet" => Subject::Wallet { name: str_field(value, "name")? },
        "UnknownSubject" => Subject::UnknownSubject,
        "UnknownWallet" => Subject::UnknownWallet,
        other => return Err(BankingError::StoreDecode(format!("unknown subject variant {other}"))),
    })
}

fn str_field(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| BankingError::StoreDecode(format!("document missing string field `{field}`")))
}

fn encode_flags(flags: &HashMap<String, DataOrigin>) -> Value {
    let mut map = Map::new();
    for (field, origin) in flags {
        map.insert(
            field.clone(),
            json!({ "__type__": "enum::DataOrigin", "name": origin.as_str() }),
        );
    }
    Value::Object(map)
}

fn decode_flags(value: &Value) -> Result<HashMap<String, DataOrigin>> {
    let object = value
        .as_object()
        .ok_or_else(|| BankingError::StoreDecode("flags document is not an object".into()))?;
    object
        .iter()
        .map(|(field, encoded)| {
            let name = encoded
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| BankingError::StoreDecode(format!("flag {field} missing enum name")))?;
            let origin = DataOrigin::from_str(name)
                .ok_or_else(|| BankingError::StoreDecode(format!("unknown DataOrigin variant {name}")))?;
            Ok((field.clone(), origin))
        })
        .collect()
}

/// Encodes a canonical [`Transaction`] into the `__type__`-tagged document
/// shape of spec.md §6, ready for `serde_json::to_string`.
pub fn encode_transaction(t: &Transaction) -> Value {
    json!({
        "__type__": "dataclass::Transaction",
        "seq": t.seq,
        "transaction_id": t.transaction_id,
        "kind": { "__type__": "enum::LogKind", "name": t.kind.as_str() },
        "type": { "__type__": "enum::TransactionType", "name": t.r#type.as_str() },
        "currency": t.currency,
        "amount": t.amount.to_string(),
        "balance": t.balance.as_ref().map(|b| b.to_string()),
        "value_date": encode_datetime(t.value_date),
        "transaction_date": encode_datetime(t.transaction_date),
        "source": encode_subject(&t.source),
        "destination": encode_subject(&t.destination),
        "account": t.account.as_ref().map(encode_wallet_ref),
        "card": t.card.as_ref().map(encode_wallet_ref),
        "details": t.details,
        "keywords": t.keywords,
        "comment": t.comment,
        "category": t.category.as_ref().map(encode_category),
        "tags": t.tags,
        "flags": encode_flags(&t.flags),
        "status_flags": {
            "invalid": t.status_flags.invalid,
            "valid_duplicate": t.status_flags.valid_duplicate,
        },
    })
}

/// Reverses [`encode_transaction`]. `P6`: `decode(encode(t)) == t`.
pub fn decode_transaction(value: &Value) -> Result<Transaction> {
    let kind_name = value
        .get("kind")
        .and_then(|v| v.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| BankingError::StoreDecode("document missing kind".into()))?;
    let kind = LogKind::from_str(kind_name)
        .ok_or_else(|| BankingError::StoreDecode(format!("unknown LogKind variant {kind_name}")))?;

    let type_name = value
        .get("type")
        .and_then(|v| v.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| BankingError::StoreDecode("document missing type".into()))?;
    let r#type = transaction_type_from_str(type_name)
        .ok_or_else(|| BankingError::StoreDecode(format!("unknown TransactionType variant {type_name}")))?;

    let amount: bigdecimal::BigDecimal = str_field(value, "amount")?
        .parse()
        .map_err(|e| BankingError::StoreDecode(format!("invalid amount: {e}")))?;
    let balance = match value.get("balance") {
        Some(Value::String(s)) => Some(
            s.parse::<bigdecimal::BigDecimal>()
                .map_err(|e| BankingError::StoreDecode(format!("invalid balance: {e}")))?,
        ),
        _ => None,
    };

    let details: BTreeMap<String, String> = value
        .get("details")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let keywords: BTreeSet<String> = value
        .get("keywords")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let tags: Vec<String> = value
        .get("tags")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let account = match value.get("account") {
        Some(Value::Null) | None => None,
        Some(v) => Some(decode_wallet_ref(v)?),
    };
    let card = match value.get("card") {
        Some(Value::Null) | None => None,
        Some(v) => Some(decode_wallet_ref(v)?),
    };
    let category = match value.get("category") {
        Some(Value::Null) | None => None,
        Some(v) => Some(decode_category(v)?),
    };

    let status_flags = value
        .get("status_flags")
        .map(|v| StatusFlags {
            invalid: v.get("invalid").and_then(Value::as_bool).unwrap_or(false),
            valid_duplicate: v.get("valid_duplicate").and_then(Value::as_bool).unwrap_or(false),
        })
        .unwrap_or_default();

    Ok(Transaction {
        seq: value
            .get("seq")
            .and_then(Value::as_u64)
            .ok_or_else(|| BankingError::StoreDecode("document missing seq".into()))?,
        transaction_id: value.get("transaction_id").and_then(Value::as_str).map(str::to_owned),
        kind,
        r#type,
        currency: str_field(value, "currency")?,
        amount,
        balance,
        value_date: decode_datetime(
            value.get("value_date").ok_or_else(|| BankingError::StoreDecode("missing value_date".into()))?,
        )?,
        transaction_date: decode_datetime(
            value
                .get("transaction_date")
                .ok_or_else(|| BankingError::StoreDecode("missing transaction_date".into()))?,
        )?,
        source: decode_subject(
            value.get("source").ok_or_else(|| BankingError::StoreDecode("missing source".into()))?,
        )?,
        destination: decode_subject(
            value
                .get("destination")
                .ok_or_else(|| BankingError::StoreDecode("missing destination".into()))?,
        )?,
        account,
        card,
        details,
        keywords,
        comment: value.get("comment").and_then(Value::as_str).unwrap_or_default().to_owned(),
        category,
        tags,
        flags: value.get("flags").map(decode_flags).transpose()?.unwrap_or_default(),
        status_flags,
    })
}

fn transaction_type_from_str(value: &str) -> Option<TransactionType> {
    use TransactionType::*;
    Some(match value {
        "issued_transfer" => IssuedTransfer,
        "received_transfer" => ReceivedTransfer,
        "bank_commission" => BankCommission,
        "bank_commission_return" => BankCommissionReturn,
        "mortgage_receipt" => MortgageReceipt,
        "domiciled_receipt" => DomiciledReceipt,
        "return_deposit" => ReturnDeposit,
        "credit_card_invoice" => CreditCardInvoice,
        "credit_card_invoice_payment" => CreditCardInvoicePayment,
        "purchase" => Purchase,
        "purchase_return" => PurchaseReturn,
        "atm_withdrawal" => AtmWithdrawal,
        "unknown" => Unknown,
        _ => return None,
    })
}

/// An out-of-band access code ("SMS OTP") written via `PUT
/// /accounts/{id}/access_code` (spec.md §6) and polled by the scraping
/// layer through the mailbox contract of spec.md §5.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessCode {
    pub code: String,
    pub received_at: DateTime<Utc>,
}

/// How [`Store::find`]/[`Store::find_one`] order their results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Seq,
    TransactionDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

fn sort_key(t: &Transaction, field: SortField) -> (i64, NaiveDateTime) {
    match field {
        SortField::Seq => (t.seq as i64, t.transaction_date),
        SortField::TransactionDate => (t.transaction_date.and_utc().timestamp(), t.transaction_date),
    }
}

/// Two transactions agree on every field except `seq` — the relationship
/// a reconciler `Update`/`Remove` op has with the stored record it
/// targets (both are clones of the same record, differing only in the
/// densified sequence number).
fn content_eq(a: &Transaction, b: &Transaction) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.seq = 0;
    b.seq = 0;
    a == b
}

fn collection_dir_name(kind: LogKind) -> &'static str {
    match kind {
        LogKind::BankAccount => "account_transactions",
        LogKind::BankCreditCard => "credit_card_transactions",
        LogKind::LocalAccount => "local_account_transactions",
    }
}

/// Document-oriented collection per kind (spec.md §4.5): `Store` holds
/// three in-memory logs plus the access-code mailbox, optionally
/// persisted under a root directory per spec.md §6's layout.
#[derive(Debug, Default)]
pub struct Store {
    root: Option<PathBuf>,
    account_transactions: HashMap<String, Vec<Transaction>>,
    credit_card_transactions: HashMap<String, Vec<Transaction>>,
    local_account_transactions: HashMap<String, Vec<Transaction>>,
    access_codes: HashMap<String, AccessCode>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every persisted log found under `root`'s four collection
    /// subdirectories (spec.md §6).
    pub fn open(root: &Path) -> Result<Self> {
        let mut store = Self { root: Some(root.to_owned()), ..Default::default() };
        for kind in [LogKind::BankAccount, LogKind::BankCreditCard, LogKind::LocalAccount] {
            store.load_collection(kind)?;
        }
        store.load_access_codes()?;
        Ok(store)
    }

    fn load_collection(&mut self, kind: LogKind) -> Result<()> {
        let Some(root) = self.root.clone() else { return Ok(()) };
        let dir = root.join(collection_dir_name(kind));
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(log_key) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path)?;
            let docs: Vec<Value> =
                serde_json::from_str(&raw).map_err(|e| BankingError::StoreDecode(e.to_string()))?;
            let mut log = docs.iter().map(decode_transaction).collect::<Result<Vec<_>>>()?;
            log.sort_by_key(|t| t.seq);
            self.collection_mut(kind).insert(log_key, log);
        }
        Ok(())
    }

    fn load_access_codes(&mut self) -> Result<()> {
        let Some(root) = self.root.clone() else { return Ok(()) };
        let path = root.join("access_codes.json");
        if !path.is_file() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&path)?;
        let map: HashMap<String, (String, DateTime<Utc>)> =
            serde_json::from_str(&raw).map_err(|e| BankingError::StoreDecode(e.to_string()))?;
        self.access_codes = map
            .into_iter()
            .map(|(k, (code, received_at))| (k, AccessCode { code, received_at }))
            .collect();
        Ok(())
    }

    fn collection(&self, kind: LogKind) -> &HashMap<String, Vec<Transaction>> {
        match kind {
            LogKind::BankAccount => &self.account_transactions,
            LogKind::BankCreditCard => &self.credit_card_transactions,
            LogKind::LocalAccount => &self.local_account_transactions,
        }
    }

    fn collection_mut(&mut self, kind: LogKind) -> &mut HashMap<String, Vec<Transaction>> {
        match kind {
            LogKind::BankAccount => &mut self.account_transactions,
            LogKind::BankCreditCard => &mut self.credit_card_transactions,
            LogKind::LocalAccount => &mut self.local_account_transactions,
        }
    }

    fn persist_log(&self, kind: LogKind, log_key: &str) -> Result<()> {
        let Some(root) = &self.root else { return Ok(()) };
        let dir = root.join(collection_dir_name(kind));
        std::fs::create_dir_all(&dir)?;
        let empty = Vec::new();
        let log = self.collection(kind).get(log_key).unwrap_or(&empty);
        let docs: Vec<Value> = log.iter().map(encode_transaction).collect();
        let raw = serde_json::to_string_pretty(&docs)
            .map_err(|e| BankingError::StoreDecode(e.to_string()))?;
        std::fs::write(dir.join(format!("{log_key}.json")), raw)?;
        Ok(())
    }

    /// `find(log_key, predicate, sort) -> list` (spec.md §4.5).
    pub fn find(
        &self,
        kind: LogKind,
        log_key: &str,
        predicate: impl Fn(&Transaction) -> bool,
        sort: (SortField, SortDirection),
    ) -> Vec<&Transaction> {
        let mut results: Vec<&Transaction> = self
            .collection(kind)
            .get(log_key)
            .into_iter()
            .flatten()
            .filter(|t| predicate(t))
            .collect();
        let (field, direction) = sort;
        results.sort_by_key(|t| sort_key(t, field));
        if direction == SortDirection::Descending {
            results.reverse();
        }
        results
    }

    /// `find_one(log_key, sort)`: first or last by the requested order.
    pub fn find_one(&self, kind: LogKind, log_key: &str, sort: (SortField, SortDirection)) -> Option<&Transaction> {
        self.find(kind, log_key, |_| true, sort).into_iter().next()
    }

    /// `find_matching(log_key, fetched_tx) -> Transaction | null`: a
    /// fingerprint match, skipping `status_flags.valid_duplicate`. Raises
    /// `MatchAmbiguity` on two or more matches (spec.md §4.5).
    pub fn find_matching(&self, kind: LogKind, log_key: &str, fetched: &Transaction) -> Result<Option<&Transaction>> {
        let candidates: Vec<&Transaction> = self
            .collection(kind)
            .get(log_key)
            .into_iter()
            .flatten()
            .filter(|t| !t.status_flags.valid_duplicate && fingerprint_matches(t, fetched))
            .collect();
        match candidates.len() {
            0 => Ok(None),
            1 => Ok(Some(candidates[0])),
            _ => Err(BankingError::MatchAmbiguity),
        }
    }

    /// `count(log_key) -> int`.
    pub fn count(&self, kind: LogKind, log_key: &str) -> usize {
        self.collection(kind).get(log_key).map_or(0, Vec::len)
    }

    /// `last_date(log_key) -> timestamp | null`.
    pub fn last_date(&self, kind: LogKind, log_key: &str) -> Option<NaiveDateTime> {
        self.collection(kind)
            .get(log_key)
            .and_then(|log| log.iter().map(|t| t.transaction_date).max())
    }

    pub fn insert(&mut self, kind: LogKind, log_key: &str, transaction: Transaction) -> Result<()> {
        self.collection_mut(kind)
            .entry(log_key.to_owned())
            .or_default()
            .push(transaction);
        self.persist_log(kind, log_key)
    }

    pub fn update(&mut self, kind: LogKind, log_key: &str, transaction: Transaction) -> Result<()> {
        let log = self.collection_mut(kind).entry(log_key.to_owned()).or_default();
        match log.iter().position(|t| content_eq(t, &transaction)) {
            Some(idx) => log[idx] = transaction,
            None => return Err(BankingError::ConsistencyFailure("update target not found in store".into())),
        }
        self.persist_log(kind, log_key)
    }

    pub fn remove(&mut self, kind: LogKind, log_key: &str, transaction: &Transaction) -> Result<()> {
        let log = self.collection_mut(kind).entry(log_key.to_owned()).or_default();
        match log.iter().position(|t| content_eq(t, transaction)) {
            Some(idx) => {
                log.remove(idx);
            }
            None => return Err(BankingError::ConsistencyFailure("remove target not found in store".into())),
        }
        self.persist_log(kind, log_key)
    }

    pub fn access_code(&self, log_key: &str) -> Option<&AccessCode> {
        self.access_codes.get(log_key)
    }

    /// `PUT /accounts/{id}/access_code` (spec.md §6): writes an
    /// out-of-band SMS code to the mailbox.
    pub fn set_access_code(&mut self, log_key: &str, code: String, received_at: DateTime<Utc>) -> Result<()> {
        self.access_codes.insert(log_key.to_owned(), AccessCode { code, received_at });
        let Some(root) = &self.root else { return Ok(()) };
        let serializable: HashMap<&String, (&str, DateTime<Utc>)> = self
            .access_codes
            .iter()
            .map(|(k, v)| (k, (v.code.as_str(), v.received_at)))
            .collect();
        let raw = serde_json::to_string_pretty(&serializable)
            .map_err(|e| BankingError::StoreDecode(e.to_string()))?;
        std::fs::write(root.join("access_codes.json"), raw)?;
        Ok(())
    }

    /// Applies a reconciler batch (insert/update/remove ops, in order) to
    /// one log as a single logical write, then re-checks the log's
    /// invariants (spec.md §4.4 "Post-conditions", §5 "reconcile-apply is
    /// atomic relative to other writers to the same log").
    pub fn apply_reconcile_ops(&mut self, kind: LogKind, log_key: &str, ops: &[ReconcileOp]) -> Result<MergeReport> {
        let mut working = self.collection(kind).get(log_key).cloned().unwrap_or_default();
        let mut report = MergeReport::default();
        for op in ops {
            match op {
                ReconcileOp::Insert(t) => {
                    working.push(t.clone());
                    report.inserted += 1;
                }
                ReconcileOp::Update(t) => {
                    let idx = working
                        .iter()
                        .position(|s| content_eq(s, t))
                        .ok_or_else(|| BankingError::ConsistencyFailure(format!("update target not found for seq={}", t.seq)))?;
                    working[idx] = t.clone();
                    report.updated += 1;
                }
                ReconcileOp::Remove(t) => {
                    let idx = working
                        .iter()
                        .position(|s| content_eq(s, t))
                        .ok_or_else(|| BankingError::ConsistencyFailure(format!("remove target not found for seq={}", t.seq)))?;
                    working.remove(idx);
                    report.removed += 1;
                }
            }
        }
        working.sort_by_key(|t| t.seq);
        crate::reconciler::verify_invariants(&working, matches!(kind, LogKind::BankAccount))?;
        self.collection_mut(kind).insert(log_key.to_owned(), working);
        self.persist_log(kind, log_key)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogKind, Subject, TransactionType};
    use bigdecimal::FromPrimitive;
    use chrono::NaiveDate;
    use std::collections::HashMap as StdHashMap;

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn sample_transaction() -> Transaction {
        Transaction {
            seq: 3,
            transaction_id: Some("tx-1".into()),
            kind: LogKind::BankAccount,
            r#type: TransactionType::Purchase,
            currency: "EUR".into(),
            amount: bigdecimal::BigDecimal::from_i64(-4250).unwrap() / 100,
            balance: Some(bigdecimal::BigDecimal::from_i64(100000).unwrap() / 100),
            value_date: dt(2024, 3, 1),
            transaction_date: dt(2024, 3, 1),
            source: Subject::Account { id: "acc-1".into(), name: "Main".into() },
            destination: Subject::Recipient { name: "Coffee Shop".into() },
            account: Some(WalletRef { id: "acc-1".into(), name: "Main".into() }),
            card: None,
            details: BTreeMap::from([("shop_name".to_owned(), "Coffee Shop".to_owned())]),
            keywords: BTreeSet::from(["COFFEE".to_owned()]),
            comment: "coffee".into(),
            category: Some(Category { id: "food".into(), name: "Food".into(), parent_id: None }),
            tags: vec!["recurring".into()],
            flags: StdHashMap::from([("destination".to_owned(), DataOrigin::Rules)]),
            status_flags: StatusFlags { invalid: false, valid_duplicate: true },
        }
    }

    #[test]
    fn transaction_round_trips_through_the_document_encoding() {
        let original = sample_transaction();
        let encoded = encode_transaction(&original);
        let decoded = decode_transaction(&encoded).expect("valid document");
        assert_eq!(decoded, original);
    }

    #[test]
    fn store_find_matching_skips_valid_duplicates() {
        let mut store = Store::new();
        let duplicate = sample_transaction();
        store.insert(LogKind::BankAccount, "acc-1", duplicate).unwrap();

        let mut fetched = sample_transaction();
        fetched.seq = 999;
        let found = store.find_matching(LogKind::BankAccount, "acc-1", &fetched).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn store_find_matching_raises_on_ambiguity() {
        let mut store = Store::new();
        let mut a = sample_transaction();
        a.status_flags.valid_duplicate = false;
        a.seq = 0;
        let mut b = a.clone();
        b.seq = 1;
        store.insert(LogKind::BankAccount, "acc-1", a).unwrap();
        store.insert(LogKind::BankAccount, "acc-1", b).unwrap();

        let mut fetched = sample_transaction();
        fetched.status_flags.valid_duplicate = false;
        fetched.seq = 999;
        let err = store.find_matching(LogKind::BankAccount, "acc-1", &fetched).unwrap_err();
        assert!(matches!(err, BankingError::MatchAmbiguity));
    }

    #[test]
    fn apply_reconcile_ops_runs_post_merge_invariant_checks() {
        let mut store = Store::new();
        let mut t0 = sample_transaction();
        t0.seq = 0;
        t0.status_flags.valid_duplicate = false;
        let mut t1 = sample_transaction();
        t1.seq = 1;
        t1.status_flags.valid_duplicate = false;
        t1.transaction_date = dt(2024, 3, 2);
        t1.value_date = dt(2024, 3, 2);
        store.insert(LogKind::BankAccount, "acc-1", t0.clone()).unwrap();
        store.insert(LogKind::BankAccount, "acc-1", t1.clone()).unwrap();

        let mut inserted = sample_transaction();
        inserted.seq = 2;
        inserted.status_flags.valid_duplicate = false;
        inserted.transaction_date = dt(2024, 3, 3);
        inserted.value_date = dt(2024, 3, 3);

        let report = store
            .apply_reconcile_ops(LogKind::BankAccount, "acc-1", &[ReconcileOp::Insert(inserted)])
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(store.count(LogKind::BankAccount, "acc-1"), 3);
    }

    #[test]
    fn count_and_last_date_reflect_the_log() {
        let mut store = Store::new();
        let mut t0 = sample_transaction();
        t0.seq = 0;
        store.insert(LogKind::BankAccount, "acc-1", t0).unwrap();
        assert_eq!(store.count(LogKind::BankAccount, "acc-1"), 1);
        assert_eq!(store.last_date(LogKind::BankAccount, "acc-1"), Some(dt(2024, 3, 1)));
        assert_eq!(store.count(LogKind::BankAccount, "missing"), 0);
    }
}
