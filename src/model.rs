//! Canonical Model (C1): the closed enums, subject variants and record
//! shapes every provider parser normalizes into, and every rule and
//! reconciliation operates on. No provider field names leak in here.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bigdecimal::BigDecimal;
use bigdecimal::Zero;
use chrono::NaiveDateTime;

/// Which collection a transaction belongs to; determines which of
/// `balance`/`account`/`card` are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    BankAccount,
    BankCreditCard,
    LocalAccount,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::BankAccount => "bank_account",
            LogKind::BankCreditCard => "bank_credit_card",
            LogKind::LocalAccount => "local_account",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "bank_account" => Some(LogKind::BankAccount),
            "bank_credit_card" => Some(LogKind::BankCreditCard),
            "local_account" => Some(LogKind::LocalAccount),
            _ => None,
        }
    }
}

/// Closed set of canonical transaction types (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    IssuedTransfer,
    ReceivedTransfer,
    BankCommission,
    BankCommissionReturn,
    MortgageReceipt,
    DomiciledReceipt,
    ReturnDeposit,
    CreditCardInvoice,
    CreditCardInvoicePayment,
    Purchase,
    PurchaseReturn,
    AtmWithdrawal,
    Unknown,
}

/// Derived from the sign of `amount` (I2): never stored, always computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionDirection {
    Charge,
    Income,
}

impl TransactionType {
    /// The snake_case name used as the string form of the `type` field
    /// path in rule conditions and templates.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::IssuedTransfer => "issued_transfer",
            TransactionType::ReceivedTransfer => "received_transfer",
            TransactionType::BankCommission => "bank_commission",
            TransactionType::BankCommissionReturn => "bank_commission_return",
            TransactionType::MortgageReceipt => "mortgage_receipt",
            TransactionType::DomiciledReceipt => "domiciled_receipt",
            TransactionType::ReturnDeposit => "return_deposit",
            TransactionType::CreditCardInvoice => "credit_card_invoice",
            TransactionType::CreditCardInvoicePayment => "credit_card_invoice_payment",
            TransactionType::Purchase => "purchase",
            TransactionType::PurchaseReturn => "purchase_return",
            TransactionType::AtmWithdrawal => "atm_withdrawal",
            TransactionType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TransactionDirection {
    pub fn from_amount(amount: &BigDecimal) -> Self {
        if amount.sign() == bigdecimal::num_bigint::Sign::Minus {
            TransactionDirection::Charge
        } else {
            TransactionDirection::Income
        }
    }
}

/// Records who last wrote a mutable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    Original,
    Rules,
    User,
}

impl DataOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataOrigin::Original => "Original",
            DataOrigin::Rules => "Rules",
            DataOrigin::User => "User",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "Original" => Some(DataOrigin::Original),
            "Rules" => Some(DataOrigin::Rules),
            "User" => Some(DataOrigin::User),
            _ => None,
        }
    }
}

/// `status_flags` (I3): invalid transactions never participate in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags {
    pub invalid: bool,
    pub valid_duplicate: bool,
}

/// A directed participant of a transaction. Each concrete subject carries
/// its own display name; `Bank`/`Account`/`Card` additionally carry an
/// identifier. This is a sum type, not an inheritance hierarchy (spec.md §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Bank { id: String, name: String },
    Account { id: String, name: String },
    Card { id: String, name: String },
    LocalAccount { id: String, name: String },
    Issuer { name: String },
    Recipient { name: String },
    Wallet { name: String },
    UnknownSubject,
    UnknownWallet,
}

impl Subject {
    /// Resolves to the subject's display name, or `None` for the two
    /// "unknown" variants (the rule engine's field resolver treats an
    /// unknown subject as absent, per spec.md §4.3).
    pub fn name(&self) -> Option<&str> {
        match self {
            Subject::Bank { name, .. }
            | Subject::Account { name, .. }
            | Subject::Card { name, .. }
            | Subject::LocalAccount { name, .. }
            | Subject::Issuer { name }
            | Subject::Recipient { name }
            | Subject::Wallet { name } => Some(name),
            Subject::UnknownSubject | Subject::UnknownWallet => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Subject::UnknownSubject | Subject::UnknownWallet)
    }
}

/// A back-reference to the account or card that owns a transaction's log.
/// Held by value (id + name), never by pointer — there are no cycles in
/// this model (spec.md §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRef {
    pub id: String,
    pub name: String,
}

/// `(id, name, parent_id?)`. Loaded once from the categories file and
/// immutable thereafter; the tree is a flat map walked by lookup, no
/// parent pointers (spec.md §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

/// Flat `id -> Category` map with cycle-free parent-chain walks.
#[derive(Debug, Clone, Default)]
pub struct CategoryTree {
    by_id: HashMap<String, Category>,
}

impl CategoryTree {
    pub fn new(categories: Vec<Category>) -> Result<Self, String> {
        let by_id: HashMap<String, Category> =
            categories.into_iter().map(|c| (c.id.clone(), c)).collect();
        let tree = Self { by_id };
        for id in tree.by_id.keys() {
            tree.full_path(id).map_err(|_| id.clone())?;
        }
        Ok(tree)
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.by_id.get(id)
    }

    /// Walks `parent_id` from `id` up to the root, detecting cycles.
    pub fn full_path(&self, id: &str) -> Result<Vec<&Category>, ()> {
        let mut path = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = Some(id.to_owned());
        while let Some(cid) = current {
            if !seen.insert(cid.clone()) {
                return Err(());
            }
            let category = self.by_id.get(&cid).ok_or(())?;
            path.push(category);
            current = category.parent_id.clone();
        }
        Ok(path)
    }
}

/// The canonical transaction record (spec.md §3). Created by the Parser,
/// mutated only by the Rule Engine (marking `flags[f] = Rules`) and the
/// Reconciler (which may only rewrite `seq`).
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Densely assigned within its owning log; I1/I4.
    pub seq: u64,
    pub transaction_id: Option<String>,
    pub kind: LogKind,
    pub r#type: TransactionType,
    pub currency: String,
    pub amount: BigDecimal,
    /// Present only for account transactions.
    pub balance: Option<BigDecimal>,
    pub value_date: NaiveDateTime,
    pub transaction_date: NaiveDateTime,
    pub source: Subject,
    pub destination: Subject,
    pub account: Option<WalletRef>,
    pub card: Option<WalletRef>,
    pub details: BTreeMap<String, String>,
    /// Normalized ASCII-uppercase tokens, deduplicated (spec.md §4.2.4).
    pub keywords: BTreeSet<String>,
    pub comment: String,
    pub category: Option<Category>,
    /// Insertion-ordered, duplicates ignored.
    pub tags: Vec<String>,
    pub flags: HashMap<String, DataOrigin>,
    pub status_flags: StatusFlags,
}

impl Transaction {
    pub fn direction(&self) -> TransactionDirection {
        TransactionDirection::from_amount(&self.amount)
    }

    /// Appends `tag` if not already present, preserving insertion order.
    pub fn push_tag(&mut self, tag: String) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn mark_origin(&mut self, field: &str, origin: DataOrigin) {
        self.flags.insert(field.to_owned(), origin);
    }

    /// True for zero-amount records, which never arise from a real
    /// provider feed but guard the direction helper against ambiguity.
    pub fn is_zero_amount(&self) -> bool {
        self.amount.is_zero()
    }
}
