use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use banking_reconciler::config::{self, AppConfig};
use banking_reconciler::model::{LogKind, WalletRef};
use banking_reconciler::parsers::{bbva, erste};
use banking_reconciler::reconciler;
use banking_reconciler::store::{SortDirection, SortField, Store};
use banking_reconciler::{BankingError, Result};

/// Runs one reconciliation pass of the transaction reconciliation and
/// rule engine (spec.md §1) against local configuration and fixture
/// files, without the scraping/browser layer this crate treats as an
/// external collaborator.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Loads and validates a YAML configuration file (spec.md §6).
    ValidateConfig {
        /// Defaults to `BANKING_CONFIG_FILE`, falling back to
        /// `~/.config/banking-reconciler/config.yaml`.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Parses a batch of raw provider records and merges them into the
    /// store for one account or credit-card log, printing the resulting
    /// log (spec.md §4.2-§4.5).
    Reconcile {
        #[arg(long, value_enum)]
        provider: Provider,
        #[arg(long, value_enum)]
        kind: ReconcileKind,
        /// Account id or card number this log is keyed by.
        #[arg(long)]
        log_key: String,
        #[arg(long, default_value = "bank")]
        bank_id: String,
        #[arg(long, default_value = "Bank")]
        bank_name: String,
        #[arg(long, default_value = "Account")]
        account_name: String,
        /// Required when `--kind credit-card`.
        #[arg(long)]
        card_name: Option<String>,
        /// JSON array of raw provider records for this log.
        #[arg(short, long)]
        fetched: PathBuf,
        /// Root directory of the persisted store; defaults to
        /// `BANKING_DATABASE_FOLDER`.
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Provider {
    Bbva,
    Erste,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReconcileKind {
    Account,
    CreditCard,
}

impl From<ReconcileKind> for LogKind {
    fn from(kind: ReconcileKind) -> Self {
        match kind {
            ReconcileKind::Account => LogKind::BankAccount,
            ReconcileKind::CreditCard => LogKind::BankCreditCard,
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::ValidateConfig { config } => validate_config(config),
        Command::Reconcile {
            provider,
            kind,
            log_key,
            bank_id,
            bank_name,
            account_name,
            card_name,
            fetched,
            database,
        } => reconcile(
            provider,
            kind,
            &log_key,
            &bank_id,
            &bank_name,
            &account_name,
            card_name.as_deref(),
            &fetched,
            database,
        ),
    };

    // Exit codes per spec.md §6: 0 success, 1 any handled error.
    if let Err(err) = outcome {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn validate_config(config: Option<PathBuf>) -> Result<()> {
    let loaded = match config {
        Some(path) => AppConfig::load_from(&path)?,
        None => AppConfig::load()?,
    };
    println!(
        "configuration OK: {} bank(s), {} account(s), {} card(s)",
        loaded.banks.len(),
        loaded.accounts.len(),
        loaded.cards.len()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn reconcile(
    provider: Provider,
    kind: ReconcileKind,
    log_key: &str,
    bank_id: &str,
    bank_name: &str,
    account_name: &str,
    card_name: Option<&str>,
    fetched_path: &PathBuf,
    database: Option<PathBuf>,
) -> Result<()> {
    let bank = WalletRef { id: bank_id.to_owned(), name: bank_name.to_owned() };
    let account = WalletRef { id: log_key.to_owned(), name: account_name.to_owned() };
    let card = card_name.map(|name| WalletRef { id: log_key.to_owned(), name: name.to_owned() });

    let raw = std::fs::read_to_string(fetched_path)?;
    let records: Vec<serde_json::Value> =
        serde_json::from_str(&raw).map_err(|e| BankingError::ParseFailure(e.to_string()))?;

    let log_kind = LogKind::from(kind);
    let fetched = parse_batch(provider, kind, &bank, &account, card.as_ref(), &records)?;

    let database = match database {
        Some(path) => path,
        None => config::database_folder()?,
    };
    let mut store = Store::open(&database)?;
    let stored: Vec<_> = store
        .find(log_kind, log_key, |_| true, (SortField::Seq, SortDirection::Ascending))
        .into_iter()
        .cloned()
        .collect();

    let (ops, report) = reconciler::merge(&stored, &fetched)?;
    store.apply_reconcile_ops(log_kind, log_key, &ops)?;

    println!(
        "reconciled {log_key}: {} inserted, {} updated, {} removed",
        report.inserted, report.updated, report.removed
    );
    for t in store.find(log_kind, log_key, |_| true, (SortField::Seq, SortDirection::Ascending)) {
        println!(
            "seq={:>4} {} {:>12} {} -> {}",
            t.seq,
            t.transaction_date.format("%Y-%m-%d %H:%M"),
            t.amount,
            t.source.name().unwrap_or("?"),
            t.destination.name().unwrap_or("?"),
        );
    }
    Ok(())
}

/// Parses every raw record through the selected provider, dropping (with
/// a warning) any record the parser cannot decode: a `ParseFailure` never
/// aborts the batch, per spec.md §7's "record dropped; scan continues".
fn parse_batch(
    provider: Provider,
    kind: ReconcileKind,
    bank: &WalletRef,
    account: &WalletRef,
    card: Option<&WalletRef>,
    records: &[serde_json::Value],
) -> Result<Vec<banking_reconciler::model::Transaction>> {
    let mut fetched = Vec::with_capacity(records.len());
    for record in records {
        let parsed = match (provider, kind) {
            (Provider::Bbva, ReconcileKind::Account) => bbva::parse_account_transaction(bank, account, record),
            (Provider::Bbva, ReconcileKind::CreditCard) => {
                let card = card.ok_or_else(|| {
                    BankingError::ParseFailure("credit-card reconcile requires --card-name".into())
                })?;
                bbva::parse_credit_card_transaction(bank, account, card, record)
            }
            (Provider::Erste, ReconcileKind::Account) => erste::parse_account_transaction(account, record),
            (Provider::Erste, ReconcileKind::CreditCard) => {
                let card = card.ok_or_else(|| {
                    BankingError::ParseFailure("credit-card reconcile requires --card-name".into())
                })?;
                erste::parse_credit_card_transaction(account, card, record)
            }
        };
        match parsed {
            Ok(Some(transaction)) => fetched.push(transaction),
            Ok(None) => {}
            Err(reason) => tracing::warn!(%reason, "dropping unparseable raw record"),
        }
    }
    fetched.sort_by_key(|t| t.transaction_date);
    Ok(fetched)
}
