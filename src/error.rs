use std::path::PathBuf;

/// Error taxonomy for the reconciliation and rule engine (spec.md §7).
///
/// Parser failures and rule-template failures are recoverable by the
/// caller (drop the record / leave the field unchanged); everything else
/// is fatal to the batch currently being processed but never to peer
/// tasks working on other logs.
#[derive(Debug, thiserror::Error)]
pub enum BankingError {
    #[error("failed to parse provider record: {0}")]
    ParseFailure(String),

    #[error("rule template referenced an unknown field: {0}")]
    RuleTemplateFailure(String),

    #[error("fetched batch diverges from stored history at seq={stored_seq}: {reason}")]
    DivergedHistory { stored_seq: u64, reason: String },

    #[error("post-merge consistency check failed: {0}")]
    ConsistencyFailure(String),

    #[error("found more than one match for a transaction, check the algorithm")]
    MatchAmbiguity,

    #[error("interaction with provider failed: {0}")]
    InteractionFailure(String),

    #[error("retry policy exhausted: {0}")]
    RetryExhausted(String),

    #[error("no SMS OTP code arrived within the timeout")]
    SmsOtpTimeout,

    #[error("could not decode a stored document: {0}")]
    StoreDecode(String),

    #[error("could not determine configuration file path")]
    ConfigPath,

    #[error("could not read configuration file at {0}")]
    ConfigRead(PathBuf),

    #[error("could not parse configuration file: {0}")]
    ConfigParse(String),

    #[error("categories file defines a cycle reachable from id {0}")]
    CategoryCycle(String),

    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BankingError>;
