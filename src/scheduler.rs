//! Concurrency & resource model (spec.md §5): the per-log mutex registry
//! that keeps a reconcile-apply atomic relative to other writers of the
//! same log, the minimum-interval gate that skips an account/card update
//! started too soon after the last one, and a retry-with-backoff helper
//! for the single-browser scraping boundary. The scraping/browser driver
//! itself stays an external collaborator: callers plug one in through
//! [`Fetcher`].
//!
//! The backoff policy (base 3s, factor 2, up to 4 attempts) and the
//! per-account minimum-interval gate are ported from
//! `original_source/src/common/utils.py::retry` and
//! `original_source/src/bank/runtime.py`'s update-skip check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::Metadata;
use crate::error::{BankingError, Result};
use crate::model::LogKind;

/// A registry of per-log mutexes keyed by `(kind, identifier)`. Acquiring
/// the same log's lock twice from two update tasks serializes them; two
/// different logs never block each other (spec.md §5 "no cross-log
/// coordination needed").
#[derive(Debug, Default)]
pub struct LogLocks {
    locks: Mutex<HashMap<(LogKind, String), Arc<Mutex<()>>>>,
}

impl LogLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, kind: LogKind, log_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("log lock registry poisoned");
        locks
            .entry((kind, log_key.to_owned()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `f` holding the named log's mutex, so that a reconcile-apply
    /// for one log is causally ordered relative to any other writer of
    /// the same log (spec.md §5 "Ordering guarantees").
    pub fn with_log<T>(&self, kind: LogKind, log_key: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.lock_for(kind, log_key);
        let _guard = lock.lock().expect("per-log mutex poisoned");
        f()
    }
}

/// Exponential backoff policy for transport errors (spec.md §5): base 3s,
/// factor 2, up to 4 attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base_delay: Duration::from_secs(3), factor: 2, max_attempts: 4 }
    }
}

/// Runs `op`, retrying on `Err` with exponentially increasing delays
/// until `policy.max_attempts` is reached. The final failure is wrapped
/// in [`BankingError::RetryExhausted`] (spec.md §5, §7's `RetryExhausted`
/// row) rather than the underlying error, so callers can distinguish "one
/// transport hiccup" from "the whole task gave up".
pub fn with_retry<T>(policy: &RetryPolicy, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(BankingError::RetryExhausted(format!(
                        "gave up after {attempt} attempt(s): {err}"
                    )));
                }
                tracing::warn!(attempt, %err, delay_secs = delay.as_secs(), "transport error, retrying");
                std::thread::sleep(delay);
                delay *= policy.factor;
            }
        }
    }
}

/// Polls `peek` (a non-blocking check of the access-code mailbox) until
/// it returns a code or `timeout` elapses, per spec.md §5's "polled from
/// a store-backed mailbox for ≤ 10 s". Returns
/// [`BankingError::SmsOtpTimeout`] on timeout.
pub fn poll_for_access_code(timeout: Duration, mut peek: impl FnMut() -> Option<String>) -> Result<String> {
    let start = Instant::now();
    const POLL_INTERVAL: Duration = Duration::from_millis(250);
    loop {
        if let Some(code) = peek() {
            return Ok(code);
        }
        if start.elapsed() >= timeout {
            return Err(BankingError::SmsOtpTimeout);
        }
        std::thread::sleep(POLL_INTERVAL.min(timeout.saturating_sub(start.elapsed())));
    }
}

/// The default SMS OTP poll window (spec.md §5).
pub const SMS_OTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether an account/card update should be skipped because it ran too
/// recently, per the metadata-backed minimum-interval gate of spec.md §5.
pub fn should_skip_update(
    metadata: &Metadata,
    bank_id: &str,
    kind: &str,
    identifier: &str,
    update_timeout_seconds: u64,
    now: DateTime<Utc>,
) -> bool {
    match metadata.last_updated(bank_id, kind, identifier) {
        Some(last) => (now - last).num_seconds() < update_timeout_seconds as i64,
        None => false,
    }
}

/// The contract the scraping/browser layer fulfills; this crate only
/// defines the shape a real scraper plugs into (spec.md §1, "out of
/// scope: the headless-browser scraping layer").
pub trait Fetcher {
    /// Raw provider records for one account, newest or oldest order is
    /// the fetcher's choice — the Parser/Reconciler do not assume it.
    fn fetch_account_transactions(&mut self, bank_id: &str, account_id: &str) -> Result<Vec<serde_json::Value>>;

    /// Raw provider records for one card.
    fn fetch_credit_card_transactions(&mut self, bank_id: &str, card_number: &str) -> Result<Vec<serde_json::Value>>;

    /// Blocks for at most [`SMS_OTP_TIMEOUT`] waiting for an out-of-band
    /// access code to arrive in the mailbox (spec.md §5).
    fn poll_sms_otp(&mut self) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_retry_returns_ok_on_first_success() {
        let policy = RetryPolicy { base_delay: Duration::from_millis(0), ..Default::default() };
        let result = with_retry(&policy, || Ok::<_, BankingError>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn with_retry_exhausts_after_max_attempts() {
        let policy = RetryPolicy { base_delay: Duration::from_millis(0), factor: 1, max_attempts: 3 };
        let mut calls = 0;
        let result: Result<()> = with_retry(&policy, || {
            calls += 1;
            Err(BankingError::InteractionFailure("timeout".into()))
        });
        assert!(matches!(result, Err(BankingError::RetryExhausted(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn poll_for_access_code_returns_once_available() {
        let mut attempts = 0;
        let code = poll_for_access_code(Duration::from_millis(500), || {
            attempts += 1;
            if attempts >= 2 {
                Some("123456".to_owned())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(code, "123456");
    }

    #[test]
    fn poll_for_access_code_times_out() {
        let result = poll_for_access_code(Duration::from_millis(50), || None);
        assert!(matches!(result, Err(BankingError::SmsOtpTimeout)));
    }

    #[test]
    fn log_locks_serializes_access_to_the_same_log() {
        let locks = LogLocks::new();
        let result = locks.with_log(LogKind::BankAccount, "acc-1", || Ok::<_, BankingError>(1));
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn should_skip_update_respects_the_minimum_interval() {
        let mut metadata = Metadata::default();
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:10:00Z").unwrap().with_timezone(&Utc);
        let last = DateTime::parse_from_rfc3339("2026-01-01T00:05:00Z").unwrap().with_timezone(&Utc);
        metadata.set_updated("bbva", "account", "acc-1", last);

        assert!(should_skip_update(&metadata, "bbva", "account", "acc-1", 600, now));
        assert!(!should_skip_update(&metadata, "bbva", "account", "acc-1", 60, now));
        assert!(!should_skip_update(&metadata, "bbva", "account", "acc-2", 600, now));
    }
}
