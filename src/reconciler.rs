//! Reconciler (C4): diffs a freshly fetched batch against a log's stored
//! history, emits insert/update/remove operations, and resequences the
//! log to keep `seq` dense (spec.md §4.4). Pure over its inputs — it never
//! touches the store directly; the caller (the Store Interface, §4.5)
//! applies the emitted ops as one logical batch per log.
//!
//! Grounded in `original_source/src/database/io.py`'s
//! `select_new_transactions` for the LCS-based diff shape, generalized
//! to the richer six-case dispatch and `invalid`/`diverged` pairing of
//! spec.md §4.4 that the original only partially implements.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

use crate::error::{BankingError, Result};
use crate::model::{LogKind, Transaction, TransactionType};

/// The key used to decide a fetched and a stored transaction are the same
/// entity. Not a unique identifier — see the glossary in spec.md.
#[derive(Debug, Clone, PartialEq)]
enum Fingerprint {
    Account {
        transaction_date: NaiveDateTime,
        value_date: NaiveDateTime,
        amount: BigDecimal,
        balance: Option<BigDecimal>,
    },
    CreditCard {
        transaction_date: NaiveDateTime,
        value_date: NaiveDateTime,
        amount: BigDecimal,
        kind: TransactionType,
    },
}

fn fingerprint(t: &Transaction) -> Fingerprint {
    match t.kind {
        LogKind::BankCreditCard => Fingerprint::CreditCard {
            transaction_date: t.transaction_date,
            value_date: t.value_date,
            amount: t.amount.clone(),
            kind: t.r#type,
        },
        LogKind::BankAccount | LogKind::LocalAccount => Fingerprint::Account {
            transaction_date: t.transaction_date,
            value_date: t.value_date,
            amount: t.amount.clone(),
            balance: t.balance.clone(),
        },
    }
}

/// Whether two transactions share a fingerprint — the matching rule the
/// Store Interface's `find_matching` uses (spec.md §4.5).
pub(crate) fn fingerprint_matches(a: &Transaction, b: &Transaction) -> bool {
    fingerprint(a) == fingerprint(b)
}

/// One operation the caller must apply to a log, in order, as a single
/// logical batch (spec.md §5).
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOp {
    Insert(Transaction),
    Update(Transaction),
    Remove(Transaction),
}

/// `(removed, inserted, updated)` (spec.md §4.4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub removed: usize,
    pub inserted: usize,
    pub updated: usize,
}

/// Merges `fetched` into `stored` for one log, per the six disjoint cases
/// of spec.md §4.4, checked in order. `stored` must already be sorted by
/// `seq`; `fetched` must already be sorted by `transaction_date` (the
/// Parser/Rule Engine pipeline's output order).
pub fn merge(stored: &[Transaction], fetched: &[Transaction]) -> Result<(Vec<ReconcileOp>, MergeReport)> {
    if fetched.is_empty() {
        return Ok((Vec::new(), MergeReport::default()));
    }

    // Case 1: empty store.
    if stored.is_empty() {
        let ops: Vec<ReconcileOp> = fetched
            .iter()
            .enumerate()
            .map(|(i, t)| ReconcileOp::Insert(with_seq(t, i as u64)))
            .collect();
        let inserted = ops.len();
        return Ok((ops, MergeReport { inserted, ..Default::default() }));
    }

    let max_stored_date = stored.iter().map(|t| t.transaction_date).max().unwrap();
    let min_stored_date = stored.iter().map(|t| t.transaction_date).min().unwrap();
    let min_fetched_date = fetched.iter().map(|t| t.transaction_date).min().unwrap();
    let max_fetched_date = fetched.iter().map(|t| t.transaction_date).max().unwrap();

    // Case 2: all fetched strictly newer than last stored.
    if min_fetched_date > max_stored_date {
        let base_seq = stored.iter().map(|t| t.seq).max().unwrap() + 1;
        let ops: Vec<ReconcileOp> = fetched
            .iter()
            .enumerate()
            .map(|(i, t)| ReconcileOp::Insert(with_seq(t, base_seq + i as u64)))
            .collect();
        let inserted = ops.len();
        return Ok((ops, MergeReport { inserted, ..Default::default() }));
    }

    // Case 3: all fetched strictly older than first stored.
    if max_fetched_date < min_stored_date {
        let k = fetched.len() as u64;
        let mut ops: Vec<ReconcileOp> = fetched
            .iter()
            .enumerate()
            .map(|(i, t)| ReconcileOp::Insert(with_seq(t, i as u64)))
            .collect();
        ops.extend(stored.iter().map(|t| ReconcileOp::Update(with_seq(t, t.seq + k))));
        let inserted = fetched.len();
        let updated = stored.len();
        return Ok((ops, MergeReport { inserted, updated, ..Default::default() }));
    }

    // Overlap: does any fetched record fall inside the stored date range?
    let has_overlap_record = fetched
        .iter()
        .any(|f| f.transaction_date >= min_stored_date && f.transaction_date <= max_stored_date);

    let stored_fingerprints: Vec<Fingerprint> = stored.iter().map(fingerprint).collect();
    let fetched_fingerprints: Vec<Fingerprint> = fetched.iter().map(fingerprint).collect();
    let any_match = fetched_fingerprints.iter().any(|f| stored_fingerprints.contains(f));

    if has_overlap_record && !any_match {
        // Case 4: overlap, no match.
        return Err(BankingError::DivergedHistory {
            stored_seq: stored[0].seq,
            reason: "fetched batch overlaps the stored date range but no fingerprint matches".into(),
        });
    }

    if !any_match {
        // Case 6: treat as empty overlap, no changes.
        return Ok((Vec::new(), MergeReport::default()));
    }

    // Case 5: overlap with some matches — diff from the first matching
    // stored date onward.
    let min_matching_date = stored
        .iter()
        .zip(&stored_fingerprints)
        .filter(|(_, fp)| fetched_fingerprints.contains(fp))
        .map(|(t, _)| t.transaction_date)
        .min()
        .expect("any_match implies at least one matching stored record");

    let window_start = stored.iter().position(|t| t.transaction_date >= min_matching_date).unwrap();
    let window = &stored[window_start..];
    let window_fingerprints = &stored_fingerprints[window_start..];

    diff_and_resequence(window, window_fingerprints, fetched, &fetched_fingerprints)
}

fn with_seq(t: &Transaction, seq: u64) -> Transaction {
    let mut t = t.clone();
    t.seq = seq;
    t
}

enum DiffOp {
    Removed(usize),
    Added(usize),
    Same(usize, usize),
}

/// Any LCS-based diff is adequate (spec.md §9); this is the textbook
/// dynamic-programming edit script over fingerprint equality.
fn lcs_diff(stored: &[Fingerprint], fetched: &[Fingerprint]) -> Vec<DiffOp> {
    let n = stored.len();
    let m = fetched.len();
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if stored[i] == fetched[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if stored[i] == fetched[j] {
            ops.push(DiffOp::Same(i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push(DiffOp::Removed(i));
            i += 1;
        } else {
            ops.push(DiffOp::Added(j));
            j += 1;
        }
    }
    while i < n {
        ops.push(DiffOp::Removed(i));
        i += 1;
    }
    while j < m {
        ops.push(DiffOp::Added(j));
        j += 1;
    }
    ops
}

/// The diff procedure of spec.md §4.4 (case 5): walks the LCS edit script
/// linearly, resequencing stored records once an insertion breaks
/// density, and pairing `invalid` fetched-only records against
/// accumulated `diverged` stored-only records by `(amount, date)` — the
/// Open Question of spec.md §9, implemented as defined there.
fn diff_and_resequence(
    window: &[Transaction],
    window_fp: &[Fingerprint],
    fetched: &[Transaction],
    fetched_fp: &[Fingerprint],
) -> Result<(Vec<ReconcileOp>, MergeReport)> {
    let edits = lcs_diff(window_fp, fetched_fp);

    let mut next_seq: u64 = 0;
    let mut renumber_needed = false;
    let mut diverged: Vec<Transaction> = Vec::new();
    let mut ops = Vec::new();
    let mut report = MergeReport::default();
    let mut fetched_consumed = 0usize;

    for edit in &edits {
        match *edit {
            DiffOp::Added(j) => {
                fetched_consumed += 1;
                let f = &fetched[j];
                if f.status_flags.invalid {
                    let candidates: Vec<usize> = diverged
                        .iter()
                        .enumerate()
                        .filter(|(_, d)| d.amount == f.amount && d.transaction_date == f.transaction_date)
                        .map(|(idx, _)| idx)
                        .collect();
                    match candidates.len() {
                        0 => {}
                        1 => {
                            let paired = diverged.remove(candidates[0]);
                            ops.push(ReconcileOp::Remove(paired));
                            report.removed += 1;
                        }
                        _ => {
                            return Err(BankingError::DivergedHistory {
                                stored_seq: diverged[candidates[0]].seq,
                                reason: format!(
                                    "invalid fetched record at {} matches {} diverged candidates",
                                    f.transaction_date,
                                    candidates.len()
                                ),
                            });
                        }
                    }
                } else {
                    ops.push(ReconcileOp::Insert(with_seq(f, next_seq)));
                    report.inserted += 1;
                    next_seq += 1;
                    renumber_needed = true;
                }
            }
            DiffOp::Same(i, j) => {
                fetched_consumed += 1;
                let s = &window[i];
                let _ = j;
                if renumber_needed {
                    if s.seq != next_seq {
                        ops.push(ReconcileOp::Update(with_seq(s, next_seq)));
                        report.updated += 1;
                    }
                    next_seq += 1;
                } else {
                    next_seq = s.seq + 1;
                }
            }
            DiffOp::Removed(i) => {
                let s = &window[i];
                let all_fetched_consumed = fetched_consumed == fetched.len();
                if all_fetched_consumed && renumber_needed {
                    ops.push(ReconcileOp::Update(with_seq(s, next_seq)));
                    report.updated += 1;
                    next_seq += 1;
                } else {
                    diverged.push(s.clone());
                }
            }
        }
        if fetched_consumed == fetched.len() && !renumber_needed {
            break;
        }
    }

    if let Some(first) = diverged.first() {
        return Err(BankingError::DivergedHistory {
            stored_seq: first.seq,
            reason: format!(
                "stored record at seq={} has no counterpart in the fetched batch and could not be paired",
                first.seq
            ),
        });
    }

    Ok((ops, report))
}

/// Post-merge invariant checks (spec.md §4.4 "Post-conditions"). Callers
/// run this against the log *after* applying the emitted ops.
pub fn verify_invariants(log: &[Transaction], accounts_only: bool) -> Result<()> {
    verify_density(log)?;
    verify_order(log)?;
    if accounts_only {
        verify_balance_continuity(log)?;
    }
    Ok(())
}

/// I1: the multiset of `seq` values equals `{0, ..., |L|-1}` exactly once
/// each.
fn verify_density(log: &[Transaction]) -> Result<()> {
    let mut seqs: Vec<u64> = log.iter().map(|t| t.seq).collect();
    seqs.sort_unstable();
    let duplicates = seqs.windows(2).filter(|w| w[0] == w[1]).count();
    if duplicates > 0 {
        return Err(BankingError::ConsistencyFailure(format!(
            "{duplicates} duplicate seq value(s) found after merge"
        )));
    }
    if seqs.iter().enumerate().any(|(i, &s)| s != i as u64) {
        return Err(BankingError::ConsistencyFailure(
            "seq values are not densely packed as 0..len-1".into(),
        ));
    }
    Ok(())
}

/// I5: for all i < j, `log[i].transaction_date <= log[j].transaction_date`
/// once ordered by `seq`.
fn verify_order(log: &[Transaction]) -> Result<()> {
    let mut ordered: Vec<&Transaction> = log.iter().collect();
    ordered.sort_by_key(|t| t.seq);
    for pair in ordered.windows(2) {
        if pair[0].transaction_date > pair[1].transaction_date {
            return Err(BankingError::ConsistencyFailure(format!(
                "transaction_date out of order at seq={}",
                pair[1].seq
            )));
        }
    }
    Ok(())
}

/// I6 (account logs only): `round(log[i-1].balance + log[i].amount, 2) ==
/// log[i].balance`.
fn verify_balance_continuity(log: &[Transaction]) -> Result<()> {
    let mut ordered: Vec<&Transaction> = log.iter().collect();
    ordered.sort_by_key(|t| t.seq);
    for pair in ordered.windows(2) {
        let (Some(prev_balance), Some(amount), Some(balance)) =
            (pair[0].balance.clone(), Some(pair[1].amount.clone()), pair[1].balance.clone())
        else {
            continue;
        };
        let expected = round_2(prev_balance + amount);
        if round_2(balance.clone()) != expected {
            return Err(BankingError::ConsistencyFailure(format!(
                "balance discontinuity at seq={}: expected {expected}, found {balance}",
                pair[1].seq
            )));
        }
    }
    Ok(())
}

fn round_2(value: BigDecimal) -> BigDecimal {
    value.with_scale_round(2, bigdecimal::RoundingMode::HalfEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataOrigin, LogKind, Subject, TransactionType};
    use bigdecimal::FromPrimitive;
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, HashMap};

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    fn amount(n: i64) -> BigDecimal {
        BigDecimal::from_i64(n).unwrap()
    }

    fn tx(seq: u64, date: NaiveDateTime, amount: BigDecimal, balance: Option<BigDecimal>) -> Transaction {
        Transaction {
            seq,
            transaction_id: None,
            kind: LogKind::BankAccount,
            r#type: TransactionType::Unknown,
            currency: "EUR".into(),
            amount,
            balance,
            value_date: date,
            transaction_date: date,
            source: Subject::UnknownSubject,
            destination: Subject::UnknownSubject,
            account: None,
            card: None,
            details: BTreeMap::new(),
            keywords: Default::default(),
            comment: String::new(),
            category: None,
            tags: Vec::new(),
            flags: HashMap::new(),
            status_flags: Default::default(),
        }
    }

    fn cc_tx(seq: u64, date: NaiveDateTime, amount: BigDecimal, kind: TransactionType, invalid: bool) -> Transaction {
        let mut t = tx(seq, date, amount, None);
        t.kind = LogKind::BankCreditCard;
        t.r#type = kind;
        t.status_flags.invalid = invalid;
        t
    }

    #[allow(dead_code)]
    fn mark_rules(t: &mut Transaction, field: &str) {
        t.mark_origin(field, DataOrigin::Rules);
    }

    // S1 — empty store insertion.
    #[test]
    fn s1_empty_store_insertion() {
        let fetched = vec![
            tx(999, dt(2019, 1, 1, 0, 0), amount(-1), None),
            tx(999, dt(2019, 1, 1, 1, 0), amount(-2), None),
            tx(999, dt(2019, 1, 2, 0, 0), amount(-3), None),
        ];
        let (ops, report) = merge(&[], &fetched).unwrap();
        assert_eq!(report, MergeReport { inserted: 3, updated: 0, removed: 0 });
        let seqs: Vec<u64> = ops
            .iter()
            .map(|op| match op {
                ReconcileOp::Insert(t) => t.seq,
                _ => panic!("expected only inserts"),
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    fn s1_output() -> Vec<Transaction> {
        vec![
            tx(0, dt(2019, 1, 1, 0, 0), amount(-1), None),
            tx(1, dt(2019, 1, 1, 1, 0), amount(-2), None),
            tx(2, dt(2019, 1, 2, 0, 0), amount(-3), None),
        ]
    }

    // S2 — append to tail.
    #[test]
    fn s2_append_to_tail() {
        let stored = s1_output();
        let fetched = vec![
            tx(999, dt(2019, 2, 1, 0, 0), amount(-4), None),
            tx(999, dt(2019, 2, 1, 1, 0), amount(-5), None),
            tx(999, dt(2019, 2, 2, 0, 0), amount(-6), None),
        ];
        let (ops, report) = merge(&stored, &fetched).unwrap();
        assert_eq!(report.inserted, 3);
        let seqs: Vec<u64> = ops
            .iter()
            .map(|op| match op {
                ReconcileOp::Insert(t) => t.seq,
                _ => panic!("expected only inserts"),
            })
            .collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    // S3 — prepend to head.
    #[test]
    fn s3_prepend_to_head() {
        let stored = vec![
            tx(0, dt(2019, 2, 1, 0, 0), amount(-4), None),
            tx(1, dt(2019, 2, 1, 1, 0), amount(-5), None),
            tx(2, dt(2019, 2, 2, 0, 0), amount(-6), None),
        ];
        let fetched = vec![
            tx(999, dt(2019, 1, 1, 0, 0), amount(-1), None),
            tx(999, dt(2019, 1, 1, 1, 0), amount(-2), None),
            tx(999, dt(2019, 1, 2, 0, 0), amount(-3), None),
        ];
        let (ops, report) = merge(&stored, &fetched).unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.updated, 3);

        let mut inserted_seqs: Vec<u64> = ops
            .iter()
            .filter_map(|op| match op {
                ReconcileOp::Insert(t) => Some(t.seq),
                _ => None,
            })
            .collect();
        inserted_seqs.sort();
        assert_eq!(inserted_seqs, vec![0, 1, 2]);

        let mut updated_seqs: Vec<u64> = ops
            .iter()
            .filter_map(|op| match op {
                ReconcileOp::Update(t) => Some(t.seq),
                _ => None,
            })
            .collect();
        updated_seqs.sort();
        assert_eq!(updated_seqs, vec![3, 4, 5]);
    }

    // S4 — identical fetch is idempotent.
    #[test]
    fn s4_identical_fetch_is_idempotent() {
        let stored = vec![
            tx(0, dt(2019, 1, 1, 0, 0), amount(-1), None),
            tx(1, dt(2019, 1, 1, 1, 0), amount(-2), None),
            tx(2, dt(2019, 1, 2, 0, 0), amount(-3), None),
            tx(3, dt(2019, 2, 1, 0, 0), amount(-4), None),
            tx(4, dt(2019, 2, 1, 1, 0), amount(-5), None),
            tx(5, dt(2019, 2, 2, 0, 0), amount(-6), None),
        ];
        let fetched = stored.clone();
        let (ops, report) = merge(&stored, &fetched).unwrap();
        assert!(ops.is_empty());
        assert_eq!(report, MergeReport::default());
    }

    // S5 — diverged middle (fail).
    #[test]
    fn s5_diverged_middle_fails() {
        let stored = vec![
            tx(3, dt(2019, 2, 1, 0, 0), amount(-4), None),
            tx(4, dt(2019, 2, 1, 1, 0), amount(-5), None),
            tx(5, dt(2019, 2, 2, 0, 0), amount(-6), None),
        ];
        let fetched = vec![
            tx(999, dt(2019, 2, 1, 0, 0), amount(-4), None),
            tx(999, dt(2019, 2, 1, 1, 0), amount_decimal("-5.5"), None),
            tx(999, dt(2019, 2, 2, 0, 0), amount(-6), None),
        ];
        let err = merge(&stored, &fetched).unwrap_err();
        match err {
            BankingError::DivergedHistory { stored_seq, .. } => assert_eq!(stored_seq, 4),
            other => panic!("expected DivergedHistory, got {other:?}"),
        }
    }

    fn amount_decimal(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    #[test]
    fn invalid_fetched_record_pairs_with_diverged_stored_record() {
        // A pending (invalid) debit settles with a different classified
        // type, so its fingerprint no longer matches the stored pending
        // record at the same (date, amount): the pairing rule of the
        // Open Question (spec.md §9) resolves it as a remove instead of
        // raising DivergedHistory.
        let stored = vec![
            cc_tx(0, dt(2024, 1, 1, 0, 0), amount(-10), TransactionType::Unknown, false),
            cc_tx(1, dt(2024, 1, 2, 0, 0), amount(-20), TransactionType::Unknown, false),
            cc_tx(2, dt(2024, 1, 3, 0, 0), amount(-30), TransactionType::Unknown, false),
        ];
        let fetched = vec![
            cc_tx(999, dt(2024, 1, 1, 0, 0), amount(-10), TransactionType::Unknown, false),
            cc_tx(999, dt(2024, 1, 2, 0, 0), amount(-20), TransactionType::Purchase, true),
            cc_tx(999, dt(2024, 1, 3, 0, 0), amount(-30), TransactionType::Unknown, false),
        ];
        let (ops, report) = merge(&stored, &fetched).unwrap();
        assert_eq!(report.removed, 1);
        assert!(ops.iter().any(|op| matches!(op, ReconcileOp::Remove(t) if t.seq == 1)));
    }

    #[test]
    fn verify_invariants_detects_balance_discontinuity() {
        let log = vec![
            tx(0, dt(2024, 1, 1, 0, 0), amount(100), Some(amount(100))),
            tx(1, dt(2024, 1, 2, 0, 0), amount(-5), Some(amount(999))),
        ];
        let err = verify_invariants(&log, true).unwrap_err();
        assert!(matches!(err, BankingError::ConsistencyFailure(_)));
    }

    #[test]
    fn verify_invariants_accepts_continuous_balances() {
        let log = vec![
            tx(0, dt(2024, 1, 1, 0, 0), amount(100), Some(amount(100))),
            tx(1, dt(2024, 1, 2, 0, 0), amount(-5), Some(amount(95))),
        ];
        assert!(verify_invariants(&log, true).is_ok());
    }
}
