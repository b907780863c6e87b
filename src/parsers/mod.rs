//! Parser (C2): one module per provider, each a pure function from a raw
//! provider JSON record to the canonical [`crate::model::Transaction`].
//! A parser returns `Ok(None)` for a structurally-unusable record; the
//! caller filters those out, never treating them as an error (spec.md
//! §4.2, §7 `ParseFailure` is reserved for records whose shape cannot be
//! decoded at all).

pub mod bbva;
pub mod erste;

use chrono::NaiveDateTime;

use crate::error::{BankingError, Result};

/// Decodes the `YYYY-MM-DDTHH:MM:SS` prefix shared by both providers'
/// timestamp formats, ignoring any fractional seconds or zone suffix.
pub(crate) fn decode_date(raw: &str) -> Result<NaiveDateTime> {
    let prefix = raw.get(0..19).ok_or_else(|| BankingError::ParseFailure(format!("timestamp too short: {raw}")))?;
    NaiveDateTime::parse_from_str(prefix, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| BankingError::ParseFailure(format!("invalid timestamp {raw}: {e}")))
}

pub(crate) fn title_case(input: &str) -> String {
    input
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
