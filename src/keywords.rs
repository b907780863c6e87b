//! Literal-extraction helpers shared by every provider parser
//! (spec.md §4.2.4), ported from `original_source/src/common/parsing.py`.

use std::collections::BTreeSet;

use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

/// NFKD-normalizes, strips anything outside ASCII, and upper-cases.
/// Turns e.g. `"Café España"` into `"CAFE ESPANA"`.
pub fn normalize(input: &str) -> String {
    input
        .nfkd()
        .filter(|c| c.is_ascii())
        .collect::<String>()
        .to_uppercase()
}

/// Replaces every non-alphanumeric run with a single space.
pub fn depunctuate(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out
}

/// Splits on whitespace, drops tokens of length ≤ 2, deduplicates.
pub fn tokenize(input: &str) -> BTreeSet<String> {
    input
        .split_whitespace()
        .filter(|tok| tok.len() > 2)
        .map(|tok| tok.to_owned())
        .collect()
}

/// `normalize` → `depunctuate` → `tokenize`, the full pipeline for one
/// piece of free text.
pub fn keywords_of(text: &str) -> BTreeSet<String> {
    tokenize(&depunctuate(&normalize(text)))
}

/// Looks up a dotted path (`"a.b.c"`) inside a `serde_json::Value`,
/// returning `None` if any segment is missing or not an object.
pub fn get_nested<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// [`get_nested`], returning the value's string contents when present.
pub fn get_nested_str<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    get_nested(value, path)?.as_str()
}

/// Extracts keywords from a raw provider record: the string values found
/// at `field_paths` (dotted paths into `raw`), plus every string-valued
/// entry of a sibling `details` map the parser has already built, per
/// spec.md §4.2.4.
pub fn extract_keywords<'a>(
    raw: &Value,
    field_paths: impl IntoIterator<Item = &'a str>,
    details: &std::collections::BTreeMap<String, String>,
) -> BTreeSet<String> {
    let mut keywords = BTreeSet::new();
    for path in field_paths {
        if let Some(Value::String(s)) = get_nested(raw, path) {
            keywords.extend(keywords_of(s));
        }
    }
    for value in details.values() {
        keywords.extend(keywords_of(value));
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_accents_and_upcases() {
        assert_eq!(normalize("Café España"), "CAFE ESPANA");
    }

    #[test]
    fn depunctuate_collapses_punctuation_runs() {
        assert_eq!(depunctuate("PAY.PAL  *MOLESKINE!!"), "PAY PAL MOLESKINE ");
    }

    #[test]
    fn tokenize_drops_short_tokens_and_dedupes() {
        let tokens = tokenize("PAY PAL MOLESKINE PAY");
        let expected: BTreeSet<String> = ["PAL", "MOLESKINE"].into_iter().map(String::from).collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn keywords_of_runs_the_full_pipeline() {
        let tokens = keywords_of("Pay.Pal *Moleskine");
        let expected: BTreeSet<String> = ["PAY", "PAL", "MOLESKINE"].into_iter().map(String::from).collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn get_nested_walks_dotted_paths() {
        let raw = serde_json::json!({"a": {"b": {"c": "hello"}}});
        assert_eq!(get_nested(&raw, "a.b.c"), Some(&Value::String("hello".to_owned())));
        assert_eq!(get_nested(&raw, "a.b.missing"), None);
        assert_eq!(get_nested(&raw, "a.x.c"), None);
    }

    #[test]
    fn get_nested_indexes_into_arrays() {
        let raw = serde_json::json!({"comments": [{"text": "first"}, {"text": "second"}]});
        assert_eq!(get_nested_str(&raw, "comments.0.text"), Some("first"));
        assert_eq!(get_nested_str(&raw, "comments.1.text"), Some("second"));
        assert_eq!(get_nested_str(&raw, "comments.5.text"), None);
    }

    #[test]
    fn extract_keywords_combines_paths_and_details() {
        let raw = serde_json::json!({"concept": "Pay.Pal *Moleskine"});
        let mut details = std::collections::BTreeMap::new();
        details.insert("drawee".to_owned(), "Acme Corp".to_owned());
        let found = extract_keywords(&raw, ["concept"], &details);
        assert!(found.contains("MOLESKINE"));
        assert!(found.contains("ACME"));
        assert!(found.contains("CORP"));
    }
}
