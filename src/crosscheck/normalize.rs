//! Normalization applied to model output before any value comparison:
//! identifier case/whitespace folding, `YYYY-MM` date canonicalization,
//! skill canonicalization through the synonym table, and the PII
//! normal forms shared with duplicate-detection hashing.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn date_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // 2021-03, 2021.3, 2021/03, optionally with a day suffix
            Regex::new(r"^(\d{4})[-./](\d{1,2})(?:[-./]\d{1,2})?$").unwrap(),
            // 03/2021, 3.2021
            Regex::new(r"^(?:(\d{1,2})[-./])(\d{4})$").unwrap(),
            // 2021년 3월
            Regex::new(r"^(\d{4})\s*년\s*(\d{1,2})\s*월?$").unwrap(),
            // bare year
            Regex::new(r"^(\d{4})$").unwrap(),
        ]
    })
}

/// Canonicalize a date string to `YYYY-MM`. A bare year becomes `YYYY-01`.
/// Returns `None` for anything unrecognizable.
pub fn normalize_date(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let patterns = date_patterns();

    if let Some(caps) = patterns[0].captures(trimmed) {
        return format_ym(&caps[1], &caps[2]);
    }
    if let Some(caps) = patterns[1].captures(trimmed) {
        return format_ym(&caps[2], &caps[1]);
    }
    if let Some(caps) = patterns[2].captures(trimmed) {
        return format_ym(&caps[1], &caps[2]);
    }
    if let Some(caps) = patterns[3].captures(trimmed) {
        return format_ym(&caps[1], "1");
    }

    None
}

fn format_ym(year: &str, month: &str) -> Option<String> {
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some(format!("{}-{:02}", year, month))
}

/// Case/whitespace-insensitive comparison form for free-text identifiers
pub fn normalize_identifier(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Canonical skill name: folded, then mapped through the synonym table
pub fn canonical_skill(raw: &str, synonyms: &BTreeMap<String, String>) -> String {
    let folded = normalize_identifier(raw);
    synonyms.get(&folded).cloned().unwrap_or(folded)
}

/// Phone normal form used for comparison and duplicate hashing: digits only
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Email normal form: trimmed, lowercased local part and domain
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}
