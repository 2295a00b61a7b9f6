//! Hot-tier key design: `{prefix}:{day}:{type}`
//!
//! The same layout serves point lookup (`agg:2024-01-01:deposits`) and
//! enumeration by glob (`agg:*`, `agg:2024-01-01:*`, `agg:*:withdrawals`).

use crate::pipeline::types::{format_day, parse_day, AggregateKey, TransactionType};
use chrono::NaiveDate;

pub const DEFAULT_KEY_PREFIX: &str = "agg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDesign {
    prefix: String,
}

impl Default for KeyDesign {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeyDesign {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn key_for(&self, key: &AggregateKey) -> String {
        format!("{}:{}:{}", self.prefix, format_day(key.day), key.tx_type.as_str())
    }

    /// Build a scan pattern; `None` segments become `*`
    pub fn pattern(&self, day: Option<NaiveDate>, tx_type: Option<TransactionType>) -> String {
        match (day, tx_type) {
            (None, None) => format!("{}:*", self.prefix),
            (Some(day), None) => format!("{}:{}:*", self.prefix, format_day(day)),
            (None, Some(tx_type)) => format!("{}:*:{}", self.prefix, tx_type.as_str()),
            (Some(day), Some(tx_type)) => self.key_for(&AggregateKey::new(day, tx_type)),
        }
    }

    pub fn all_keys_pattern(&self) -> String {
        self.pattern(None, None)
    }

    /// Parse a raw key back into an `AggregateKey`
    ///
    /// Returns `None` for keys under another prefix or with the wrong number
    /// of segments; those are skipped, not treated as errors.
    pub fn parse_key(&self, raw: &str) -> Option<AggregateKey> {
        let rest = raw.strip_prefix(self.prefix.as_str())?.strip_prefix(':')?;
        let mut segments = rest.split(':');

        let day = segments.next()?;
        let tx_type = segments.next()?;
        if segments.next().is_some() {
            return None;
        }

        Some(AggregateKey::new(parse_day(day).ok()?, tx_type.parse().ok()?))
    }
}

/// Glob match with `*` (any run) and `?` (any single char)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut star_text = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_text = t;
            p += 1;
        } else if let Some(star_pos) = star {
            // Backtrack: let the last star swallow one more char
            p = star_pos + 1;
            star_text += 1;
            t = star_text;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}
