//! Tiered matching of element codes against known unit-cost codes

use super::normalize::normalize;
use costsync_types::{MatchMethod, UnitCostInput};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{UnitCostEntry, DEFAULT_CURRENCY};

static MAJOR_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]+\d+").expect("major segment regex is valid"));

/// Price information attached to a known code
#[derive(Debug, Clone, PartialEq)]
pub struct CostInfo {
    pub unit_price: f64,
    pub currency: String,
}

/// Known unit-cost codes, keyed by normalized code.
///
/// Codes without a positive unit price are never admitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownCostCodes {
    codes: BTreeMap<String, CostInfo>,
}

impl KnownCostCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a code; returns false when the price is not usable.
    /// A later insert of the same normalized code replaces the earlier one.
    pub fn insert(&mut self, code: &str, unit_price: f64, currency: &str) -> bool {
        if unit_price.is_nan() || unit_price <= 0.0 {
            return false;
        }
        let normalized = normalize(code);
        if normalized.is_empty() {
            return false;
        }
        self.codes.insert(
            normalized,
            CostInfo {
                unit_price,
                currency: currency.to_string(),
            },
        );
        true
    }

    pub fn from_inputs(inputs: &[UnitCostInput]) -> Self {
        let mut known = Self::new();
        for input in inputs {
            let currency = input.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);
            known.insert(&input.code, input.unit_price, currency);
        }
        known
    }

    pub fn from_entries(entries: &[UnitCostEntry]) -> Self {
        let mut known = Self::new();
        for entry in entries {
            known.insert(&entry.normalized_code, entry.unit_price, &entry.currency);
        }
        known
    }

    pub fn get(&self, normalized_code: &str) -> Option<&CostInfo> {
        self.codes.get(normalized_code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CostInfo)> {
        self.codes.iter().map(|(code, info)| (code.as_str(), info))
    }
}

/// Result of a successful lookup
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch<'a> {
    /// Known code that matched
    pub code: &'a str,
    pub info: &'a CostInfo,
    pub method: MatchMethod,
}

/// Remove every non-alphanumeric character
pub fn simplify(code: &str) -> String {
    code.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Leading letters+digits run (`"C2.1"` → `"C2"`)
pub fn major_segment(code: &str) -> Option<&str> {
    MAJOR_SEGMENT.find(code).map(|m| m.as_str())
}

/// Find the best known code for an already normalized code.
///
/// Tiers, first hit wins: direct, simplified, major-segment. Known codes are
/// scanned in sorted order. `None` means "no cost data", not an error.
pub fn find_best_match<'a>(
    normalized_code: &str,
    known: &'a KnownCostCodes,
) -> Option<BestMatch<'a>> {
    if normalized_code.is_empty() {
        return None;
    }

    if let Some((code, info)) = known.codes.get_key_value(normalized_code) {
        return Some(BestMatch {
            code,
            info,
            method: MatchMethod::Direct,
        });
    }

    let simplified = simplify(normalized_code);
    if let Some((code, info)) = known
        .codes
        .iter()
        .find(|(code, _)| simplify(code) == simplified)
    {
        return Some(BestMatch {
            code,
            info,
            method: MatchMethod::Simplified,
        });
    }

    // Loose tier: can pair unrelated sub-codes that share a segment.
    let segment = major_segment(normalized_code)?;
    let hit = known
        .codes
        .get_key_value(segment)
        .or_else(|| {
            known
                .codes
                .iter()
                .find(|(code, _)| major_segment(code) == Some(segment))
        });

    hit.map(|(code, info)| {
        debug!(
            query = normalized_code,
            matched = %code,
            "Major-segment match"
        );
        BestMatch {
            code,
            info,
            method: MatchMethod::MajorSegment,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(codes: &[(&str, f64)]) -> KnownCostCodes {
        let mut known = KnownCostCodes::new();
        for (code, price) in codes {
            known.insert(code, *price, "CHF");
        }
        known
    }

    #[test]
    fn test_direct_match() {
        let known = known(&[("C01.01", 50.0)]);
        let hit = find_best_match("C1.1", &known).unwrap();
        assert_eq!(hit.code, "C1.1");
        assert_eq!(hit.method, MatchMethod::Direct);
        assert_eq!(hit.info.unit_price, 50.0);
    }

    #[test]
    fn test_simplified_match_ignores_separators() {
        let known = known(&[("C2-1", 40.0)]);
        let hit = find_best_match("C2.1", &known).unwrap();
        assert_eq!(hit.code, "C2-1");
        assert_eq!(hit.method, MatchMethod::Simplified);
    }

    #[test]
    fn test_major_segment_matches_parent_code() {
        let known = known(&[("C2", 30.0)]);
        let hit = find_best_match("C2.1", &known).unwrap();
        assert_eq!(hit.code, "C2");
        assert_eq!(hit.method, MatchMethod::MajorSegment);
    }

    #[test]
    fn test_major_segment_prefers_exact_segment() {
        let known = known(&[("C2.1", 10.0), ("C2", 30.0), ("C2.5", 20.0)]);
        let hit = find_best_match("C2.9", &known).unwrap();
        assert_eq!(hit.code, "C2");
    }

    #[test]
    fn test_major_segment_sibling_fallback_is_deterministic() {
        let known = known(&[("C2.5", 20.0), ("C2.1", 10.0)]);
        let hit = find_best_match("C2.9", &known).unwrap();
        assert_eq!(hit.code, "C2.1");
        assert_eq!(hit.method, MatchMethod::MajorSegment);
    }

    #[test]
    fn test_no_match() {
        let known = known(&[("C2", 30.0)]);
        assert!(find_best_match("E1.1", &known).is_none());
        assert!(find_best_match("", &known).is_none());
        assert!(find_best_match("WALL", &known).is_none());
    }

    #[test]
    fn test_non_positive_prices_are_not_known() {
        let known = known(&[("C1.1", 0.0), ("C1.2", -5.0)]);
        assert!(known.is_empty());
        assert!(find_best_match("C1.1", &known).is_none());
    }
}
