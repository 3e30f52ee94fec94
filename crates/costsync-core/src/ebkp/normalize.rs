//! Canonical form of EBKP classification codes

use once_cell::sync::Lazy;
use regex::Regex;

/// Letters, optional dot, digits, then dot-separated numeric segments
static CODE_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z]+)\.?(\d+)((?:\.\d+)*)$").expect("code shape regex is valid")
});

/// Canonicalize a classification code.
///
/// Whitespace is removed and letters uppercased; numeric segments lose their
/// leading zeros (`"C01.01"` → `"C1.1"`, `"C.1"` → `"C1"`). Input that does not
/// look like an EBKP code is returned uppercased and stripped, not rejected.
pub fn normalize(code: &str) -> String {
    let compact: String = code
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();

    let Some(caps) = CODE_SHAPE.captures(&compact) else {
        return compact;
    };

    let mut out = String::with_capacity(compact.len());
    out.push_str(&caps[1]);
    out.push_str(strip_zeros(&caps[2]));
    for segment in caps[3].split('.').filter(|s| !s.is_empty()) {
        out.push('.');
        out.push_str(strip_zeros(segment));
    }
    out
}

/// Null pass-through variant; blank input stays as it was
pub fn normalize_opt(code: Option<&str>) -> Option<String> {
    match code {
        Some(code) if !code.trim().is_empty() => Some(normalize(code)),
        Some(code) => Some(code.to_string()),
        None => None,
    }
}

fn strip_zeros(digits: &str) -> &str {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0"
    } else {
        trimmed
    }
}
