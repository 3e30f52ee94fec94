//! Code matching results exchanged with the front end

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy tier that produced a match, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    /// Exact equality of normalized codes
    Direct,
    /// Equality after stripping separators
    Simplified,
    /// Shared leading letter+digits run
    MajorSegment,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Direct => "direct",
            MatchMethod::Simplified => "simplified",
            MatchMethod::MajorSegment => "major-segment",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One BIM classification code resolved against the known unit costs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeMatch {
    /// Normalized code found on the BIM element
    pub code: String,
    /// Known unit-cost code it resolved to
    pub matched_code: String,
    pub method: MatchMethod,
    pub unit_price: f64,
    pub currency: String,
    /// First element that carried this code
    #[serde(default)]
    pub element_id: Option<String>,
    /// Number of elements sharing the code (display statistic)
    #[serde(default)]
    pub element_count: usize,
}

/// Classification code available on active BIM elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EbkpCodeInfo {
    pub code: String,
    pub element_count: usize,
}
