//! Cost-update messages published to the broker topic
//!
//! One message carries at most one batch of costed elements. Consumers must
//! expect several messages for the same project/file.

use serde::{Deserialize, Serialize};

/// A single costed element as consumed downstream.
///
/// `id` is the element's stable external identifier (BIM global id) or the
/// unit-cost entry id for spreadsheet-only rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostItem {
    pub id: String,
    /// Total cost (unit price × quantity)
    pub cost: f64,
    /// Unit price the total was derived from
    pub cost_unit: f64,
}

impl CostItem {
    pub fn new(id: impl Into<String>, cost: f64, cost_unit: f64) -> Self {
        Self {
            id: id.into(),
            cost,
            cost_unit,
        }
    }
}

/// Broker message value. The message key is `file_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostMessage {
    /// Project display name
    pub project: String,
    /// Source spreadsheet/model filename
    pub filename: String,
    /// Upload timestamp (ISO-8601)
    pub timestamp: String,
    pub file_id: String,
    #[serde(default)]
    pub data: Vec<CostItem>,
}

impl CostMessage {
    /// Sum of `cost` over all items in this message
    pub fn total_cost(&self) -> f64 {
        self.data.iter().map(|item| item.cost).sum()
    }
}
