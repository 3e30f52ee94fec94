//! Per-project cost summary

use serde::{Deserialize, Serialize};

/// One-per-project aggregate, replaced wholesale after each reconciliation.
///
/// `total_from_elements` is authoritative; `total_from_cost_data` is kept
/// only to spot drift between unit-cost rows and the derived elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectCostSummary {
    pub project_id: String,
    /// Distinct cost elements
    pub element_count: usize,
    pub cost_data_count: usize,
    pub total_from_elements: f64,
    pub total_from_cost_data: f64,
    pub currency: String,
}

impl ProjectCostSummary {
    /// Cost-data total minus element total
    pub fn drift(&self) -> f64 {
        self.total_from_cost_data - self.total_from_elements
    }
}
