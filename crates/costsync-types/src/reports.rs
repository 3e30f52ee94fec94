//! Outcome reports returned by the reconciliation service

use serde::{Deserialize, Serialize};

/// Counters produced by one reconciliation run.
///
/// A project that does not exist yields the all-zero default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub deleted_cost_elements: u64,
    pub processed_bim_elements: usize,
    pub skipped_bim_elements: usize,
    /// Elements in `pending` status, skipped without further checks
    pub pending_bim_elements: usize,
    pub processed_excel_only_items: usize,
    /// Spreadsheet leaves whose unit-cost entry could not be created
    pub missing_cost_data: usize,
    pub inserted_cost_elements: usize,
    pub failed_inserts: usize,
    pub project_id: Option<String>,
    pub delivered_count: usize,
    /// Delivery metadata had to be synthesized (e.g. missing upload timestamp)
    pub fallback_metadata_used: bool,
}

impl ReconciliationResult {
    /// True when the project resolved and something was reconciled
    pub fn has_project(&self) -> bool {
        self.project_id.is_some()
    }
}

/// Outcome of a spreadsheet upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcelImportResult {
    pub project_id: String,
    pub project_created: bool,
    /// Unit-cost entries created or updated
    pub unit_costs_saved: usize,
    /// Rows ignored for lacking a code or a positive unit price
    pub rows_ignored: usize,
}

/// Documents removed by a project data deletion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProjectReport {
    pub project_found: bool,
    pub cost_elements: u64,
    pub unit_costs: u64,
    pub summaries: u64,
    pub kennwerte: u64,
}

impl DeleteProjectReport {
    /// Aggregate number of deleted documents
    pub fn deleted_count(&self) -> u64 {
        self.cost_elements + self.unit_costs + self.summaries + self.kennwerte
    }
}
