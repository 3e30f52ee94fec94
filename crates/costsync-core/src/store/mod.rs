//! Document store interface
//!
//! Two logical databases: the quantity take-off side (`projects`, `elements`)
//! and the cost side (`costData`, `costElements`, `costSummaries`, `kennwerte`).

pub mod shared;
pub mod sqlite;

use crate::error::CoreResult;
use crate::models::{
    BimElement, CostElement, KennwerteRecord, Project, ProjectCostSummary, UnitCostEntry,
};
use async_trait::async_trait;

pub use shared::{SharedStore, SqliteConnector, StaticConnector, StoreConnector};
pub use sqlite::SqliteStore;

/// Outcome of an unordered bulk insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkInsertOutcome {
    pub inserted: usize,
    pub failed: usize,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Cheap liveness check
    async fn ping(&self) -> CoreResult<()>;

    // ===================
    // Quantity take-off side
    // ===================

    /// Case-insensitive exact name match
    async fn find_project_by_name(&self, name: &str) -> CoreResult<Option<Project>>;

    async fn list_projects(&self) -> CoreResult<Vec<Project>>;

    async fn upsert_project(&self, project: &Project) -> CoreResult<()>;

    /// Elements of one project in insertion order
    async fn elements_for_project(&self, project_id: &str) -> CoreResult<Vec<BimElement>>;

    async fn all_elements(&self) -> CoreResult<Vec<BimElement>>;

    async fn upsert_elements(&self, elements: &[BimElement]) -> CoreResult<usize>;

    // ===================
    // Cost side
    // ===================

    async fn unit_costs_for_project(&self, project_id: &str) -> CoreResult<Vec<UnitCostEntry>>;

    async fn upsert_unit_cost(&self, entry: &UnitCostEntry) -> CoreResult<()>;

    async fn delete_unit_costs(&self, project_id: &str) -> CoreResult<u64>;

    /// Sum of unit-cost row totals (informational aggregate)
    async fn sum_unit_cost_totals(&self, project_id: &str) -> CoreResult<f64>;

    async fn cost_elements_for_project(&self, project_id: &str) -> CoreResult<Vec<CostElement>>;

    async fn delete_cost_elements(&self, project_id: &str) -> CoreResult<u64>;

    /// Insert every element independently; one failure does not stop the rest
    async fn insert_cost_elements(&self, elements: &[CostElement])
        -> CoreResult<BulkInsertOutcome>;

    async fn upsert_summary(&self, summary: &ProjectCostSummary) -> CoreResult<()>;

    async fn get_summary(&self, project_id: &str) -> CoreResult<Option<ProjectCostSummary>>;

    async fn delete_summary(&self, project_id: &str) -> CoreResult<u64>;

    async fn upsert_kennwerte(&self, record: &KennwerteRecord) -> CoreResult<()>;

    async fn get_kennwerte(&self, project_id: &str) -> CoreResult<Option<KennwerteRecord>>;

    async fn delete_kennwerte(&self, project_id: &str) -> CoreResult<u64>;
}
