//! Batch reconciliation of BIM quantities and spreadsheet unit costs
//!
//! For one project, the cost-element set is deleted and rebuilt from:
//! 1. active BIM elements whose code has a usable unit cost (`qto+costdata`)
//! 2. spreadsheet leaves whose code no costed BIM element covers (`excel-import-leaf`)
//!
//! The delete happens before the insert; a crash in between leaves the project
//! without cost elements until the next successful run.

use crate::delivery::{CostDelivery, DeliveryMetadata};
use crate::ebkp::normalize;
use crate::error::CoreResult;
use crate::models::{CostElement, CostSource, Project, UnitCostEntry, DEFAULT_CURRENCY};
use crate::store::DocumentStore;
use crate::summary::recompute_summary;
use chrono::Utc;
use costsync_types::{flatten_leaves, CostItem, ReconciliationResult, SpreadsheetItem};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Spreadsheet input of one reconciliation run
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInput<'a> {
    pub project_name: &'a str,
    /// Rows the front end matched to BIM codes
    pub matched_items: &'a [SpreadsheetItem],
    /// Complete spreadsheet tree
    pub all_items: &'a [SpreadsheetItem],
}

/// Per-project async run locks, keyed by lower-cased project name
#[derive(Default)]
pub struct RunLocks {
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, project_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = project_name.trim().to_lowercase();
        Arc::clone(self.locks.entry(key).or_default().value())
    }
}

/// Staging area of one run
#[derive(Default)]
struct Staged {
    elements: Vec<CostElement>,
    deliveries: Vec<CostItem>,
    delivery_ids: HashSet<String>,
    covered_codes: HashSet<String>,
}

impl Staged {
    /// Returns false when the id was already staged for delivery
    fn stage_delivery(&mut self, id: &str, cost: f64, unit_cost: f64) -> bool {
        if !self.delivery_ids.insert(id.to_string()) {
            return false;
        }
        self.deliveries.push(CostItem::new(id, cost, unit_cost));
        true
    }
}

/// Reconcile one project.
///
/// An unknown project yields an all-zero result without side effects. Store
/// failures after the project is resolved are logged and returned.
pub async fn reconcile(
    store: &dyn DocumentStore,
    input: ReconcileInput<'_>,
    delivery: Option<&dyn CostDelivery>,
) -> CoreResult<ReconciliationResult> {
    let Some(project) = store.find_project_by_name(input.project_name).await? else {
        info!(project = input.project_name, "Project not found, nothing to reconcile");
        return Ok(ReconciliationResult::default());
    };

    match run(store, &project, input, delivery).await {
        Ok(result) => Ok(result),
        Err(e) => {
            error!(project = %project.name, error = %e, "Reconciliation failed");
            Err(e)
        }
    }
}

async fn run(
    store: &dyn DocumentStore,
    project: &Project,
    input: ReconcileInput<'_>,
    delivery: Option<&dyn CostDelivery>,
) -> CoreResult<ReconciliationResult> {
    let project_id = project.id.as_str();
    let metadata = DeliveryMetadata::from_project(project, Utc::now());

    let mut result = ReconciliationResult {
        project_id: Some(project.id.clone()),
        fallback_metadata_used: metadata.fallback_used,
        ..Default::default()
    };

    result.deleted_cost_elements = store.delete_cost_elements(project_id).await?;

    save_matched_unit_costs(store, project_id, input.matched_items).await?;

    let mut lookup: HashMap<String, UnitCostEntry> = store
        .unit_costs_for_project(project_id)
        .await?
        .into_iter()
        .map(|entry| (entry.normalized_code.clone(), entry))
        .collect();

    let mut staged = Staged::default();
    cost_bim_elements(store, project_id, &lookup, &mut staged, &mut result).await?;
    cost_spreadsheet_leaves(
        store,
        project_id,
        input.all_items,
        &mut lookup,
        &mut staged,
        &mut result,
    )
    .await;

    let outcome = store.insert_cost_elements(&staged.elements).await?;
    result.inserted_cost_elements = outcome.inserted;
    result.failed_inserts = outcome.failed;
    if outcome.failed > 0 {
        warn!(
            project = %project.name,
            failed = outcome.failed,
            inserted = outcome.inserted,
            "Some cost elements could not be inserted"
        );
    }

    recompute_summary(store, project_id).await?;

    if let Some(delivery) = delivery {
        if !staged.deliveries.is_empty() {
            let delivered = delivery.deliver(&staged.deliveries, &metadata).await;
            result.delivered_count = delivered.count;
        }
    }

    info!(
        project = %project.name,
        deleted = result.deleted_cost_elements,
        processed = result.processed_bim_elements,
        skipped = result.skipped_bim_elements,
        pending = result.pending_bim_elements,
        excel_only = result.processed_excel_only_items,
        inserted = result.inserted_cost_elements,
        delivered = result.delivered_count,
        "Reconciliation finished"
    );
    Ok(result)
}

/// Matched rows with a code and a positive unit price become `excel-import` entries
async fn save_matched_unit_costs(
    store: &dyn DocumentStore,
    project_id: &str,
    matched_items: &[SpreadsheetItem],
) -> CoreResult<usize> {
    let mut saved = 0;
    for item in flatten_leaves(matched_items) {
        let Some(code) = item.code() else {
            continue;
        };
        if item.effective_unit_price() <= 0.0 {
            continue;
        }
        let entry = UnitCostEntry::from_spreadsheet(
            project_id,
            &normalize(code),
            item,
            CostSource::ExcelImport,
            DEFAULT_CURRENCY,
        );
        store.upsert_unit_cost(&entry).await?;
        saved += 1;
    }
    debug!(project_id, saved, "Matched unit costs saved");
    Ok(saved)
}

async fn cost_bim_elements(
    store: &dyn DocumentStore,
    project_id: &str,
    lookup: &HashMap<String, UnitCostEntry>,
    staged: &mut Staged,
    result: &mut ReconciliationResult,
) -> CoreResult<()> {
    let elements = store.elements_for_project(project_id).await?;

    for element in &elements {
        if element.is_pending() {
            result.pending_bim_elements += 1;
            continue;
        }
        if !element.is_active() {
            continue;
        }

        let Some(code) = element.classification_code() else {
            result.skipped_bim_elements += 1;
            continue;
        };
        let normalized = normalize(code);

        let Some(entry) = lookup.get(&normalized).filter(|entry| entry.has_cost()) else {
            result.skipped_bim_elements += 1;
            continue;
        };

        let quantity = element.effective_quantity();
        let total = entry.unit_price * quantity;
        if total.is_nan() || total <= 0.0 {
            result.skipped_bim_elements += 1;
            continue;
        }

        let cost_element = CostElement::from_bim(element, entry, quantity);
        staged.stage_delivery(element.external_id(), total, entry.unit_price);
        staged.elements.push(cost_element);
        staged.covered_codes.insert(normalized);
        result.processed_bim_elements += 1;
    }

    if result.pending_bim_elements > 0 {
        warn!(
            project_id,
            pending = result.pending_bim_elements,
            "Pending BIM elements skipped"
        );
    }
    Ok(())
}

async fn cost_spreadsheet_leaves(
    store: &dyn DocumentStore,
    project_id: &str,
    all_items: &[SpreadsheetItem],
    lookup: &mut HashMap<String, UnitCostEntry>,
    staged: &mut Staged,
    result: &mut ReconciliationResult,
) {
    for (index, leaf) in flatten_leaves(all_items).into_iter().enumerate() {
        let Some(code) = leaf.code() else {
            continue;
        };
        let normalized = normalize(code);
        if staged.covered_codes.contains(&normalized) {
            continue;
        }
        let cost = leaf.cost_value();
        if cost.is_nan() || cost <= 0.0 {
            continue;
        }

        if !lookup.contains_key(&normalized) {
            let entry = UnitCostEntry::from_spreadsheet(
                project_id,
                &normalized,
                leaf,
                CostSource::ExcelImportLeaf,
                DEFAULT_CURRENCY,
            );
            if let Err(e) = store.upsert_unit_cost(&entry).await {
                warn!(project_id, code = %normalized, error = %e, "Could not create unit cost for leaf");
                result.missing_cost_data += 1;
                continue;
            }
            lookup.insert(normalized.clone(), entry);
        }
        let Some(entry) = lookup.get(&normalized) else {
            continue;
        };

        staged.stage_delivery(&entry.id, cost, entry.unit_price);
        staged
            .elements
            .push(CostElement::from_leaf(index, leaf, entry));
        result.processed_excel_only_items += 1;
    }
}
