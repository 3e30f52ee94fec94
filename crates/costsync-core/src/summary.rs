//! Project cost summary aggregation
//!
//! Cost elements are the only source for the authoritative total. Unit-cost
//! rows are summed separately as a drift indicator and never added in.

use crate::error::CoreResult;
use crate::models::{CostElement, ProjectCostSummary, DEFAULT_CURRENCY};
use crate::store::DocumentStore;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Totals over distinct cost element ids
pub fn aggregate_elements(elements: &[CostElement]) -> (usize, f64) {
    let mut seen = HashSet::with_capacity(elements.len());
    let mut total = 0.0;
    for element in elements {
        if seen.insert(element.id.as_str()) {
            total += element.total_cost;
        }
    }
    (seen.len(), total)
}

/// Rebuild and replace the summary of one project
pub async fn recompute_summary(
    store: &dyn DocumentStore,
    project_id: &str,
) -> CoreResult<ProjectCostSummary> {
    let elements = store.cost_elements_for_project(project_id).await?;
    let (element_count, total_from_elements) = aggregate_elements(&elements);

    let cost_data_count = match store.unit_costs_for_project(project_id).await {
        Ok(entries) => entries.len(),
        Err(e) => {
            warn!(project_id, error = %e, "Cost data count unavailable, using 0");
            0
        }
    };
    let total_from_cost_data = match store.sum_unit_cost_totals(project_id).await {
        Ok(total) => total,
        Err(e) => {
            warn!(project_id, error = %e, "Cost data aggregation failed, using 0");
            0.0
        }
    };

    let currency = elements
        .first()
        .map(|element| element.currency.clone())
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    let summary = ProjectCostSummary {
        project_id: project_id.to_string(),
        element_count,
        cost_data_count,
        total_from_elements,
        total_from_cost_data,
        currency,
    };
    store.upsert_summary(&summary).await?;

    debug!(
        project_id,
        elements = element_count,
        total = total_from_elements,
        drift = summary.drift(),
        "Cost summary recomputed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;
    use crate::store::SqliteStore;

    fn element(id: &str, total: f64) -> CostElement {
        CostElement {
            id: id.to_string(),
            project_id: "p1".to_string(),
            qto_element_id: None,
            unit_cost_id: None,
            global_id: None,
            ebkp_code: "C1".to_string(),
            normalized_code: "C1".to_string(),
            name: None,
            ifc_class: None,
            level: None,
            quantity: 1.0,
            unit_cost: total,
            total_cost: total,
            currency: "CHF".to_string(),
            provenance: Provenance::QtoCostData,
            extra: Default::default(),
        }
    }

    #[test]
    fn test_duplicates_counted_once() {
        let elements = vec![element("a", 100.0), element("a", 100.0), element("b", 50.0)];
        assert_eq!(aggregate_elements(&elements), (2, 150.0));
    }

    #[tokio::test]
    async fn test_recompute_upserts_single_summary() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_cost_elements(&[element("a", 100.0), element("b", 25.0)])
            .await
            .unwrap();

        let summary = recompute_summary(&store, "p1").await.unwrap();
        assert_eq!(summary.element_count, 2);
        assert_eq!(summary.total_from_elements, 125.0);
        assert_eq!(summary.total_from_cost_data, 0.0);

        let again = recompute_summary(&store, "p1").await.unwrap();
        assert_eq!(again, summary);
        assert_eq!(store.get_summary("p1").await.unwrap(), Some(summary));
    }

    #[tokio::test]
    async fn test_empty_project_summary() {
        let store = SqliteStore::in_memory().unwrap();
        let summary = recompute_summary(&store, "nothing").await.unwrap();
        assert_eq!(summary.element_count, 0);
        assert_eq!(summary.currency, "CHF");
    }
}
