//! CLI output and input helpers
//!
//! Table rendering for reconciliation results, summaries and export audits,
//! plus loading of JSON input files.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table};
use costsync_core::audit::{format_chf, AuditReport};
use costsync_core::ebkp::normalize;
use costsync_core::models::ProjectCostSummary;
use costsync_types::{flatten_leaves, EbkpCodeInfo, ReconciliationResult, SpreadsheetItem};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::Path;

// ============================================================================
// Input
// ============================================================================

/// Read and parse a JSON file
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Leaves whose normalized code appears among the BIM codes
pub fn matched_leaves(items: &[SpreadsheetItem], codes: &[EbkpCodeInfo]) -> Vec<SpreadsheetItem> {
    let known: HashSet<&str> = codes.iter().map(|c| c.code.as_str()).collect();
    flatten_leaves(items)
        .into_iter()
        .filter(|leaf| {
            leaf.code()
                .map(|code| known.contains(normalize(code).as_str()))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

// ============================================================================
// Output
// ============================================================================

fn table(no_color: bool, header: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    if no_color {
        table.set_header(header.to_vec());
    } else {
        table.set_header(
            header
                .iter()
                .map(|h| Cell::new(h).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    }
    table
}

/// Reconciliation counters as table (human) or JSON
pub fn format_reconciliation(result: &ReconciliationResult, json: bool, no_color: bool) -> String {
    if json {
        return serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string());
    }
    if !result.has_project() {
        return "Project not found, nothing to reconcile.".to_string();
    }

    let mut table = table(no_color, &["Counter", "Value"]);
    let rows: [(&str, String); 11] = [
        ("Project", result.project_id.clone().unwrap_or_default()),
        ("Deleted cost elements", result.deleted_cost_elements.to_string()),
        ("BIM elements processed", result.processed_bim_elements.to_string()),
        ("BIM elements skipped", result.skipped_bim_elements.to_string()),
        ("BIM elements pending", result.pending_bim_elements.to_string()),
        ("Spreadsheet-only items", result.processed_excel_only_items.to_string()),
        ("Missing cost data", result.missing_cost_data.to_string()),
        ("Inserted cost elements", result.inserted_cost_elements.to_string()),
        ("Failed inserts", result.failed_inserts.to_string()),
        ("Delivered", result.delivered_count.to_string()),
        (
            "Fallback metadata",
            if result.fallback_metadata_used { "yes" } else { "no" }.to_string(),
        ),
    ];
    for (label, value) in rows {
        table.add_row(vec![label.to_string(), value]);
    }
    table.to_string()
}

/// Project summary as key/value lines or JSON
pub fn format_summary(summary: &ProjectCostSummary, json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string());
    }

    let mut lines = vec![];
    lines.push(format!("Project:            {}", summary.project_id));
    lines.push(format!("Cost elements:      {}", summary.element_count));
    lines.push(format!("Unit cost entries:  {}", summary.cost_data_count));
    lines.push(format!(
        "Total (elements):   {}",
        format_chf(summary.total_from_elements)
    ));
    lines.push(format!(
        "Total (cost data):  {}",
        format_chf(summary.total_from_cost_data)
    ));
    lines.join("\n")
}

/// Export audit as report sections or JSON
pub fn format_audit(report: &AuditReport, json: bool, no_color: bool) -> String {
    if json {
        return serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string());
    }

    let mut out = vec![];
    out.push(format!("Files processed: {}", report.files.len()));
    for file in &report.files {
        out.push(format!("  - {} ({} cost items)", file.file, file.rows));
    }
    out.push(format!("Total cost items: {}", report.total_rows));
    out.push(String::new());

    out.push("=== ID UNIQUENESS CHECK ===".to_string());
    if report.has_duplicates() {
        out.push(format!(
            "Found duplicate IDs: {} of {} unique IDs repeat",
            report.duplicate_count, report.unique_ids
        ));
        for dup in &report.duplicate_examples {
            out.push(format!("  - ID '{}' appears {} times", dup.id, dup.occurrences));
        }
        let hidden = report.duplicate_count - report.duplicate_examples.len();
        if hidden > 0 {
            out.push(format!("  ... and {} more", hidden));
        }
    } else {
        out.push(format!("All {} IDs are unique", report.unique_ids));
    }
    out.push(String::new());

    out.push("=== GRAND TOTAL COST ===".to_string());
    out.push(format!("Total Cost: {}", format_chf(report.grand_total)));
    out.push(String::new());

    out.push("=== BREAKDOWN BY COST UNIT ===".to_string());
    let mut units = table(no_color, &["Cost unit", "Items", "Total"]);
    for unit in &report.by_cost_unit {
        units.add_row(vec![
            unit.unit.clone(),
            unit.items.to_string(),
            format_chf(unit.total_cost),
        ]);
    }
    out.push(units.to_string());

    if !report.issues.is_empty() {
        out.push(String::new());
        out.push("Warnings:".to_string());
        for issue in &report.issues {
            out.push(format!("  - {}: {}", issue.source, issue.message));
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(code: &str, cost: f64) -> SpreadsheetItem {
        SpreadsheetItem {
            code: Some(code.to_string()),
            cost: Some(cost),
            ..Default::default()
        }
    }

    #[test]
    fn test_matched_leaves_uses_normalized_codes() {
        let items = vec![SpreadsheetItem {
            code: Some("C".into()),
            children: vec![item("C01.01", 500.0), item("C4.2", 300.0)],
            ..Default::default()
        }];
        let codes = vec![EbkpCodeInfo {
            code: "C1.1".into(),
            element_count: 1,
        }];

        let matched = matched_leaves(&items, &codes);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].code.as_deref(), Some("C01.01"));
    }

    #[test]
    fn test_format_unknown_project() {
        let text = format_reconciliation(&ReconciliationResult::default(), false, true);
        assert!(text.contains("not found"));
    }

    #[test]
    fn test_format_reconciliation_json() {
        let result = ReconciliationResult {
            project_id: Some("prj-tower-a".into()),
            processed_bim_elements: 1,
            ..Default::default()
        };
        let text = format_reconciliation(&result, true, true);
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["processedBimElements"], 1);
    }

    #[test]
    fn test_format_summary_groups_thousands() {
        let summary = ProjectCostSummary {
            project_id: "prj-tower-a".into(),
            element_count: 2,
            total_from_elements: 12500.0,
            ..Default::default()
        };
        assert!(format_summary(&summary, false).contains("CHF 12'500.00"));
    }

    #[test]
    fn test_load_json_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(&path, "[").unwrap();
        let err = load_json::<Vec<SpreadsheetItem>>(&path).unwrap_err();
        assert!(err.to_string().contains("items.json"));
    }
}
