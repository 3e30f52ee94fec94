//! Audit of exported broker messages
//!
//! Loads every exported message file in a directory whose name contains a
//! pattern, then checks ID uniqueness and totals the delivered costs.

use crate::error::{CoreError, CoreResult, Issue};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Duplicate IDs listed by name in a report
pub const MAX_DUPLICATE_EXAMPLES: usize = 5;

const UNKNOWN_UNIT: &str = "UNKNOWN";

/// Rows found in one export file
#[derive(Debug, Clone, Serialize)]
pub struct FileRows {
    pub file: String,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateId {
    pub id: String,
    pub occurrences: usize,
}

/// Cost and item count of one `cost_unit` value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitBreakdown {
    pub unit: String,
    pub items: usize,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub files: Vec<FileRows>,
    pub total_rows: usize,
    pub unique_ids: usize,
    /// Number of IDs seen more than once
    pub duplicate_count: usize,
    pub duplicate_examples: Vec<DuplicateId>,
    pub grand_total: f64,
    pub by_cost_unit: Vec<UnitBreakdown>,
    pub issues: Vec<Issue>,
}

impl AuditReport {
    pub fn has_duplicates(&self) -> bool {
        self.duplicate_count > 0
    }
}

/// Audit the matching export files of `dir`.
///
/// Unreadable or empty files become issues. The call fails only when the
/// directory is missing or nothing matches the pattern.
pub fn audit_exports(dir: &Path, pattern: &str) -> CoreResult<AuditReport> {
    if !dir.is_dir() {
        return Err(CoreError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let files = matching_files(dir, pattern);
    if files.is_empty() {
        return Err(CoreError::invalid_input(format!(
            "no files matching '{}' in {}",
            pattern,
            dir.display()
        )));
    }

    let mut report = AuditReport::default();
    let mut rows = Vec::new();
    for path in &files {
        let name = file_name(path);
        let file_rows = read_rows(path, &name, &mut report.issues);
        debug!(file = %name, rows = file_rows.len(), "Export file read");
        report.files.push(FileRows {
            file: name,
            rows: file_rows.len(),
        });
        rows.extend(file_rows);
    }

    report.total_rows = rows.len();
    check_ids(&rows, &mut report);
    total_costs(&rows, &mut report);
    Ok(report)
}

fn matching_files(dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let needle = pattern.to_lowercase();
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .to_lowercase()
                .contains(&needle)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort_by_key(|path| file_name(path));
    files
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `data` rows of an export envelope (`"Value"` holding the message as a
/// string) or of a bare message
fn read_rows(path: &Path, name: &str, issues: &mut Vec<Issue>) -> Vec<Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(file = name, error = %e, "Export file unreadable");
            issues.push(Issue::error(name, format!("Failed to read file: {}", e)));
            return Vec::new();
        }
    };
    let outer: Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            issues.push(Issue::error(name, format!("Invalid JSON: {}", e)));
            return Vec::new();
        }
    };

    let message = match outer.get("Value") {
        Some(Value::String(inner)) => match serde_json::from_str::<Value>(inner) {
            Ok(message) => message,
            Err(e) => {
                issues.push(Issue::error(name, format!("Invalid JSON in Value field: {}", e)));
                return Vec::new();
            }
        },
        _ => {
            issues.push(
                Issue::warning(name, "No Value envelope, reading as a bare message")
                    .with_suggestion("Export the topic with message envelopes"),
            );
            outer
        }
    };

    let rows = match message.get("data") {
        Some(Value::Array(rows)) => rows.clone(),
        _ => Vec::new(),
    };
    if rows.is_empty() {
        issues.push(Issue::warning(name, "No data rows found"));
    }
    rows
}

fn check_ids(rows: &[Value], report: &mut AuditReport) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();
    for id in rows
        .iter()
        .filter_map(|row| row.get("id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
    {
        let count = counts.entry(id).or_default();
        if *count == 0 {
            first_seen.push(id);
        }
        *count += 1;
    }

    report.unique_ids = counts.len();
    let duplicates: Vec<DuplicateId> = first_seen
        .into_iter()
        .filter(|id| counts[id] > 1)
        .map(|id| DuplicateId {
            id: id.to_string(),
            occurrences: counts[id],
        })
        .collect();
    report.duplicate_count = duplicates.len();
    report.duplicate_examples = duplicates
        .into_iter()
        .take(MAX_DUPLICATE_EXAMPLES)
        .collect();
}

fn total_costs(rows: &[Value], report: &mut AuditReport) {
    let mut units: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for row in rows {
        let cost = row.get("cost").and_then(Value::as_f64).unwrap_or(0.0);
        report.grand_total += cost;

        let unit = match row.get("cost_unit") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => UNKNOWN_UNIT.to_string(),
            Some(other) => other.to_string(),
        };
        let slot = units.entry(unit).or_default();
        slot.0 += 1;
        slot.1 += cost;
    }

    let mut breakdown: Vec<UnitBreakdown> = units
        .into_iter()
        .map(|(unit, (items, total_cost))| UnitBreakdown {
            unit,
            items,
            total_cost,
        })
        .collect();
    breakdown.sort_by(|a, b| compare_units(&a.unit, &b.unit));
    report.by_cost_unit = breakdown;
}

/// Numeric units ascending, everything else after them
fn compare_units(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>().ok(), b.parse::<f64>().ok()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// `CHF 1'234'567.89`
pub fn format_chf(amount: f64) -> String {
    let formatted = format!("{:.2}", amount.abs());
    let (whole, fraction) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push('\'');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && formatted != "0.00" { "-" } else { "" };
    format!("CHF {}{}.{}", sign, grouped, fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorSeverity;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn envelope(rows: Value) -> String {
        let message = json!({ "project": "Tower A", "data": rows });
        json!({ "Key": "f-1", "Value": message.to_string() }).to_string()
    }

    #[test]
    fn test_audit_envelopes_and_bare_messages() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("topic-message"),
            envelope(json!([
                { "id": "a", "cost": 500.0, "cost_unit": 50.0 },
                { "id": "b", "cost": 1200.0, "cost_unit": 120.0 }
            ])),
        )
        .unwrap();
        fs::write(
            dir.path().join("Topic-Message(1)"),
            json!({ "data": [{ "id": "a", "cost": 300.0, "cost_unit": 50.0 }] }).to_string(),
        )
        .unwrap();
        fs::write(dir.path().join("unrelated.json"), "{}").unwrap();

        let report = audit_exports(dir.path(), "topic-message").unwrap();

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.unique_ids, 2);
        assert_eq!(report.duplicate_count, 1);
        assert_eq!(
            report.duplicate_examples,
            vec![DuplicateId {
                id: "a".into(),
                occurrences: 2
            }]
        );
        assert!((report.grand_total - 2000.0).abs() < 1e-9);

        let units: Vec<&str> = report.by_cost_unit.iter().map(|u| u.unit.as_str()).collect();
        assert_eq!(units, vec!["50.0", "120.0"]);
        assert_eq!(report.by_cost_unit[0].items, 2);

        // The bare message is read with a warning
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == ErrorSeverity::Warning));
    }

    #[test]
    fn test_broken_file_does_not_abort() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("export-1"), "not json").unwrap();
        fs::write(
            dir.path().join("export-2"),
            envelope(json!([{ "id": "x", "cost": 10.0 }])),
        )
        .unwrap();

        let report = audit_exports(dir.path(), "EXPORT").unwrap();
        assert_eq!(report.total_rows, 1);
        assert_eq!(report.files[0].rows, 0);
        assert_eq!(report.by_cost_unit[0].unit, UNKNOWN_UNIT);
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == ErrorSeverity::Error));
    }

    #[test]
    fn test_no_match_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(audit_exports(dir.path(), "topic").is_err());
        assert!(audit_exports(&dir.path().join("missing"), "topic").is_err());
    }

    #[test]
    fn test_unit_ordering() {
        let mut units = vec!["UNKNOWN", "120", "abc", "7.5"];
        units.sort_by(|a, b| compare_units(a, b));
        assert_eq!(units, vec!["7.5", "120", "UNKNOWN", "abc"]);
    }

    #[test]
    fn test_format_chf() {
        assert_eq!(format_chf(0.0), "CHF 0.00");
        assert_eq!(format_chf(999.5), "CHF 999.50");
        assert_eq!(format_chf(1234567.891), "CHF 1'234'567.89");
        assert_eq!(format_chf(-1500.0), "CHF -1'500.00");
    }
}
