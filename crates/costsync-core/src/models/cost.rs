//! Cost-side documents: unit costs, derived cost elements, Kennwerte tables

use super::element::BimElement;
use costsync_types::{CostItem, SpreadsheetItem};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const DEFAULT_CURRENCY: &str = "CHF";

/// Where a unit-cost entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CostSource {
    /// Durable Kennwerte table
    Kennwerte,
    /// Matched spreadsheet row sent with a batch save
    ExcelImport,
    /// Spreadsheet leaf without BIM coverage
    ExcelImportLeaf,
}

/// (project, classification code) → unit price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCostEntry {
    /// `"{project_id}:{normalized_code}"`
    pub id: String,
    pub project_id: String,
    /// Code as entered
    pub code: String,
    pub normalized_code: String,
    pub unit_price: f64,
    #[serde(default)]
    pub quantity: Option<f64>,
    /// Row total (informational)
    #[serde(default)]
    pub total_cost: f64,
    pub currency: String,
    pub source: CostSource,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl UnitCostEntry {
    pub fn id_for(project_id: &str, normalized_code: &str) -> String {
        format!("{}:{}", project_id, normalized_code)
    }

    /// Entry built from a spreadsheet row
    pub fn from_spreadsheet(
        project_id: &str,
        normalized_code: &str,
        item: &SpreadsheetItem,
        source: CostSource,
        currency: &str,
    ) -> Self {
        Self {
            id: Self::id_for(project_id, normalized_code),
            project_id: project_id.to_string(),
            code: item.code().unwrap_or(normalized_code).to_string(),
            normalized_code: normalized_code.to_string(),
            unit_price: item.effective_unit_price(),
            quantity: item.quantity,
            total_cost: item.cost_value(),
            currency: currency.to_string(),
            source,
            description: item.description.clone(),
            unit: item.unit.clone(),
        }
    }

    /// Usable for matching and costing
    pub fn has_cost(&self) -> bool {
        self.unit_price > 0.0
    }
}

/// Origin of a cost element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    #[serde(rename = "qto+costdata")]
    QtoCostData,
    #[serde(rename = "excel-import-leaf")]
    ExcelImportLeaf,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::QtoCostData => "qto+costdata",
            Provenance::ExcelImportLeaf => "excel-import-leaf",
        }
    }
}

/// Authoritative join of one quantity source with one unit price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostElement {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub qto_element_id: Option<String>,
    #[serde(default)]
    pub unit_cost_id: Option<String>,
    #[serde(default)]
    pub global_id: Option<String>,
    pub ebkp_code: String,
    pub normalized_code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ifc_class: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    pub quantity: f64,
    pub unit_cost: f64,
    pub total_cost: f64,
    pub currency: String,
    pub provenance: Provenance,
    /// Unknown BIM fields carried forward
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl CostElement {
    pub fn bim_id(project_id: &str, element_id: &str) -> String {
        format!("{}:qto:{}", project_id, element_id)
    }

    pub fn leaf_id(project_id: &str, leaf_index: usize) -> String {
        format!("{}:leaf:{}", project_id, leaf_index)
    }

    /// Cost element for a costed BIM element
    pub fn from_bim(element: &BimElement, entry: &UnitCostEntry, quantity: f64) -> Self {
        Self {
            id: Self::bim_id(&entry.project_id, &element.id),
            project_id: entry.project_id.clone(),
            qto_element_id: Some(element.id.clone()),
            unit_cost_id: Some(entry.id.clone()),
            global_id: element.global_id.clone(),
            ebkp_code: element
                .classification_code()
                .unwrap_or(&entry.code)
                .to_string(),
            normalized_code: entry.normalized_code.clone(),
            name: element.name.clone(),
            ifc_class: element.ifc_class.clone(),
            level: element.level.clone(),
            quantity,
            unit_cost: entry.unit_price,
            total_cost: entry.unit_price * quantity,
            currency: entry.currency.clone(),
            provenance: Provenance::QtoCostData,
            extra: element.extra.clone(),
        }
    }

    /// Cost element for a spreadsheet leaf with no BIM coverage
    pub fn from_leaf(leaf_index: usize, leaf: &SpreadsheetItem, entry: &UnitCostEntry) -> Self {
        Self {
            id: Self::leaf_id(&entry.project_id, leaf_index),
            project_id: entry.project_id.clone(),
            qto_element_id: None,
            unit_cost_id: Some(entry.id.clone()),
            global_id: None,
            ebkp_code: leaf.code().unwrap_or(&entry.code).to_string(),
            normalized_code: entry.normalized_code.clone(),
            name: leaf.description.clone(),
            ifc_class: None,
            level: None,
            quantity: leaf.quantity.unwrap_or(0.0),
            unit_cost: entry.unit_price,
            total_cost: leaf.cost_value(),
            currency: entry.currency.clone(),
            provenance: Provenance::ExcelImportLeaf,
            extra: Map::new(),
        }
    }

    /// Broker payload row for this element under the given delivery id
    pub fn to_cost_item(&self, delivery_id: &str) -> CostItem {
        CostItem::new(delivery_id, self.total_cost, self.unit_cost)
    }
}

/// Durable unit-cost table of a project, written on spreadsheet upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KennwerteRecord {
    pub project_id: String,
    /// Normalized code → unit price
    pub kennwerte: BTreeMap<String, f64>,
    pub currency: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::element::QuantityValue;

    fn entry(price: f64) -> UnitCostEntry {
        UnitCostEntry {
            id: UnitCostEntry::id_for("p1", "C1.1"),
            project_id: "p1".into(),
            code: "C01.01".into(),
            normalized_code: "C1.1".into(),
            unit_price: price,
            quantity: None,
            total_cost: 0.0,
            currency: DEFAULT_CURRENCY.into(),
            source: CostSource::Kennwerte,
            description: None,
            unit: None,
        }
    }

    #[test]
    fn test_from_bim_copies_named_fields() {
        let mut element = BimElement {
            id: "e1".into(),
            project_id: "p1".into(),
            global_id: Some("3xYz".into()),
            ebkp_code: Some("C01.01".into()),
            area: Some(QuantityValue::Scalar(10.0)),
            ..Default::default()
        };
        element
            .extra
            .insert("material".into(), Value::String("concrete".into()));

        let cost = CostElement::from_bim(&element, &entry(50.0), 10.0);
        assert_eq!(cost.id, "p1:qto:e1");
        assert_eq!(cost.total_cost, 500.0);
        assert_eq!(cost.ebkp_code, "C01.01");
        assert_eq!(cost.provenance, Provenance::QtoCostData);
        assert_eq!(cost.extra["material"], "concrete");
        assert_eq!(cost.to_cost_item("3xYz").cost_unit, 50.0);
    }

    #[test]
    fn test_provenance_wire_names() {
        assert_eq!(
            serde_json::to_string(&Provenance::QtoCostData).unwrap(),
            r#""qto+costdata""#
        );
        assert_eq!(
            serde_json::to_string(&CostSource::ExcelImportLeaf).unwrap(),
            r#""excel-import-leaf""#
        );
    }

    #[test]
    fn test_leaf_entry_from_spreadsheet() {
        let leaf = SpreadsheetItem {
            code: Some("C4.2".into()),
            cost: Some(300.0),
            ..Default::default()
        };
        let entry = UnitCostEntry::from_spreadsheet(
            "p1",
            "C4.2",
            &leaf,
            CostSource::ExcelImportLeaf,
            DEFAULT_CURRENCY,
        );
        assert_eq!(entry.id, "p1:C4.2");
        assert_eq!(entry.unit_price, 300.0);
        assert!(entry.has_cost());

        let element = CostElement::from_leaf(3, &leaf, &entry);
        assert_eq!(element.id, "p1:leaf:3");
        assert_eq!(element.total_cost, 300.0);
        assert_eq!(element.provenance, Provenance::ExcelImportLeaf);
    }
}
