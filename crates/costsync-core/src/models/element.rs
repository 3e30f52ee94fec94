//! BIM / quantity take-off elements
//!
//! Elements are owned by the upstream take-off subsystem. The engine only
//! reads them; unknown fields are kept in `extra` so they survive a round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of a BIM element
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ElementStatus {
    #[default]
    Active,
    Pending,
    Other(String),
}

impl From<String> for ElementStatus {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "active" => ElementStatus::Active,
            "pending" => ElementStatus::Pending,
            _ => ElementStatus::Other(value),
        }
    }
}

impl From<ElementStatus> for String {
    fn from(status: ElementStatus) -> Self {
        match status {
            ElementStatus::Active => "active".to_string(),
            ElementStatus::Pending => "pending".to_string(),
            ElementStatus::Other(value) => value,
        }
    }
}

/// A quantity that is either a bare number or a typed `{type, value}` object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuantityValue {
    Scalar(f64),
    Typed {
        #[serde(rename = "type", default)]
        kind: String,
        #[serde(default)]
        value: Option<f64>,
    },
}

impl QuantityValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            QuantityValue::Scalar(value) => Some(*value),
            QuantityValue::Typed { value, .. } => *value,
        }
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        matches!(self, QuantityValue::Typed { kind: k, .. } if k.eq_ignore_ascii_case(kind))
    }
}

/// Classification reference (`{id, name, system}`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementProperties {
    #[serde(default)]
    pub classification: Option<ClassificationRef>,
    #[serde(default)]
    pub ebkp_code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Quantity take-off element of a project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BimElement {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub status: ElementStatus,
    #[serde(default)]
    pub global_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ifc_class: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub properties: ElementProperties,
    #[serde(default)]
    pub classification: Option<ClassificationRef>,
    #[serde(default)]
    pub ebkp_code: Option<String>,
    #[serde(default)]
    pub quantity: Option<QuantityValue>,
    #[serde(default)]
    pub area: Option<QuantityValue>,
    #[serde(default)]
    pub volume: Option<QuantityValue>,
    #[serde(default)]
    pub length: Option<QuantityValue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl BimElement {
    pub fn is_active(&self) -> bool {
        self.status == ElementStatus::Active
    }

    pub fn is_pending(&self) -> bool {
        self.status == ElementStatus::Pending
    }

    /// Raw classification code, looked up in order:
    /// nested classification id, nested `ebkp_code`, element classification id,
    /// element `ebkp_code`.
    pub fn classification_code(&self) -> Option<&str> {
        let nested_id = self
            .properties
            .classification
            .as_ref()
            .and_then(|c| c.id.as_deref());
        let element_id = self.classification.as_ref().and_then(|c| c.id.as_deref());

        non_blank(nested_id)
            .or_else(|| non_blank(self.properties.ebkp_code.as_deref()))
            .or_else(|| non_blank(element_id))
            .or_else(|| non_blank(self.ebkp_code.as_deref()))
    }

    /// Quantity used for costing; `0.0` when nothing usable is present.
    ///
    /// Order: typed "Area" quantity, `area`, `quantity`, `volume`, `length`.
    /// Zero and non-finite values fall through to the next candidate.
    pub fn effective_quantity(&self) -> f64 {
        let typed_area = self
            .quantity
            .as_ref()
            .filter(|q| q.is_kind("area"))
            .and_then(QuantityValue::as_f64);

        [
            typed_area,
            self.area.as_ref().and_then(QuantityValue::as_f64),
            self.quantity.as_ref().and_then(QuantityValue::as_f64),
            self.volume.as_ref().and_then(QuantityValue::as_f64),
            self.length.as_ref().and_then(QuantityValue::as_f64),
        ]
        .into_iter()
        .flatten()
        .find(|value| value.is_finite() && *value != 0.0)
        .unwrap_or(0.0)
    }

    /// Stable identifier used downstream: global id, else internal id
    pub fn external_id(&self) -> &str {
        non_blank(self.global_id.as_deref()).unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn element(value: Value) -> BimElement {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_status_parsing() {
        let el = element(json!({"id": "e1", "project_id": "p1", "status": "Pending"}));
        assert!(el.is_pending());

        let el = element(json!({"id": "e1", "project_id": "p1", "status": "archived"}));
        assert_eq!(el.status, ElementStatus::Other("archived".into()));

        let el = element(json!({"id": "e1", "project_id": "p1"}));
        assert!(el.is_active());
    }

    #[test]
    fn test_classification_fallback_order() {
        let el = element(json!({
            "id": "e1", "project_id": "p1",
            "properties": {"classification": {"id": "C1.1"}, "ebkp_code": "C9"},
            "ebkp_code": "E1"
        }));
        assert_eq!(el.classification_code(), Some("C1.1"));

        let el = element(json!({
            "id": "e1", "project_id": "p1",
            "properties": {"classification": {"id": "  "}, "ebkp_code": "C9"}
        }));
        assert_eq!(el.classification_code(), Some("C9"));

        let el = element(json!({
            "id": "e1", "project_id": "p1",
            "classification": {"id": "G2"}, "ebkp_code": "E1"
        }));
        assert_eq!(el.classification_code(), Some("G2"));

        let el = element(json!({"id": "e1", "project_id": "p1", "ebkp_code": "E1"}));
        assert_eq!(el.classification_code(), Some("E1"));

        let el = element(json!({"id": "e1", "project_id": "p1"}));
        assert_eq!(el.classification_code(), None);
    }

    #[test]
    fn test_quantity_prefers_typed_area() {
        let el = element(json!({
            "id": "e1", "project_id": "p1",
            "quantity": {"type": "Area", "value": 12.5},
            "area": 99.0
        }));
        assert_eq!(el.effective_quantity(), 12.5);
    }

    #[test]
    fn test_quantity_fallback_chain() {
        let el = element(json!({
            "id": "e1", "project_id": "p1",
            "quantity": {"type": "Length", "value": 4.0},
            "area": 10.0
        }));
        assert_eq!(el.effective_quantity(), 10.0);

        let el = element(json!({
            "id": "e1", "project_id": "p1",
            "quantity": {"type": "Length", "value": 4.0}
        }));
        assert_eq!(el.effective_quantity(), 4.0);

        let el = element(json!({"id": "e1", "project_id": "p1", "area": 0.0, "volume": 3.0}));
        assert_eq!(el.effective_quantity(), 3.0);

        let el = element(json!({"id": "e1", "project_id": "p1", "length": 7.0}));
        assert_eq!(el.effective_quantity(), 7.0);

        let el = element(json!({"id": "e1", "project_id": "p1"}));
        assert_eq!(el.effective_quantity(), 0.0);
    }

    #[test]
    fn test_external_id_prefers_global_id() {
        let el = element(json!({"id": "e1", "project_id": "p1", "global_id": "3xYz"}));
        assert_eq!(el.external_id(), "3xYz");

        let el = element(json!({"id": "e1", "project_id": "p1", "global_id": ""}));
        assert_eq!(el.external_id(), "e1");
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let el = element(json!({"id": "e1", "project_id": "p1", "material": "concrete"}));
        assert_eq!(el.extra["material"], "concrete");

        let back = serde_json::to_value(&el).unwrap();
        assert_eq!(back["material"], "concrete");
        assert_eq!(back["status"], "active");
    }
}
