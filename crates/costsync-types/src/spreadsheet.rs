//! Spreadsheet cost rows as submitted by the front end
//!
//! Rows form a tree (group rows with children). Only leaves carry trusted
//! direct cost figures. German column names from the cost-engineer template
//! are accepted as aliases.

use serde::{Deserialize, Serialize};

/// One row of the imported cost spreadsheet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetItem {
    #[serde(default)]
    pub id: Option<String>,

    /// Classification code (EBKP)
    #[serde(default, alias = "ebkp", alias = "ebkph")]
    pub code: Option<String>,

    #[serde(default, alias = "bezeichnung")]
    pub description: Option<String>,

    #[serde(default, alias = "menge")]
    pub quantity: Option<f64>,

    #[serde(default, alias = "einheit")]
    pub unit: Option<String>,

    /// Unit price ("Kennwert")
    #[serde(default, alias = "kennwert")]
    pub unit_price: Option<f64>,

    /// Direct cost of the row
    #[serde(default, alias = "chf")]
    pub cost: Option<f64>,

    /// Total cost, used when no direct cost is present
    #[serde(default, alias = "totalChf")]
    pub total_cost: Option<f64>,

    #[serde(default)]
    pub children: Vec<SpreadsheetItem>,
}

impl SpreadsheetItem {
    /// A row with no child rows
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Code, with blank strings treated as absent
    pub fn code(&self) -> Option<&str> {
        self.code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }

    /// Direct cost, falling back to the total-cost column when it is empty or zero
    pub fn cost_value(&self) -> f64 {
        self.cost
            .filter(|cost| *cost > 0.0)
            .or(self.total_cost)
            .unwrap_or(0.0)
    }

    /// Unit price of the row.
    ///
    /// Falls back to `cost / quantity` when the Kennwert column is empty, or to
    /// the cost itself when no positive quantity exists.
    pub fn effective_unit_price(&self) -> f64 {
        match self.unit_price {
            Some(price) if price > 0.0 => price,
            _ => {
                let quantity = self.quantity.unwrap_or(0.0);
                if quantity > 0.0 {
                    self.cost_value() / quantity
                } else {
                    self.cost_value()
                }
            }
        }
    }
}

/// Collect childless rows in document (pre-order) order
pub fn flatten_leaves(items: &[SpreadsheetItem]) -> Vec<&SpreadsheetItem> {
    let mut leaves = Vec::new();
    for item in items {
        collect_leaves(item, &mut leaves);
    }
    leaves
}

fn collect_leaves<'a>(item: &'a SpreadsheetItem, out: &mut Vec<&'a SpreadsheetItem>) {
    if item.is_leaf() {
        out.push(item);
        return;
    }
    for child in &item.children {
        collect_leaves(child, out);
    }
}
