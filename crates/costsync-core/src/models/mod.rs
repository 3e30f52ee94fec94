//! Data models for costsync

pub mod cost;
pub mod element;
pub mod project;
pub mod summary;

pub use cost::{
    CostElement, CostSource, KennwerteRecord, Provenance, UnitCostEntry, DEFAULT_CURRENCY,
};
pub use element::{BimElement, ClassificationRef, ElementProperties, ElementStatus, QuantityValue};
pub use project::{Project, ProjectMetadata};
pub use summary::ProjectCostSummary;
