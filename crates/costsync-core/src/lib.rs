//! costsync-core - Core library for costsync
//!
//! Provides the eBKP normalizer and matcher, the document store, the
//! reconciliation pipeline, broker delivery and the service facade.

pub mod audit;
pub mod cache;
pub mod config;
pub mod delivery;
pub mod ebkp;
pub mod error;
pub mod event;
pub mod models;
pub mod reconcile;
pub mod service;
pub mod store;
pub mod summary;

pub use audit::{audit_exports, format_chf, AuditReport};
pub use cache::MatchCache;
pub use config::ServiceConfig;
pub use delivery::{CostDelivery, DeliveryGateway, DeliveryMetadata, DeliveryOutcome};
pub use ebkp::{find_best_match, normalize, KnownCostCodes};
pub use error::{CoreError, CoreResult, DegradedState, ErrorSeverity, Issue};
pub use event::{DataEvent, EventBus, ProjectUpdate};
pub use reconcile::{reconcile, ReconcileInput, RunLocks};
pub use service::{CostService, MatchReport, ServiceStatus};
pub use store::{DocumentStore, SharedStore, SqliteStore};
pub use summary::recompute_summary;
