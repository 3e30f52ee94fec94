//! costsync-types - Shared wire types for costsync
//!
//! This crate contains pure data structures without heavy dependencies.
//! No tokio, no async runtime - just serde-serializable types.
//!
//! Used by:
//! - costsync-core (reconciliation engine, broker payloads)
//! - costsync-web (push channel frames)
//! - costsync (CLI output)

pub mod frames;
pub mod matching;
pub mod message;
pub mod reports;
pub mod spreadsheet;

// Re-export broker payload types
pub use message::{CostItem, CostMessage};

// Re-export push channel types
pub use frames::{
    ClientRequest, CodeMatchingRequest, CostBatchRequest, ExcelDataRequest, FrameHeader,
    FrameParseError, InboundFrame, ProducerState, ProjectScope, Reply, ResponseStatus,
    ServerMessage, UnitCostInput,
};

// Re-export domain report types
pub use matching::{CodeMatch, EbkpCodeInfo, MatchMethod};
pub use reports::{DeleteProjectReport, ExcelImportResult, ReconciliationResult};
pub use spreadsheet::{flatten_leaves, SpreadsheetItem};
