//! EBKP classification codes: normalization and matching

pub mod matcher;
pub mod normalize;

pub use matcher::{find_best_match, major_segment, simplify, BestMatch, CostInfo, KnownCostCodes};
pub use normalize::{normalize, normalize_opt};
