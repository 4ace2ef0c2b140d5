//! Target/candidate comparison, window policy and discrepancy search.

pub mod engine;
pub mod search;
pub mod window;

pub use engine::{
    compare, totals, AdjustmentPolicy, MatchEngine, MatchResult, Resolution, ResolutionKind,
};
pub use search::{BoundaryProximitySearch, DiscrepancySearch};
pub use window::ReconciliationWindow;
