//! Decision policies
//!
//! - [`selection`]: ranking, threshold check and the existing-result
//!   short-circuit
//! - [`upgrade`]: whether a new candidate may replace a stored result
//!
//! Both are pure functions over scored candidates and configuration; the
//! orchestrator sequences them.

pub mod selection;
pub mod upgrade;

pub use selection::{
    evaluate_selection, existing_is_sufficient, rank_candidates, select_best, SearchMode,
    SelectionVerdict,
};
pub use upgrade::{evaluate_upgrade, UpgradeVerdict};
