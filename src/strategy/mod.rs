//! Rebalancing strategy.
//!
//! Contains the core logic for:
//! - Allocation math over the target wallet (ratios, z-scores)
//! - Order sizing, lot profitability, and sell-candidate selection
//! - The quote and asset operations and the per-cycle driver
//! - Daily earnings snapshots

pub mod allocation;
pub mod asset_op;
pub mod data;
pub mod driver;
pub mod earnings;
pub mod quote_op;
pub mod sizing;

pub use allocation::{compute_allocation, normalize_weights, AllocationView};
pub use data::{AssetState, StrategyData, SymbolFilters, TargetWallet};
pub use driver::{run_cycle, CycleOutcome};
pub use earnings::run_earnings_snapshot;

/// Errors from the allocation math.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// The configured target wallet cannot be normalized.
    #[error("target wallet weights must be positive with a nonzero sum")]
    InvalidTargetWallet,
}
