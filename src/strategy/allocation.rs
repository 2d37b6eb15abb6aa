//! Allocation math: normalized target weights, deviation ratios, z-scores.
//!
//! Pure functions over a `StrategyData` snapshot. Money stays in `Decimal`;
//! the dimensionless ratio/z-score statistics are computed in `f64` since they
//! only order and threshold candidates.

use crate::strategy::data::{StrategyData, TargetWallet};
use crate::strategy::StrategyError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Derived allocation state for one strategy run.
#[derive(Debug, Clone)]
pub struct AllocationView {
    /// Current proportion of tracked wallet value per asset (0 when the
    /// tracked total is 0).
    pub current: BTreeMap<String, f64>,
    /// Deviation ratio per asset: `(current - target) / target`.
    pub ratio: BTreeMap<String, f64>,
    /// Z-score of each ratio across tracked assets (all 0 when the standard
    /// deviation is 0).
    pub z_score: BTreeMap<String, f64>,
    /// Asset with the maximum ratio; ties resolve to the first occurrence in
    /// target-wallet iteration order.
    pub highest: String,
    /// Asset with the minimum ratio; same tie-break.
    pub lowest: String,
    /// Tracked assets ordered by ratio ascending (stable).
    pub sorted_ascending: Vec<String>,
}

/// Divide every weight by the sum of all weights.
///
/// Fails if any weight is non-positive or the sum is zero, so downstream
/// ratio math never divides by zero.
pub fn normalize_weights(
    target: &TargetWallet,
) -> Result<BTreeMap<String, Decimal>, StrategyError> {
    if target.is_empty() || target.values().any(|w| *w <= Decimal::ZERO) {
        return Err(StrategyError::InvalidTargetWallet);
    }

    let sum: Decimal = target.values().sum();
    if sum <= Decimal::ZERO {
        return Err(StrategyError::InvalidTargetWallet);
    }

    Ok(target
        .iter()
        .map(|(asset, weight)| (asset.clone(), weight / sum))
        .collect())
}

/// Compute the allocation view for the tracked assets.
///
/// Assets missing from the snapshot contribute a total value of 0, mirroring
/// a wallet that simply does not hold them yet.
pub fn compute_allocation(
    data: &StrategyData,
    target: &TargetWallet,
) -> Result<AllocationView, StrategyError> {
    let normalized = normalize_weights(target)?;

    let total: Decimal = target.keys().map(|asset| data.total_value(asset)).sum();

    let mut current = BTreeMap::new();
    let mut ratio = BTreeMap::new();

    for asset in target.keys() {
        let proportion = if total.is_zero() {
            // Degenerate empty-wallet policy: define the proportion as 0
            // instead of NaN so every asset reads as fully underweight.
            0.0
        } else {
            (data.total_value(asset) / total).to_f64().unwrap_or(0.0)
        };
        let target_proportion = normalized[asset].to_f64().unwrap_or(0.0);

        current.insert(asset.clone(), proportion);
        ratio.insert(
            asset.clone(),
            (proportion - target_proportion) / target_proportion,
        );
    }

    let n = ratio.len() as f64;
    let mean = ratio.values().sum::<f64>() / n;
    let variance = ratio.values().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let z_score: BTreeMap<String, f64> = ratio
        .iter()
        .map(|(asset, r)| {
            let z = if stddev == 0.0 { 0.0 } else { (r - mean) / stddev };
            (asset.clone(), z)
        })
        .collect();

    // First-max/first-min by iteration order; strict comparison avoids
    // depending on float equality between recomputed ratios.
    let mut highest = None;
    let mut lowest = None;
    for asset in target.keys() {
        let r = ratio[asset];
        match highest {
            Some((_, best)) if r <= best => {}
            _ => highest = Some((asset.clone(), r)),
        }
        match lowest {
            Some((_, best)) if r >= best => {}
            _ => lowest = Some((asset.clone(), r)),
        }
    }
    // target is non-empty past normalize_weights
    let (highest, _) = highest.ok_or(StrategyError::InvalidTargetWallet)?;
    let (lowest, _) = lowest.ok_or(StrategyError::InvalidTargetWallet)?;

    let mut sorted_ascending: Vec<String> = target.keys().cloned().collect();
    sorted_ascending.sort_by(|a, b| {
        ratio[a]
            .partial_cmp(&ratio[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(AllocationView {
        current,
        ratio,
        z_score,
        highest,
        lowest,
        sorted_ascending,
    })
}
