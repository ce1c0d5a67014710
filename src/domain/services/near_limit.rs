//! Detects positions approaching the user's profit target or stop-loss

use crate::domain::entities::portfolio::Position;
use crate::domain::entities::user_policy::UserPolicy;
use crate::domain::value_objects::proximity::{LimitProximity, ProximityKind};

/// Classify one position against the policy limits
///
/// The threshold is relative to the limit: with a 25% profit target and a 20%
/// threshold, anything from +20% up to (but excluding) +25% is near profit.
/// Positions already past a limit are not "near" it.
pub fn classify(position: &Position, policy: &UserPolicy) -> Option<LimitProximity> {
    if position.qty <= 0.0 || !position.unrealized_pl_percent.is_finite() {
        return None;
    }
    let pl = position.unrealized_pl_percent;
    let band = (policy.near_limit_threshold_percent / 100.0).clamp(0.0, 1.0);

    let target = policy.profit_target_percent;
    if target > 0.0 && pl < target && pl >= target * (1.0 - band) {
        return Some(LimitProximity {
            symbol: position.symbol.clone(),
            kind: ProximityKind::NearProfit,
            pl_percent: pl,
            limit_percent: target,
            threshold_percent: policy.near_limit_threshold_percent,
            distance_percent: target - pl,
        });
    }

    let stop = -policy.stop_loss_percent;
    if stop < 0.0 && pl > stop && pl <= stop * (1.0 - band) {
        return Some(LimitProximity {
            symbol: position.symbol.clone(),
            kind: ProximityKind::NearLoss,
            pl_percent: pl,
            limit_percent: stop,
            threshold_percent: policy.near_limit_threshold_percent,
            distance_percent: pl - stop,
        });
    }
    None
}

/// All near-limit positions of a portfolio, closest to their limit first
pub fn scan_positions(positions: &[Position], policy: &UserPolicy) -> Vec<LimitProximity> {
    let mut hits: Vec<LimitProximity> = positions
        .iter()
        .filter_map(|p| classify(p, policy))
        .collect();
    hits.sort_by(|a, b| a.distance_percent.total_cmp(&b.distance_percent));
    hits
}
