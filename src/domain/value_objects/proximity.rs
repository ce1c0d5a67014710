//! Proximity of a position's unrealized P/L to the user's profit/stop limits

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityKind {
    NearProfit,
    NearLoss,
}

/// Facts about a near-limit position, carried into the analysis it originates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitProximity {
    pub symbol: String,
    pub kind: ProximityKind,
    /// Current unrealized P/L in percent
    pub pl_percent: f64,
    /// The limit being approached, signed (stop-loss is negative)
    pub limit_percent: f64,
    pub threshold_percent: f64,
    /// Remaining distance to the limit in percentage points
    pub distance_percent: f64,
}

impl LimitProximity {
    pub fn describe(&self) -> String {
        let label = match self.kind {
            ProximityKind::NearProfit => "profit target",
            ProximityKind::NearLoss => "stop-loss",
        };
        format!(
            "{} P/L {:.2}% is {:.2} points from its {} of {:.2}%",
            self.symbol, self.pl_percent, self.distance_percent, label, self.limit_percent
        )
    }
}
