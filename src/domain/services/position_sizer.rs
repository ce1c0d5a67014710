//! Position sizing service that turns an intent into a dollar amount
//!
//! Sizing respects:
//! - Confidence tiers scaled by the user's risk level
//! - Deployable cash above the target cash floor
//! - Minimum and maximum position bounds
//! - Optional rounding to the default position size increment
//!
//! Refusals are not errors: the sizer answers HOLD with the reason.

use crate::domain::entities::user_policy::RiskLevel;
use crate::domain::errors::ValidationError;
use crate::domain::value_objects::intent::{Intent, TradeAction};
use crate::domain::value_objects::position_sizing::{PositionSizingRequest, PositionSizingResult};

/// Confidence cut-offs and multiplier ranges for one risk level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceTiers {
    pub high_threshold: f64,
    pub mid_threshold: f64,
    /// Conservative users have no low tier: below `mid_threshold` means HOLD
    pub low_threshold: Option<f64>,
    pub high_range: (f64, f64),
    pub mid_range: (f64, f64),
}

impl ConfidenceTiers {
    pub fn for_risk_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Conservative => Self {
                high_threshold: 84.0,
                mid_threshold: 74.0,
                low_threshold: None,
                high_range: (2.0, 3.0),
                mid_range: (1.0, 1.5),
            },
            RiskLevel::Moderate => Self {
                high_threshold: 80.0,
                mid_threshold: 70.0,
                low_threshold: Some(60.0),
                high_range: (3.0, 4.0),
                mid_range: (1.5, 2.0),
            },
            RiskLevel::Aggressive => Self {
                high_threshold: 76.0,
                mid_threshold: 66.0,
                low_threshold: Some(55.0),
                high_range: (4.0, 6.0),
                mid_range: (2.0, 3.0),
            },
        }
    }

    /// Multiplier of the default position size, `None` below every tier
    ///
    /// Within the high and mid tiers the multiplier grows linearly with
    /// confidence; the low tier is a flat 1x.
    pub fn multiplier(&self, confidence: f64) -> Option<f64> {
        let lerp = |(lo, hi): (f64, f64), from: f64, to: f64| {
            let span = (to - from).max(f64::EPSILON);
            lo + (hi - lo) * ((confidence - from) / span).clamp(0.0, 1.0)
        };

        if confidence >= self.high_threshold {
            Some(lerp(self.high_range, self.high_threshold, 100.0))
        } else if confidence >= self.mid_threshold {
            Some(lerp(self.mid_range, self.mid_threshold, self.high_threshold))
        } else {
            match self.low_threshold {
                Some(low) if confidence >= low => Some(1.0),
                _ => None,
            }
        }
    }
}

/// Round `amount` to a multiple of `increment` without exceeding `limit`
///
/// Rounds to nearest, falling back to rounding down when nearest would break
/// the limit. A positive amount that rounds to zero becomes one increment if
/// that fits under the limit and is otherwise kept unrounded.
pub fn round_to_increment(amount: f64, increment: f64, limit: f64) -> f64 {
    if !(increment > 0.0) || !(amount > 0.0) {
        return amount;
    }
    let mut rounded = (amount / increment).round() * increment;
    if rounded > limit {
        rounded = (amount / increment).floor() * increment;
    }
    if rounded <= 0.0 {
        return if increment <= limit { increment } else { amount };
    }
    rounded
}

/// PositionSizer service for calculating position sizes
#[derive(Debug, Clone)]
pub struct PositionSizer;

impl PositionSizer {
    /// Create a new PositionSizer instance
    pub fn new() -> Self {
        Self
    }

    /// Size a position based on request parameters
    ///
    /// Returns an error only for malformed requests (no valid price, bad
    /// confidence). Every business refusal is a HOLD result.
    pub fn size_position(
        &self,
        req: &PositionSizingRequest,
    ) -> Result<PositionSizingResult, ValidationError> {
        req.validate()?;

        match req.intent.direction() {
            TradeAction::Hold => Ok(PositionSizingResult::hold(format!(
                "No trade for {}: intent is HOLD",
                req.ticker
            ))),
            TradeAction::Buy => Ok(self.size_buy(req)),
            TradeAction::Sell => Ok(self.size_sell(req)),
        }
    }

    fn base_amount(&self, req: &PositionSizingRequest) -> Result<(f64, String), PositionSizingResult> {
        if let Some(requested) = req.requested_amount {
            return Ok((
                requested.max(0.0),
                format!("requested ${:.2}", requested),
            ));
        }
        let tiers = ConfidenceTiers::for_risk_level(req.risk_level);
        match tiers.multiplier(req.confidence) {
            Some(multiplier) => Ok((
                req.default_position_size * multiplier,
                format!(
                    "{:.0}% confidence ({}) sizes {:.2}x of ${:.2}",
                    req.confidence, req.risk_level, multiplier, req.default_position_size
                ),
            )),
            None => Err(PositionSizingResult::hold(format!(
                "Confidence {:.0}% is below the {} threshold for {}",
                req.confidence, req.risk_level, req.ticker
            ))),
        }
    }

    fn size_buy(&self, req: &PositionSizingRequest) -> PositionSizingResult {
        let cash_cap = req.deployable_cash.min(req.available_cash).max(0.0);
        if cash_cap <= 0.0 {
            return PositionSizingResult::hold(format!(
                "Insufficient cash for {}: nothing deployable above the cash allocation floor",
                req.ticker
            ));
        }

        let held_value = req.held_value();
        let room = (req.max_position_size - held_value).max(0.0);
        if room <= 0.0 {
            return PositionSizingResult::hold(format!(
                "{} already at the maximum position size ${:.2}",
                req.ticker, req.max_position_size
            ));
        }

        let (base, mut reasoning) = match self.base_amount(req) {
            Ok(base) => base,
            Err(hold) => return hold,
        };

        let limit = cash_cap.min(room);
        let mut amount = base.clamp(0.0, req.max_position_size).min(limit);
        if amount < base {
            reasoning.push_str(&format!(", capped at ${:.2}", amount));
        }

        if let Some(increment) = req.round_increment {
            let rounded = round_to_increment(amount, increment, limit);
            if rounded != amount {
                reasoning.push_str(&format!(", rounded to ${:.2}", rounded));
            }
            amount = rounded;
        }

        // Position must end up at least minimum-sized
        let needed = (req.min_position_size - held_value).max(0.0);
        if amount < needed {
            if needed > limit {
                return PositionSizingResult::hold(format!(
                    "Insufficient cash for {}: minimum position needs ${:.2}, only ${:.2} available",
                    req.ticker, needed, limit
                ));
            }
            amount = needed;
            reasoning.push_str(&format!(", raised to minimum position ${:.2}", amount));
        }

        if amount <= 0.0 {
            return PositionSizingResult::hold(format!("Sized {} to zero", req.ticker));
        }

        PositionSizingResult {
            action: TradeAction::Buy,
            intent: req.intent,
            dollar_amount: amount,
            shares: amount / req.current_price,
            percent_of_portfolio: percent_of(amount, req.portfolio_value),
            reasoning,
        }
    }

    fn size_sell(&self, req: &PositionSizingRequest) -> PositionSizingResult {
        let position = match req.current_position {
            Some(position) if position.shares > 0.0 => position,
            _ => {
                return PositionSizingResult::hold(format!("No {} shares to sell", req.ticker));
            }
        };
        let position_value = position.shares * req.current_price;

        let full_exit = |reasoning: String| PositionSizingResult {
            action: TradeAction::Sell,
            intent: req.intent,
            dollar_amount: position_value,
            shares: position.shares,
            percent_of_portfolio: percent_of(position_value, req.portfolio_value),
            reasoning,
        };

        if req.intent == Intent::Exit {
            return full_exit(format!("Exiting the full {} position", req.ticker));
        }

        let (base, reasoning) = match self.base_amount(req) {
            Ok(base) => base,
            Err(hold) => return hold,
        };
        let amount = base.clamp(0.0, req.max_position_size).min(position_value);

        if position_value < req.min_position_size
            || position_value - amount < req.min_position_size
            || amount >= position_value
        {
            return full_exit(format!(
                "{}, converted to a full exit: the remaining {} position would be below the ${:.2} minimum",
                reasoning, req.ticker, req.min_position_size
            ));
        }

        if amount <= 0.0 {
            return PositionSizingResult::hold(format!("Sized {} trim to zero", req.ticker));
        }

        PositionSizingResult {
            action: TradeAction::Sell,
            intent: req.intent,
            dollar_amount: amount,
            shares: amount / req.current_price,
            percent_of_portfolio: percent_of(amount, req.portfolio_value),
            reasoning,
        }
    }
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn percent_of(amount: f64, total: f64) -> f64 {
    if total > 0.0 {
        amount * 100.0 / total
    } else {
        0.0
    }
}
