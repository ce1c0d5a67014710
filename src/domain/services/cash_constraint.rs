//! Cash floor enforcement for new purchases

/// How much cash a BUY may deploy without breaching the target cash allocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashConstraint {
    pub available_cash: f64,
    /// Cash that must remain after any purchase
    pub cash_floor: f64,
    pub deployable_cash: f64,
}

impl CashConstraint {
    /// `target_cash_allocation_percent` is 0-100 and clamped into that range
    pub fn compute(available_cash: f64, total_value: f64, target_cash_allocation_percent: f64) -> Self {
        let available_cash = if available_cash.is_finite() { available_cash } else { 0.0 };
        let fraction = if target_cash_allocation_percent.is_finite() {
            (target_cash_allocation_percent / 100.0).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let total_value = if total_value.is_finite() { total_value.max(0.0) } else { 0.0 };

        let cash_floor = fraction * total_value;
        let deployable_cash = (available_cash - cash_floor).min(available_cash).max(0.0);

        Self {
            available_cash,
            cash_floor,
            deployable_cash,
        }
    }

    /// Selling only ever raises cash, so only buys are limited
    pub fn allows_buy(&self) -> bool {
        self.deployable_cash > 0.0
    }

    pub fn describe(&self) -> String {
        format!(
            "cash ${:.2}, floor ${:.2}, deployable ${:.2}",
            self.available_cash, self.cash_floor, self.deployable_cash
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cash_already_at_floor() {
        let c = CashConstraint::compute(10_000.0, 50_000.0, 20.0);
        assert_eq!(c.cash_floor, 10_000.0);
        assert_eq!(c.deployable_cash, 0.0);
        assert!(!c.allows_buy());
    }

    #[test]
    fn test_cash_above_floor() {
        let c = CashConstraint::compute(15_000.0, 50_000.0, 20.0);
        assert_eq!(c.deployable_cash, 5_000.0);
    }

    #[test]
    fn test_never_negative_never_above_available() {
        let cases = [
            (0.0, 0.0, 0.0),
            (-500.0, 10_000.0, 10.0),
            (1_000.0, 100_000.0, 50.0),
            (5_000.0, 5_000.0, 0.0),
            (5_000.0, -1.0, 20.0),
            (5_000.0, 10_000.0, 250.0),
            (5_000.0, 10_000.0, -20.0),
            (f64::NAN, 10_000.0, 20.0),
        ];
        for (cash, total, pct) in cases {
            let c = CashConstraint::compute(cash, total, pct);
            assert!(c.deployable_cash >= 0.0, "negative for {:?}", (cash, total, pct));
            assert!(
                c.deployable_cash <= c.available_cash.max(0.0),
                "above available for {:?}",
                (cash, total, pct)
            );
        }
    }

    #[test]
    fn test_zero_target_allows_all_cash() {
        let c = CashConstraint::compute(5_000.0, 5_000.0, 0.0);
        assert_eq!(c.deployable_cash, 5_000.0);
    }
}
