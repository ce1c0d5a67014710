//! Maps a risk-manager verdict onto a normalized intent
//!
//! Total over its input: every decision string yields an intent. Override
//! rules only ever demote to HOLD and leave an annotation behind.

use crate::domain::entities::portfolio::{OrderSide, PendingOrder};
use crate::domain::value_objects::intent::{Intent, TradeAction};

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedIntent {
    /// Intent before override rules
    pub base_intent: Intent,
    pub intent: Intent,
    pub direction: TradeAction,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntentNormalizer;

impl IntentNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Full normalization: keyword mapping followed by override rules
    pub fn normalize(
        &self,
        ticker: &str,
        decision: &str,
        has_position: bool,
        pending: &[PendingOrder],
    ) -> NormalizedIntent {
        let (base, warning) = self.base_intent(decision, has_position);
        let mut normalized = self.apply_overrides(ticker, base, has_position, pending);
        if let Some(warning) = warning {
            normalized.warnings.insert(0, warning);
        }
        normalized
    }

    /// Keyword mapping conditioned on whether shares are already held
    ///
    /// The first recognized keyword wins, so "STRONG BUY" reads as BUY.
    /// Unrecognized verdicts default to HOLD with a position and BUILD
    /// without one; the warning makes that default visible in the audit trail.
    pub fn base_intent(&self, decision: &str, has_position: bool) -> (Intent, Option<String>) {
        let upper = decision.to_ascii_uppercase();
        let keyword = upper
            .split(|c: char| !c.is_ascii_alphabetic())
            .find(|token| {
                matches!(
                    *token,
                    "BUILD" | "ADD" | "BUY" | "TRIM" | "SELL" | "EXIT" | "CLOSE" | "HOLD"
                )
            });

        let intent = match keyword {
            Some("BUILD") | Some("ADD") | Some("BUY") => {
                if has_position {
                    Intent::Add
                } else {
                    Intent::Build
                }
            }
            Some("TRIM") | Some("SELL") => Intent::Trim,
            Some("EXIT") | Some("CLOSE") => Intent::Exit,
            Some("HOLD") => Intent::Hold,
            _ => {
                let fallback = if has_position { Intent::Hold } else { Intent::Build };
                return (
                    fallback,
                    Some(format!(
                        "Unrecognized decision '{}': defaulting to {}",
                        decision.trim(),
                        fallback
                    )),
                );
            }
        };
        (intent, None)
    }

    /// Apply the override rules, in order
    ///
    /// 1. TRIM/EXIT without a position becomes HOLD.
    /// 2. A BUY intent while a BUY is pending, or a SELL intent while a SELL
    ///    is pending, becomes HOLD.
    pub fn apply_overrides(
        &self,
        ticker: &str,
        base: Intent,
        has_position: bool,
        pending: &[PendingOrder],
    ) -> NormalizedIntent {
        let mut warnings = Vec::new();
        let mut intent = base;

        if intent.requires_position() && !has_position {
            warnings.push(format!(
                "Cannot {} {}: no existing position, holding instead",
                intent, ticker
            ));
            intent = Intent::Hold;
        }

        let conflicting_side = match intent.direction() {
            TradeAction::Buy => Some(OrderSide::Buy),
            TradeAction::Sell => Some(OrderSide::Sell),
            TradeAction::Hold => None,
        };
        if let Some(side) = conflicting_side {
            if let Some(conflict) = pending.iter().find(|p| p.side == side) {
                warnings.push(format!(
                    "{} overridden to HOLD: a pending {} order for {} already exists ({:?})",
                    intent, side, ticker, conflict.source
                ));
                intent = Intent::Hold;
            }
        }

        NormalizedIntent {
            base_intent: base,
            intent,
            direction: intent.direction(),
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::portfolio::PendingSource;

    fn pending(side: OrderSide) -> PendingOrder {
        PendingOrder {
            symbol: "AAPL".into(),
            side,
            source: PendingSource::Brokerage,
        }
    }

    #[test]
    fn test_buy_maps_on_position() {
        let n = IntentNormalizer::new();
        assert_eq!(n.normalize("AAPL", "BUY", false, &[]).intent, Intent::Build);
        assert_eq!(n.normalize("AAPL", "BUY", true, &[]).intent, Intent::Add);
        assert_eq!(n.normalize("AAPL", "build", true, &[]).intent, Intent::Add);
        assert_eq!(n.normalize("AAPL", "ADD", false, &[]).intent, Intent::Build);
        assert_eq!(n.normalize("AAPL", "Strong Buy", false, &[]).intent, Intent::Build);
    }

    #[test]
    fn test_sell_keywords() {
        let n = IntentNormalizer::new();
        assert_eq!(n.normalize("AAPL", "SELL", true, &[]).intent, Intent::Trim);
        assert_eq!(n.normalize("AAPL", "TRIM", true, &[]).intent, Intent::Trim);
        assert_eq!(n.normalize("AAPL", "EXIT", true, &[]).intent, Intent::Exit);
        assert_eq!(n.normalize("AAPL", "HOLD", true, &[]).direction, TradeAction::Hold);
    }

    #[test]
    fn test_trim_or_exit_without_position_holds() {
        let n = IntentNormalizer::new();
        for decision in ["TRIM", "EXIT", "SELL"] {
            let result = n.normalize("AAPL", decision, false, &[]);
            assert_eq!(result.intent, Intent::Hold);
            assert_eq!(result.direction, TradeAction::Hold);
            assert!(result.warnings[0].contains("no existing position"));
        }
    }

    #[test]
    fn test_pending_buy_blocks_every_buy_directed_verdict() {
        let n = IntentNormalizer::new();
        let orders = vec![pending(OrderSide::Buy)];
        for decision in ["BUY", "BUILD", "ADD", "gibberish"] {
            for has_position in [false, true] {
                let result = n.normalize("AAPL", decision, has_position, &orders);
                assert_eq!(result.intent, Intent::Hold, "{} / {}", decision, has_position);
            }
        }
        assert_eq!(n.normalize("AAPL", "SELL", true, &orders).intent, Intent::Trim);
    }

    #[test]
    fn test_pending_sell_blocks_sells() {
        let n = IntentNormalizer::new();
        let orders = vec![pending(OrderSide::Sell)];
        let result = n.normalize("AAPL", "EXIT", true, &orders);
        assert_eq!(result.intent, Intent::Hold);
        assert_eq!(result.base_intent, Intent::Exit);
        assert!(result.warnings[0].contains("pending sell order"));
        assert_eq!(n.normalize("AAPL", "BUY", true, &orders).intent, Intent::Add);
    }

    #[test]
    fn test_unrecognized_defaults() {
        let n = IntentNormalizer::new();
        let without = n.normalize("AAPL", "maybe later", false, &[]);
        assert_eq!(without.intent, Intent::Build);
        assert!(without.warnings[0].starts_with("Unrecognized decision"));

        let with = n.normalize("AAPL", "", true, &[]);
        assert_eq!(with.intent, Intent::Hold);
    }
}
