//! Wire format of the portfolio manager's one-line decision
//!
//! The completion collaborator answers with exactly one of
//! `BUY $3000 worth AAPL`, `SELL $2000 worth AAPL` or `HOLD AAPL`.
//! Anything else is rejected here and the caller falls back to HOLD.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

use crate::domain::value_objects::intent::TradeAction;

static TRADE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(BUY|SELL) \$([0-9]+(?:\.[0-9]{1,2})?) worth ([A-Z][A-Z0-9.\-]{0,9})$")
        .expect("trade line pattern is valid")
});

static HOLD_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^HOLD ([A-Z][A-Z0-9.\-]{0,9})$").expect("hold line pattern is valid"));

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("no decision line found in completion")]
    NoDecisionLine,

    #[error("decision line is for {found}, expected {expected}")]
    TickerMismatch { expected: String, found: String },

    #[error("decision amount must be positive")]
    NonPositiveAmount,
}

/// A parsed decision line
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionLine {
    pub action: TradeAction,
    /// Dollar amount; `None` for HOLD
    pub amount: Option<f64>,
    pub ticker: String,
}

impl DecisionLine {
    pub fn hold(ticker: &str) -> Self {
        Self {
            action: TradeAction::Hold,
            amount: None,
            ticker: ticker.to_string(),
        }
    }

    pub fn trade(action: TradeAction, amount: f64, ticker: &str) -> Self {
        if action == TradeAction::Hold || amount <= 0.0 {
            return Self::hold(ticker);
        }
        Self {
            action,
            amount: Some(amount),
            ticker: ticker.to_string(),
        }
    }

    /// Parse a single line; surrounding whitespace is tolerated, nothing else
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();

        if let Some(caps) = TRADE_LINE.captures(line) {
            let action = match &caps[1] {
                "BUY" => TradeAction::Buy,
                _ => TradeAction::Sell,
            };
            let amount: f64 = caps[2].parse().ok()?;
            return Some(Self {
                action,
                amount: Some(amount),
                ticker: caps[3].to_string(),
            });
        }

        HOLD_LINE.captures(line).map(|caps| Self::hold(&caps[1]))
    }

    /// Find the decision line for `ticker` in a free-form completion
    ///
    /// The last matching line wins so that a model that restates the
    /// proposal before its final answer is read correctly.
    pub fn extract(text: &str, ticker: &str) -> Result<Self, ParseError> {
        let mut found: Option<DecisionLine> = None;
        for line in text.lines() {
            if let Some(parsed) = Self::parse_line(line) {
                found = Some(parsed);
            }
        }

        let line = found.ok_or(ParseError::NoDecisionLine)?;
        if !line.ticker.eq_ignore_ascii_case(ticker) {
            return Err(ParseError::TickerMismatch {
                expected: ticker.to_string(),
                found: line.ticker,
            });
        }
        if matches!(line.amount, Some(amount) if amount <= 0.0) {
            return Err(ParseError::NonPositiveAmount);
        }
        Ok(line)
    }
}

impl fmt::Display for DecisionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.action, self.amount) {
            (TradeAction::Hold, _) | (_, None) => write!(f, "HOLD {}", self.ticker),
            (action, Some(amount)) => {
                write!(f, "{} ${} worth {}", action, format_dollars(amount), self.ticker)
            }
        }
    }
}

/// Whole dollars print without decimals, anything else with cents
fn format_dollars(amount: f64) -> String {
    let cents = (amount * 100.0).round();
    if cents % 100.0 == 0.0 {
        format!("{}", (cents / 100.0) as i64)
    } else {
        format!("{:.2}", cents / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_buy_line() {
        let line = DecisionLine::parse_line("BUY $3000 worth AAPL").unwrap();
        assert_eq!(line.action, TradeAction::Buy);
        assert_eq!(line.amount, Some(3000.0));
        assert_eq!(line.ticker, "AAPL");
    }

    #[test]
    fn test_parse_hold_line() {
        let line = DecisionLine::parse_line("  HOLD MSFT ").unwrap();
        assert_eq!(line, DecisionLine::hold("MSFT"));
    }

    #[test]
    fn test_rejects_trailing_punctuation_and_prose() {
        assert!(DecisionLine::parse_line("BUY $3000 worth AAPL.").is_none());
        assert!(DecisionLine::parse_line("I would BUY $3000 worth AAPL").is_none());
        assert!(DecisionLine::parse_line("buy $3000 worth AAPL").is_none());
        assert!(DecisionLine::parse_line("BUY 3000 worth AAPL").is_none());
    }

    #[test]
    fn test_extract_takes_last_line() {
        let text = "Proposal: BUY $3000 worth AAPL\nAfter review:\nSELL $1500.50 worth AAPL\n";
        let line = DecisionLine::extract(text, "AAPL").unwrap();
        assert_eq!(line.action, TradeAction::Sell);
        assert_eq!(line.amount, Some(1500.5));
    }

    #[test]
    fn test_extract_errors() {
        assert_eq!(
            DecisionLine::extract("no idea", "AAPL"),
            Err(ParseError::NoDecisionLine)
        );
        assert!(matches!(
            DecisionLine::extract("HOLD TSLA", "AAPL"),
            Err(ParseError::TickerMismatch { .. })
        ));
        assert_eq!(
            DecisionLine::extract("BUY $0 worth AAPL", "AAPL"),
            Err(ParseError::NonPositiveAmount)
        );
    }

    #[test]
    fn test_display_matches_wire_format() {
        assert_eq!(
            DecisionLine::trade(TradeAction::Buy, 3000.0, "AAPL").to_string(),
            "BUY $3000 worth AAPL"
        );
        assert_eq!(
            DecisionLine::trade(TradeAction::Sell, 412.3456, "AAPL").to_string(),
            "SELL $412.35 worth AAPL"
        );
        assert_eq!(DecisionLine::hold("AAPL").to_string(), "HOLD AAPL");
        assert_eq!(
            DecisionLine::trade(TradeAction::Buy, 0.0, "AAPL").to_string(),
            "HOLD AAPL"
        );
    }
}
