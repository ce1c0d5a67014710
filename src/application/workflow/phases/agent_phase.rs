//! Analyst agent phases (market, research, risk)
//!
//! An agent phase hands its system prompt and the earlier agents' findings to
//! the completion collaborator and stores the reply as its own insight. The
//! risk phase additionally records the verdict the portfolio phase sizes from.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

use super::{PhaseContext, PhaseHandler, PhaseOutcome};
use crate::application::workflow::cancellation::{CancellationGuard, GuardState};
use crate::domain::entities::analysis::{
    AgentReport, AnalysisOrigin, AnalysisRecord, Phase, PhaseInsight, RiskAssessment,
};
use crate::domain::errors::EngineError;
use crate::domain::repositories::analysis_store::AnalysisStore;
use crate::domain::repositories::completion_client::CompletionRequest;
use crate::infrastructure::client_factory::ClientFactory;

pub const DEFAULT_AGENT_MAX_TOKENS: u32 = 1200;
pub const DEFAULT_DECISION: &str = "HOLD";
pub const DEFAULT_CONFIDENCE: f64 = 50.0;

const MARKET_PROMPT: &str = "You are a market analyst. Summarize price action, trend and \
    volume for the ticker and state the main technical levels.";
const RESEARCH_PROMPT: &str = "You are a research manager. Weigh the bull and bear case for \
    the ticker using the analyst findings provided.";
const RISK_PROMPT: &str = "You are a risk manager. Give a final recommendation for the ticker. \
    End with a line 'DECISION: <BUY|ADD|BUILD|TRIM|SELL|EXIT|HOLD>' and a line \
    'CONFIDENCE: <0-100>'.";

static DECISION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*\**DECISION\**[ \t]*:[ \t*]*([^\r\n*]+)")
        .expect("decision pattern is valid")
});

static CONFIDENCE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*\**CONFIDENCE\**\s*:\s*\**\s*([0-9]+(?:\.[0-9]+)?)")
        .expect("confidence pattern is valid")
});

/// Pull the verdict out of a risk-manager reply, defaulting to HOLD at 50%
///
/// The whole verdict line is kept ("STRONG SELL"); mapping it to an intent
/// is the normalizer's job.
pub fn parse_verdict(text: &str) -> (String, f64) {
    let decision = DECISION_LINE
        .captures(text)
        .map(|caps| caps[1].trim().to_ascii_uppercase())
        .filter(|verdict| !verdict.is_empty())
        .unwrap_or_else(|| DEFAULT_DECISION.to_string());
    let confidence = CONFIDENCE_LINE
        .captures(text)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 100.0))
        .unwrap_or(DEFAULT_CONFIDENCE);
    (decision, confidence)
}

pub struct AgentPhase {
    phase: Phase,
    system_prompt: String,
    max_tokens: u32,
    store: Arc<dyn AnalysisStore>,
    clients: Arc<dyn ClientFactory>,
    cancellation: CancellationGuard,
}

impl AgentPhase {
    fn new(
        phase: Phase,
        system_prompt: impl Into<String>,
        store: Arc<dyn AnalysisStore>,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            phase,
            system_prompt: system_prompt.into(),
            max_tokens: DEFAULT_AGENT_MAX_TOKENS,
            cancellation: CancellationGuard::new(store.clone()),
            store,
            clients,
        }
    }

    pub fn market(store: Arc<dyn AnalysisStore>, clients: Arc<dyn ClientFactory>) -> Self {
        Self::new(Phase::Market, MARKET_PROMPT, store, clients)
    }

    pub fn research(store: Arc<dyn AnalysisStore>, clients: Arc<dyn ClientFactory>) -> Self {
        Self::new(Phase::Research, RESEARCH_PROMPT, store, clients)
    }

    pub fn risk(store: Arc<dyn AnalysisStore>, clients: Arc<dyn ClientFactory>) -> Self {
        Self::new(Phase::Risk, RISK_PROMPT, store, clients)
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_prompt(&self, record: &AnalysisRecord) -> String {
        let mut prompt = format!("Ticker: {}\n", record.ticker);
        if let AnalysisOrigin::NearLimit { proximity } = &record.context.origin {
            prompt.push_str(&format!("Trigger: {}\n", proximity.describe()));
        }
        for (phase, insight) in record.insights.range(..self.phase) {
            prompt.push_str(&format!("\n## {} findings\n{}\n", phase, insight.summary()));
        }
        prompt
    }

    fn insight(&self, reply: String) -> (PhaseInsight, Option<(String, f64)>) {
        let recorded_at = Utc::now();
        match self.phase {
            Phase::Risk => {
                let (decision, confidence) = parse_verdict(&reply);
                let insight = PhaseInsight::Risk(RiskAssessment {
                    decision: decision.clone(),
                    confidence,
                    summary: reply,
                    recorded_at,
                });
                (insight, Some((decision, confidence)))
            }
            Phase::Research => (
                PhaseInsight::Research(AgentReport {
                    summary: reply,
                    recorded_at,
                }),
                None,
            ),
            _ => (
                PhaseInsight::Market(AgentReport {
                    summary: reply,
                    recorded_at,
                }),
                None,
            ),
        }
    }
}

#[async_trait]
impl PhaseHandler for AgentPhase {
    fn phase(&self) -> Phase {
        self.phase
    }

    async fn run(&self, ctx: &PhaseContext) -> Result<PhaseOutcome, EngineError> {
        let record = match self.cancellation.check(&ctx.analysis_id, "phase entry").await? {
            GuardState::Active(record) => record,
            GuardState::Canceled => return Ok(PhaseOutcome::Canceled),
        };

        let completion = self.clients.completion(&ctx.settings)?;
        let request = CompletionRequest {
            system_prompt: self.system_prompt.clone(),
            prompt: self.build_prompt(&record),
            max_tokens: self.max_tokens,
        };

        if self.cancellation.check(&ctx.analysis_id, "completion request").await? == GuardState::Canceled {
            return Ok(PhaseOutcome::Canceled);
        }

        debug!("{} agent requesting completion for {}", self.phase, ctx.analysis_id);
        let reply = completion.complete(&request).await?;

        let (insight, verdict) = self.insight(reply);
        self.store.update_insight(&ctx.analysis_id, &insight).await?;

        let message = match &verdict {
            Some((decision, confidence)) => {
                self.store
                    .update_verdict(&ctx.analysis_id, decision, *confidence)
                    .await?;
                format!("Risk verdict: {} ({:.0}% confidence)", decision, confidence)
            }
            None => format!("{} analysis recorded", self.phase),
        };
        self.store
            .update_phase(&ctx.analysis_id, self.phase, &message)
            .await?;

        info!("{} phase completed for {} ({})", self.phase, ctx.analysis_id, ctx.ticker);
        Ok(PhaseOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::intent_normalizer::IntentNormalizer;
    use crate::domain::value_objects::intent::Intent;

    #[test]
    fn test_parse_verdict() {
        let text = "The setup is strong.\nDECISION: buy\nCONFIDENCE: 85";
        assert_eq!(parse_verdict(text), ("BUY".to_string(), 85.0));
    }

    #[test]
    fn test_parse_verdict_tolerates_markdown() {
        let text = "**DECISION:** TRIM\n**CONFIDENCE:** 72.5";
        assert_eq!(parse_verdict(text), ("TRIM".to_string(), 72.5));
    }

    #[test]
    fn test_parse_verdict_keeps_multi_word_verdicts() {
        let (decision, confidence) = parse_verdict("DECISION: Strong Sell\nCONFIDENCE: 80");
        assert_eq!(decision, "STRONG SELL");
        assert_eq!(confidence, 80.0);

        let normalizer = IntentNormalizer::new();
        assert_eq!(normalizer.normalize("AAPL", &decision, true, &[]).intent, Intent::Trim);

        let (decision, _) = parse_verdict("**DECISION:** **Strong Buy**");
        assert_eq!(decision, "STRONG BUY");
        assert_eq!(normalizer.normalize("AAPL", &decision, true, &[]).intent, Intent::Add);
    }

    #[test]
    fn test_parse_verdict_defaults() {
        assert_eq!(parse_verdict("no verdict here"), ("HOLD".to_string(), 50.0));
        assert_eq!(parse_verdict("DECISION: SELL\nCONFIDENCE: 250"), ("SELL".to_string(), 100.0));
    }
}
