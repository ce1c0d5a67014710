//! Shared fixtures for the end-to-end suites: a mock brokerage, a scripted
//! completion client, and a fully wired coordinator over in-memory SQLite.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tradepilot::application::workflow::phases::{
    AgentPhase, ExecutionPhase, PhaseContext, PortfolioPhase,
};
use tradepilot::application::workflow::{RetryPolicy, RetryTimeoutGuard, WorkflowCoordinator};
use tradepilot::domain::entities::analysis::{AnalysisOrigin, NewAnalysis};
use tradepilot::domain::entities::portfolio::{Account, OpenOrder, PortfolioSnapshot, Position};
use tradepilot::domain::entities::user_policy::UserPolicy;
use tradepilot::domain::errors::EngineError;
use tradepilot::domain::repositories::analysis_store::AnalysisStore;
use tradepilot::domain::repositories::brokerage_client::{
    BrokerageClient, BrokerageError, BrokerageResult, OrderAck, OrderRequest,
};
use tradepilot::domain::repositories::completion_client::{
    CompletionClient, CompletionError, CompletionRequest,
};
use tradepilot::domain::services::decision_engine::{DecisionEngine, DecisionEngineConfig};
use tradepilot::domain::value_objects::api_settings::ApiSettings;
use tradepilot::infrastructure::client_factory::ClientFactory;
use tradepilot::persistence::{init_database, DatabaseConfig, SqliteAnalysisStore};

pub const USER: &str = "user-1";

pub fn snapshot(cash: f64, portfolio_value: f64, positions: Vec<Position>, open: Vec<OpenOrder>) -> PortfolioSnapshot {
    PortfolioSnapshot {
        account: Account::with_reservations(cash, portfolio_value, cash, &open),
        positions,
        open_orders: open,
        fetched_at: Utc::now(),
    }
}

pub fn position(symbol: &str, qty: f64, price: f64, pl_percent: f64) -> Position {
    Position {
        symbol: symbol.to_string(),
        qty,
        avg_entry_price: price / (1.0 + pl_percent / 100.0),
        current_price: price,
        market_value: qty * price,
        unrealized_pl: qty * price * pl_percent / (100.0 + pl_percent),
        unrealized_pl_percent: pl_percent,
    }
}

pub fn settings() -> ApiSettings {
    ApiSettings {
        ai_provider: "openai".into(),
        ai_api_key: "sk-test-0123456789".into(),
        alpaca_paper_api_key: Some("PKTEST".into()),
        alpaca_paper_secret_key: Some("secret".into()),
        alpaca_paper_trading: true,
        ..Default::default()
    }
}

pub struct MockBrokerage {
    snapshot: Mutex<PortfolioSnapshot>,
    price: Option<f64>,
    reject_orders: bool,
    submitted: Mutex<Vec<OrderRequest>>,
    fetches: AtomicUsize,
}

impl MockBrokerage {
    pub fn new(snapshot: PortfolioSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            price: Some(100.0),
            reject_orders: false,
            submitted: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn rejecting(mut self) -> Self {
        self.reject_orders = true;
        self
    }

    pub fn without_price(mut self) -> Self {
        self.price = None;
        self
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerageClient for MockBrokerage {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_portfolio(&self) -> BrokerageResult<PortfolioSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn latest_price(&self, _symbol: &str) -> BrokerageResult<Option<f64>> {
        Ok(self.price)
    }

    async fn submit_order(&self, order: &OrderRequest) -> BrokerageResult<OrderAck> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(order.clone());
        if self.reject_orders {
            return Err(BrokerageError::OrderRejected("insufficient buying power".into()));
        }
        Ok(OrderAck {
            success: true,
            order_id: format!("broker-{}", submitted.len()),
        })
    }
}

/// Replies by agent, recognised from the system prompt
pub struct ScriptedCompletion {
    risk_reply: String,
    manager_reply: String,
    manager_delays: Mutex<VecDeque<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(risk_reply: &str, manager_reply: &str) -> Self {
        Self {
            risk_reply: risk_reply.to_string(),
            manager_reply: manager_reply.to_string(),
            manager_delays: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Delay successive portfolio-manager replies, in order
    pub fn with_manager_delays(self, delays: &[Duration]) -> Self {
        *self.manager_delays.lock().unwrap() = delays.iter().copied().collect();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn manager_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.as_str() == "portfolio").count()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let prompt = request.system_prompt.to_ascii_lowercase();
        let agent = if prompt.contains("portfolio manager") {
            "portfolio"
        } else if prompt.contains("risk manager") {
            "risk"
        } else if prompt.contains("research") {
            "research"
        } else {
            "market"
        };
        self.calls.lock().unwrap().push(agent.to_string());

        match agent {
            "portfolio" => {
                let delay = self.manager_delays.lock().unwrap().pop_front();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(self.manager_reply.clone())
            }
            "risk" => Ok(self.risk_reply.clone()),
            other => Ok(format!("{} notes: trend intact, volume average", other)),
        }
    }
}

pub struct MockClientFactory {
    pub brokerage: Arc<MockBrokerage>,
    pub completion: Arc<ScriptedCompletion>,
}

impl ClientFactory for MockClientFactory {
    fn brokerage(&self, _settings: &ApiSettings) -> Result<Arc<dyn BrokerageClient>, EngineError> {
        let client: Arc<dyn BrokerageClient> = self.brokerage.clone();
        Ok(client)
    }

    fn completion(&self, _settings: &ApiSettings) -> Result<Arc<dyn CompletionClient>, EngineError> {
        let client: Arc<dyn CompletionClient> = self.completion.clone();
        Ok(client)
    }
}

pub fn fast_retry_policy(timeout: Duration) -> RetryPolicy {
    RetryPolicy {
        timeout,
        max_retries: 2,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    }
}

pub struct Harness {
    pub sqlite: Arc<SqliteAnalysisStore>,
    pub store: Arc<dyn AnalysisStore>,
    pub brokerage: Arc<MockBrokerage>,
    pub completion: Arc<ScriptedCompletion>,
    pub clients: Arc<dyn ClientFactory>,
    pub coordinator: Arc<WorkflowCoordinator>,
}

impl Harness {
    pub async fn new(
        brokerage: MockBrokerage,
        completion: ScriptedCompletion,
        policy: UserPolicy,
        retry: RetryPolicy,
    ) -> Self {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        let sqlite = Arc::new(SqliteAnalysisStore::new(pool));
        sqlite.save_user_policy(USER, &policy).await.unwrap();
        let store: Arc<dyn AnalysisStore> = sqlite.clone();

        let brokerage = Arc::new(brokerage);
        let completion = Arc::new(completion);
        let clients: Arc<dyn ClientFactory> = Arc::new(MockClientFactory {
            brokerage: brokerage.clone(),
            completion: completion.clone(),
        });

        let coordinator = Arc::new(
            WorkflowCoordinator::new(store.clone(), RetryTimeoutGuard::new(retry))
                .with_phase(Arc::new(AgentPhase::market(store.clone(), clients.clone())))
                .with_phase(Arc::new(AgentPhase::research(store.clone(), clients.clone())))
                .with_phase(Arc::new(AgentPhase::risk(store.clone(), clients.clone())))
                .with_phase(Arc::new(PortfolioPhase::new(
                    store.clone(),
                    clients.clone(),
                    DecisionEngine::new(DecisionEngineConfig::default()),
                )))
                .with_phase(Arc::new(ExecutionPhase::new(store.clone(), clients.clone()))),
        );

        Self {
            sqlite,
            store,
            brokerage,
            completion,
            clients,
            coordinator,
        }
    }

    /// Create an analysis the risk manager already ruled on
    pub async fn analysis_with_verdict(&self, ticker: &str, decision: &str, confidence: f64) -> PhaseContext {
        let new = NewAnalysis::new(ticker, USER, AnalysisOrigin::Manual);
        self.store.create_analysis(&new).await.unwrap();
        self.store
            .update_verdict(&new.id, decision, confidence)
            .await
            .unwrap();
        PhaseContext::new(&new.id, ticker, USER, settings())
    }

    pub async fn order_count(&self, analysis_id: &str) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM trade_orders WHERE analysis_id = ?1")
            .bind(analysis_id)
            .fetch_one(self.sqlite.pool())
            .await
            .unwrap()
    }
}
