//! Near-limit scanner actor
//!
//! Periodically sweeps every opted-in user's portfolio for positions close
//! to their profit target or stop-loss, and starts an analysis for each one
//! that is not already being looked at.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::application::workflow::coordinator::WorkflowCoordinator;
use crate::application::workflow::phases::PhaseContext;
use crate::domain::entities::analysis::{AnalysisOrigin, NewAnalysis, Phase};
use crate::domain::errors::EngineError;
use crate::domain::repositories::analysis_store::{AnalysisStore, NearLimitUser};
use crate::domain::services::near_limit::scan_positions;
use crate::domain::value_objects::proximity::LimitProximity;
use crate::infrastructure::client_factory::ClientFactory;
use crate::task_runner::{run_with_circuit_breaker, CircuitBreakerConfig, TaskExit, TaskStep};

/// Channel capacity for scanner actor messages
const SCANNER_CHANNEL_CAPACITY: usize = 16;

/// Messages that can be sent to the scanner actor
#[derive(Debug)]
pub enum ScannerMessage {
    /// Run a sweep now and report it
    ScanNow {
        reply: oneshot::Sender<Result<ScanReport, EngineError>>,
    },
    Shutdown,
}

/// Why a flagged position did not get an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RecentlyAnalyzed,
    OpenBrokerageOrder,
    PendingInternalOrder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartedAnalysis {
    pub analysis_id: String,
    pub user_id: String,
    pub proximity: LimitProximity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPosition {
    pub user_id: String,
    pub symbol: String,
    pub reason: SkipReason,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub users_scanned: usize,
    /// Users with a running analysis or rebalance
    pub users_busy: Vec<String>,
    /// Users whose portfolio could not be read
    pub users_failed: Vec<String>,
    pub started: Vec<StartedAnalysis>,
    pub skipped: Vec<SkippedPosition>,
}

/// One sweep over all opted-in users
pub struct NearLimitScanner {
    store: Arc<dyn AnalysisStore>,
    clients: Arc<dyn ClientFactory>,
    coordinator: Arc<WorkflowCoordinator>,
    lookback: chrono::Duration,
}

impl NearLimitScanner {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        clients: Arc<dyn ClientFactory>,
        coordinator: Arc<WorkflowCoordinator>,
        lookback: chrono::Duration,
    ) -> Self {
        Self {
            store,
            clients,
            coordinator,
            lookback,
        }
    }

    pub async fn scan(&self) -> Result<ScanReport, EngineError> {
        let users = self.store.list_near_limit_users().await?;
        let mut report = ScanReport::default();

        for user in &users {
            report.users_scanned += 1;
            if self.store.has_active_work(&user.user_id).await? {
                debug!("User {} has work in progress, skipping", user.user_id);
                report.users_busy.push(user.user_id.clone());
                continue;
            }
            if let Err(e) = self.scan_user(user, &mut report).await {
                warn!("Near-limit scan failed for user {}: {}", user.user_id, e);
                report.users_failed.push(user.user_id.clone());
            }
        }

        info!(
            "Near-limit sweep: {} users, {} analyses started, {} positions skipped",
            report.users_scanned,
            report.started.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn scan_user(&self, user: &NearLimitUser, report: &mut ScanReport) -> Result<(), EngineError> {
        let brokerage = self.clients.brokerage(&user.settings)?;
        let snapshot = brokerage.fetch_portfolio().await?;
        let policy = self
            .store
            .read_user_policy(&user.user_id)
            .await?
            .with_overrides(&user.settings);

        let flagged = scan_positions(&snapshot.positions, &policy);
        if flagged.is_empty() {
            return Ok(());
        }

        let mut recent: HashSet<String> = self
            .store
            .tickers_analyzed_since(&user.user_id, Utc::now() - self.lookback)
            .await?;
        let internal_pending: HashSet<String> = self
            .store
            .list_pending_orders(&user.user_id)
            .await?
            .into_iter()
            .map(|p| p.symbol.to_ascii_uppercase())
            .collect();

        for proximity in flagged {
            let symbol = proximity.symbol.to_ascii_uppercase();
            let reason = if recent.contains(&symbol) {
                Some(SkipReason::RecentlyAnalyzed)
            } else if snapshot.open_orders_for(&symbol).next().is_some() {
                Some(SkipReason::OpenBrokerageOrder)
            } else if internal_pending.contains(&symbol) {
                Some(SkipReason::PendingInternalOrder)
            } else {
                None
            };

            if let Some(reason) = reason {
                debug!("Skipping {} for {}: {:?}", symbol, user.user_id, reason);
                report.skipped.push(SkippedPosition {
                    user_id: user.user_id.clone(),
                    symbol,
                    reason,
                });
                continue;
            }

            let new = NewAnalysis::new(
                &symbol,
                &user.user_id,
                AnalysisOrigin::NearLimit {
                    proximity: proximity.clone(),
                },
            );
            self.store.create_analysis(&new).await?;
            self.store
                .update_phase(&new.id, Phase::Market, &format!("Started by near-limit scan: {}", proximity.describe()))
                .await?;
            recent.insert(symbol.clone());

            info!("Starting near-limit analysis {} for {}", new.id, proximity.describe());
            let ctx = PhaseContext::new(&new.id, &symbol, &user.user_id, user.settings.clone());
            self.coordinator.spawn_from(ctx, Phase::Market);

            report.started.push(StartedAnalysis {
                analysis_id: new.id,
                user_id: user.user_id.clone(),
                proximity,
            });
        }
        Ok(())
    }
}

/// Handle to a running scanner actor
#[derive(Clone)]
pub struct ScannerHandle {
    tx: mpsc::Sender<ScannerMessage>,
}

impl ScannerHandle {
    pub async fn scan_now(&self) -> Result<ScanReport, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ScannerMessage::ScanNow { reply })
            .await
            .map_err(|_| EngineError::Other("Scanner actor is not running".to_string()))?;
        rx.await
            .map_err(|_| EngineError::Other("Scanner actor dropped the request".to_string()))?
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(ScannerMessage::Shutdown).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the scanner actor; it sweeps every `scan_interval`, starting immediately
pub fn spawn_scanner_actor(
    scanner: NearLimitScanner,
    scan_interval: Duration,
    breaker: CircuitBreakerConfig,
) -> (ScannerHandle, tokio::task::JoinHandle<TaskExit>) {
    let (tx, rx) = mpsc::channel::<ScannerMessage>(SCANNER_CHANNEL_CAPACITY);
    let scanner = Arc::new(scanner);

    let mut ticker = interval(scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let state = Arc::new(Mutex::new((ticker, rx)));

    info!("Starting near-limit scanner with interval {:?}", scan_interval);

    let handle = tokio::spawn(async move {
        let exit = run_with_circuit_breaker("near_limit_scanner", breaker, || {
            let scanner = scanner.clone();
            let state = state.clone();
            async move {
                let mut guard = state.lock().await;
                let (ticker, rx) = &mut *guard;
                tokio::select! {
                    _ = ticker.tick() => scanner
                        .scan()
                        .await
                        .map(|_| TaskStep::Continue)
                        .map_err(|e| e.to_string()),
                    msg = rx.recv() => match msg {
                        Some(ScannerMessage::ScanNow { reply }) => {
                            let result = scanner.scan().await;
                            let step = match &result {
                                Ok(_) => Ok(TaskStep::Continue),
                                Err(e) => Err(e.to_string()),
                            };
                            let _ = reply.send(result);
                            step
                        }
                        Some(ScannerMessage::Shutdown) | None => {
                            info!("Near-limit scanner shutting down");
                            Ok(TaskStep::Stop)
                        }
                    },
                }
            }
        })
        .await;

        if let TaskExit::CircuitOpen { last_error } = &exit {
            error!("Near-limit scanner stopped after repeated failures: {}", last_error);
        }
        exit
    });

    (ScannerHandle { tx }, handle)
}
