use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::application::workflow::coordinator::WorkflowCoordinator;
use crate::application::workflow::phases::PhaseContext;
use crate::domain::entities::analysis::{AnalysisOrigin, AnalysisStatus, NewAnalysis, Phase};
use crate::domain::errors::EngineError;
use crate::domain::repositories::analysis_store::AnalysisStore;
use crate::domain::value_objects::api_settings::ApiSettings;
use crate::rate_limit::{rate_limit_middleware, GlobalRateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AnalysisStore>,
    pub coordinator: Arc<WorkflowCoordinator>,
}

/// Inbound portfolio-manager trigger; every field is required
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub analysis_id: Option<String>,
    pub ticker: Option<String>,
    pub user_id: Option<String>,
    pub api_settings: Option<ApiSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRequest {
    pub api_settings: ApiSettings,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub analysis_id: String,
    pub ticker: String,
    pub phase: Phase,
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Trigger bodies carry a ticker, ids and settings; anything larger is refused
const MAX_BODY_BYTES: usize = 64 * 1024;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

fn internal(e: EngineError) -> ApiError {
    warn!("Request failed: {}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Well-formed JSON with missing or mistyped fields is a validation failure
fn rejection(e: JsonRejection) -> ApiError {
    match e {
        JsonRejection::JsonDataError(e) => api_error(StatusCode::BAD_REQUEST, e.body_text()),
        other => api_error(other.status(), other.body_text()),
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("Missing required field: {}", field)))
}

/// Start (or resume) the portfolio decision for an analysis
pub async fn trigger_portfolio_manager(
    State(state): State<AppState>,
    payload: Result<Json<TriggerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let Json(request) = payload.map_err(rejection)?;

    let analysis_id = required(request.analysis_id, "analysisId")?;
    let ticker = required(request.ticker, "ticker")?.to_ascii_uppercase();
    let user_id = required(request.user_id, "userId")?;
    let settings = request
        .api_settings
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing required field: apiSettings"))?;

    match state.store.read_analysis(&analysis_id).await.map_err(internal)? {
        Some(record) if record.user_id != user_id => {
            return Err(api_error(
                StatusCode::CONFLICT,
                format!("Analysis {} belongs to another user", analysis_id),
            ));
        }
        Some(record) if record.ticker != ticker => {
            return Err(api_error(
                StatusCode::CONFLICT,
                format!("Analysis {} is for {}, not {}", analysis_id, record.ticker, ticker),
            ));
        }
        Some(_) => {}
        None => {
            let mut new = NewAnalysis::new(&ticker, &user_id, AnalysisOrigin::Manual);
            new.id = analysis_id.clone();
            state.store.create_analysis(&new).await.map_err(internal)?;
        }
    }

    info!("Portfolio manager triggered for {} ({})", analysis_id, ticker);
    let ctx = PhaseContext::new(&analysis_id, &ticker, &user_id, settings);
    state.coordinator.spawn_from(ctx, Phase::Portfolio);

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            analysis_id,
            ticker,
            phase: Phase::Portfolio,
            message: "Portfolio decision started".to_string(),
        }),
    ))
}

/// Restart a failed analysis from the phase it failed in
pub async fn retry_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
    payload: Result<Json<RetryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let Json(request) = payload.map_err(rejection)?;

    let record = state
        .store
        .read_analysis(&analysis_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Analysis {} not found", analysis_id)))?;

    if record.status != AnalysisStatus::Error {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("Analysis {} is {}, only failed analyses can be retried", analysis_id, record.status.as_str()),
        ));
    }

    let phase = record.phase.unwrap_or(Phase::Market);
    state
        .store
        .update_phase(&analysis_id, phase, &format!("Manual retry from {} phase", phase))
        .await
        .map_err(internal)?;

    info!("Retrying {} ({}) from {} phase", analysis_id, record.ticker, phase);
    let ctx = PhaseContext::new(&analysis_id, &record.ticker, &record.user_id, request.api_settings);
    state.coordinator.spawn_from(ctx, phase);

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            analysis_id,
            ticker: record.ticker,
            phase,
            message: format!("Retry started at {} phase", phase),
        }),
    ))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn router(state: AppState, limiter: GlobalRateLimiter) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/portfolio-manager", post(trigger_portfolio_manager))
        .route("/analyses/:id/retry", post(retry_analysis))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
