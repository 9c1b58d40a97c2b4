// =============================================================================
// REST API Endpoints: Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public; everything else
// requires a valid Bearer token checked via the `AuthBearer` extractor.
//
// CORS is permissive; front the service with a proxy to restrict origins.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::components::{RegistryError, SignalComponent};
use crate::crisis::{Acknowledgement, CrisisAlert, MonitorError};
use crate::decision::ComponentScore;
use crate::learning::ComponentLearning;
use crate::regime::MarketObservation;
use crate::runtime_config::RuntimeConfig;

/// Default page size for list endpoints.
const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/status", get(status))
        .route("/api/v1/config", get(config))
        .route("/api/v1/decide", post(decide))
        .route("/api/v1/outcomes", post(outcomes))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/decisions/:id", get(decision_by_id))
        .route("/api/v1/components", get(components))
        .route("/api/v1/alerts", get(alerts))
        .route("/api/v1/observations", post(observations))
        .route("/api/v1/control/clear-override", post(control_clear_override))
        .route("/api/v1/control/component", post(control_component))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default)]
    limit: Option<usize>,
}

impl LimitQuery {
    fn resolve(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Status (authenticated)
// =============================================================================

async fn status(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.get_status())
}

/// Effective configuration. Read-only: changes take a restart.
async fn config(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(RuntimeConfig::clone(&state.runtime_config))
}

// =============================================================================
// Decisions (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct DecideRequest {
    ticker: String,
    #[serde(default)]
    scores: Vec<ComponentScore>,
}

async fn decide(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<DecideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ticker = req.ticker.trim();
    if ticker.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "ticker must not be empty"));
    }
    Ok(Json(state.decide(ticker, &req.scores)))
}

async fn decisions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.recent_decisions(query.resolve()))
}

async fn decision_by_id(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .find_decision(id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown decision {id}")))
}

// =============================================================================
// Outcomes (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct OutcomeRequest {
    decision_id: Uuid,
    reward: f64,
}

#[derive(Serialize)]
struct OutcomeResponse {
    decision_id: Uuid,
    queued: bool,
}

/// Unknown decisions are acknowledged with `queued: false`, not an error.
async fn outcomes(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<OutcomeRequest>,
) -> impl IntoResponse {
    let queued = state.report_outcome(req.decision_id, req.reward);
    (
        StatusCode::ACCEPTED,
        Json(OutcomeResponse {
            decision_id: req.decision_id,
            queued,
        }),
    )
}

// =============================================================================
// Components (authenticated)
// =============================================================================

#[derive(Serialize)]
struct ComponentView {
    #[serde(flatten)]
    component: SignalComponent,
    children: Vec<String>,
    learning: Option<ComponentLearning>,
}

async fn components(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let views: Vec<ComponentView> = state
        .registry
        .list()
        .into_iter()
        .map(|component| ComponentView {
            children: state.registry.children(&component.id),
            learning: state.learner.stats(&component.id),
            component,
        })
        .collect();
    Json(views)
}

#[derive(Deserialize)]
struct ComponentControlRequest {
    component_id: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    reactivate: bool,
}

async fn control_component(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ComponentControlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let to_api = |e: RegistryError| match e {
        RegistryError::UnknownComponent(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        other => api_error(StatusCode::BAD_REQUEST, other.to_string()),
    };

    if let Some(enabled) = req.enabled {
        state.registry.set_enabled(&req.component_id, enabled).map_err(to_api)?;
        info!(component = %req.component_id, enabled, "Component toggled via API");
    }
    if req.reactivate {
        state.registry.reactivate(&req.component_id).map_err(to_api)?;
        info!(component = %req.component_id, "Component reactivated via API");
    }

    let component = state
        .registry
        .get(&req.component_id)
        .ok_or_else(|| to_api(RegistryError::UnknownComponent(req.component_id.clone())))?;
    state.increment_version();
    Ok(Json(component))
}

// =============================================================================
// Alerts (authenticated)
// =============================================================================

#[derive(Serialize)]
struct AlertsResponse {
    active: Vec<CrisisAlert>,
    recent: Vec<CrisisAlert>,
}

async fn alerts(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(AlertsResponse {
        active: state.crisis_monitor.active_alerts(),
        recent: state.crisis_monitor.recent_alerts(query.resolve()),
    })
}

// =============================================================================
// Market observations (authenticated)
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum ObservationPayload {
    Batch(Vec<MarketObservation>),
    One(MarketObservation),
}

async fn observations(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ObservationPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = match payload {
        ObservationPayload::Batch(batch) => batch,
        ObservationPayload::One(one) => vec![one],
    };
    if batch.iter().any(|o| !o.return_pct.is_finite()) {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "return_pct must be finite",
        ));
    }

    let accepted = batch.len();
    for observation in batch {
        state.observe_market(observation);
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "accepted": accepted,
            "window": state.regime_detector.window_len(),
        })),
    ))
}

// =============================================================================
// Control: clear override (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct ClearOverrideRequest {
    #[serde(default)]
    acknowledge: bool,
    #[serde(default)]
    operator: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn control_clear_override(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClearOverrideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !req.acknowledge {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Clearing the override requires acknowledge: true",
        ));
    }

    let ack = Acknowledgement {
        operator: req.operator,
        reason: req.reason,
    };
    match state.clear_override(&ack) {
        Ok(previous) => {
            warn!(
                operator = %ack.operator,
                previous = %previous.status,
                "Override cleared via API"
            );
            Ok(Json(serde_json::json!({
                "previous": previous,
                "override_state": state.crisis_monitor.override_snapshot().status,
            })))
        }
        Err(e @ MonitorError::AcknowledgementRequired) => {
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

// =============================================================================
// Tests
// =============================================================================
