//! REST API server for the eligibility chain
//!
//! Accepts an application with its two ledgers as CSV text, returns the
//! decision and report, and lets a banker regenerate the report with new
//! directives.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::EligibilityChain;
use crate::error::PipelineError;
use crate::models::{LoanApplication, PipelineOutcome, RiskTolerance};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApplicationRequest {
    pub user_id: Option<String>,
    pub application: LoanApplication,
    pub bank_csv: String,
    pub card_csv: String,
    pub risk_tolerance: Option<String>,
    pub directives: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ReportRequest {
    pub directives: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

/// Outcomes kept for report regeneration before the oldest is evicted.
pub const MAX_RETAINED_OUTCOMES: usize = 1024;

#[derive(Clone)]
pub struct ApiState {
    pub chain: Arc<EligibilityChain>,
    pub default_risk_tolerance: RiskTolerance,
    /// Outcomes of this process, keyed by application id, for regeneration.
    pub outcomes: Arc<RwLock<OutcomeCache>>,
}

impl ApiState {
    pub fn new(
        chain: Arc<EligibilityChain>,
        default_risk_tolerance: RiskTolerance,
        outcome_capacity: usize,
    ) -> Self {
        Self {
            chain,
            default_risk_tolerance,
            outcomes: Arc::new(RwLock::new(OutcomeCache::new(outcome_capacity))),
        }
    }
}

/// Insertion-ordered outcome map; the oldest application goes first once
/// capacity is reached. Replacing an existing id keeps its position.
pub struct OutcomeCache {
    capacity: usize,
    outcomes: HashMap<Uuid, PipelineOutcome>,
    order: VecDeque<Uuid>,
}

impl OutcomeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            outcomes: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, application_id: &Uuid) -> Option<&PipelineOutcome> {
        self.outcomes.get(application_id)
    }

    pub fn insert(&mut self, outcome: PipelineOutcome) {
        let id = outcome.application_id;
        if self.outcomes.insert(id, outcome).is_some() {
            return;
        }

        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.outcomes.remove(&evicted);
                debug!(application_id = %evicted, "Evicted outcome from regeneration cache");
            }
        }
    }
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::MalformedLedger(_) => StatusCode::BAD_REQUEST,
        PipelineError::Reasoning(_) | PipelineError::InvalidResponse { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: PipelineError, context: &str) -> (StatusCode, Json<ApiResponse>) {
    warn!(error = %error, "{}", context);
    (
        status_for(&error),
        Json(ApiResponse::error(format!("{}: {}", context, error))),
    )
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Application Endpoints
/// =============================

async fn submit_application(
    State(state): State<ApiState>,
    Json(req): Json<ApplicationRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-applicant");
    let risk_tolerance = req
        .risk_tolerance
        .as_deref()
        .map(RiskTolerance::parse)
        .unwrap_or(state.default_risk_tolerance);

    info!(
        user_id = %user_id,
        loan_amount = req.application.loan_amount,
        risk_tolerance = %risk_tolerance,
        "Received loan application"
    );

    match state
        .chain
        .run_from_csv(
            user_id,
            req.application,
            &req.bank_csv,
            &req.card_csv,
            risk_tolerance,
            req.directives,
        )
        .await
    {
        Ok(outcome) => {
            let response = ApiResponse::success(&outcome);
            state
                .outcomes
                .write()
                .await
                .insert(outcome);
            (StatusCode::OK, Json(response))
        }
        Err(e) => failure(e, "Application failed"),
    }
}

async fn regenerate_report(
    State(state): State<ApiState>,
    Path(application_id): Path<Uuid>,
    Json(req): Json<ReportRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(outcome) = state.outcomes.read().await.get(&application_id).cloned() else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!(
                "Unknown application {}",
                application_id
            ))),
        );
    };

    match state.chain.regenerate_report(&outcome, req.directives).await {
        Ok(updated) => {
            let response = ApiResponse::success(serde_json::json!({
                "application_id": updated.application_id,
                "final_report": updated.final_report,
                "decision": updated.decision,
                "directives": updated.directives,
            }));
            state
                .outcomes
                .write()
                .await
                .insert(updated);
            (StatusCode::OK, Json(response))
        }
        Err(e) => failure(e, "Report regeneration failed"),
    }
}

async fn list_applications(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.chain.store().list().await {
        Ok(records) => (StatusCode::OK, Json(ApiResponse::success(records))),
        Err(e) => failure(e, "Failed to list applications"),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(chain: Arc<EligibilityChain>, default_risk_tolerance: RiskTolerance) -> Router {
    routes(ApiState::new(
        chain,
        default_risk_tolerance,
        MAX_RETAINED_OUTCOMES,
    ))
}

fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/applications",
            post(submit_application).get(list_applications),
        )
        .route("/api/applications/:id/report", post(regenerate_report))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    chain: Arc<EligibilityChain>,
    default_risk_tolerance: RiskTolerance,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(chain, default_risk_tolerance);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
