//! Redemption HTTP API
//!
//! Endpoint the registration website calls with the code a user typed in.
//!
//! ```text
//! GET  /health            → {"status":"ok","version":...}
//! POST /api/codes/redeem  → 200 record | 404 invalid_code | 401 unauthorized
//! ```

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::codes::CodeManager;
use crate::users::UserDirectory;

const API_KEY_HEADER: &str = "x-api-key";

/// Shared state for API handlers
pub struct ApiState {
    pub codes: CodeManager,
    pub users: UserDirectory,
    /// Expected `x-api-key` value; `None` disables the check
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub code: String,
    pub user_id: i64,
    pub telegram_username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
}

fn error(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

/// Build the router with all routes and middleware
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/codes/redeem", post(redeem))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /api/codes/redeem
async fn redeem(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<RedeemRequest>,
) -> Response {
    if let Some(expected) = &state.api_key {
        let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            warn!("Redeem request rejected: bad or missing API key");
            return error(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    }

    let code = request.code.trim().to_string();
    let Some(record) = state.codes.redeem(&code) else {
        return error(StatusCode::NOT_FOUND, "invalid_code");
    };

    if !state.users.mark_verified(record.user_id) {
        warn!("Redeemed code {} belongs to unknown user {}", code, record.user_id);
    }
    info!("Code redeemed via API for user {}", record.user_id);

    Json(RedeemResponse {
        code,
        user_id: record.user_id,
        telegram_username: record.telegram_username,
        created_at: record.created_at,
        expires_at: record.expires_at,
        used: record.used,
        used_at: record.used_at,
    })
    .into_response()
}

/// Bind and serve until Ctrl-C
pub async fn serve(addr: SocketAddr, state: Arc<ApiState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Redemption API listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Redemption API shut down");
    Ok(())
}
