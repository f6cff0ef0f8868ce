use crate::config::PoolTable;
use crate::error::PointsError;
use crate::points::compute_points;
use crate::storage::ledger::BalanceLedger;
use crate::watcher::HealthRegistry;
use alloy::primitives::Address;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct ApiState {
    pub ledger: Arc<BalanceLedger>,
    pub pools: Arc<PoolTable>,
    pub health: Arc<HealthRegistry>,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("Invalid userAddr")]
    InvalidAddress,
    #[error("Invalid userMultiplier")]
    InvalidMultiplier,
    #[error("No balances tracked for account")]
    UnknownAccount,
    #[error("Failed to calculate user points")]
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            ApiError::InvalidAddress | ApiError::InvalidMultiplier => StatusCode::BAD_REQUEST,
            ApiError::UnknownAccount => StatusCode::NOT_FOUND,
            ApiError::Internal(ref err) => {
                tracing::error!("[API] getUserPoint failed: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct UserPointQuery {
    #[serde(rename = "userAddr")]
    user_addr: String,
    #[serde(rename = "userMultiplier")]
    user_multiplier: String,
}

async fn get_user_point(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<UserPointQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let account =
        Address::from_str(query.user_addr.trim()).map_err(|_| ApiError::InvalidAddress)?;
    let multiplier: u64 = query
        .user_multiplier
        .trim()
        .parse()
        .map_err(|_| ApiError::InvalidMultiplier)?;

    let ledger = state.ledger.clone();
    let pools = state.pools.clone();
    // rusqlite is synchronous; keep it off the serving runtime threads.
    let points = tokio::task::spawn_blocking(move || {
        compute_points(&ledger, &pools, account, multiplier)
    })
    .await
    .map_err(|join| ApiError::Internal(anyhow::anyhow!("points task panicked: {join}")))?;

    match points {
        Ok(points) => Ok(Json(
            serde_json::json!({ "userPoints": points.to_string() }),
        )),
        Err(PointsError::UnknownAccount(_)) => Err(ApiError::UnknownAccount),
        Err(err) => Err(ApiError::Internal(err.into())),
    }
}

async fn get_health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let watchers = state.health.snapshot();
    let status = if state.health.any_degraded() {
        "degraded"
    } else {
        "ok"
    };
    Json(serde_json::json!({ "status": status, "watchers": watchers }))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/getUserPoint", get(get_user_point))
        .route("/health", get(get_health))
        .with_state(state)
}

/// Serve the API until the shutdown signal fires.
pub async fn serve(
    state: Arc<ApiState>,
    listen_addr: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("[API] Listening on {}", listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
