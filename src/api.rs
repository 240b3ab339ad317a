//! Health & Status API endpoints
//!
//! - GET /health  - Liveness
//! - GET /metrics - Prometheus metrics
//! - GET /status  - Ledger counts, cursors and uptime
//! - GET /pending - Unfinished relay jobs

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::ledger::{LedgerCounts, LedgerEntry, SharedLedger};
use crate::metrics;

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub ledger: SharedLedger,
    pub origin_chain_id: u64,
    pub destination_chain_id: u64,
    pub started_at: Instant,
}

#[derive(Debug, Serialize)]
pub struct ChainStatus {
    pub chain_id: u64,
    pub last_processed_block: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub transfers: LedgerCounts,
    pub origin: ChainStatus,
    pub destination: ChainStatus,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub count: usize,
    pub transfers: Vec<LedgerEntry>,
}

/// Liveness check (always returns OK if server is running)
async fn health() -> &'static str {
    "OK"
}

async fn prometheus_metrics() -> Response {
    match metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

async fn status(State(state): State<AppState>) -> Response {
    let ledger = &state.ledger;
    let result = async {
        Ok::<_, crate::error::RelayError>(StatusResponse {
            status: "ok".to_string(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            transfers: ledger.counts().await?,
            origin: ChainStatus {
                chain_id: state.origin_chain_id,
                last_processed_block: ledger.last_block(state.origin_chain_id).await?,
            },
            destination: ChainStatus {
                chain_id: state.destination_chain_id,
                last_processed_block: ledger.last_block(state.destination_chain_id).await?,
            },
        })
    }
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn pending(State(state): State<AppState>) -> Response {
    match state.ledger.unfinished().await {
        Ok(transfers) => Json(PendingResponse {
            count: transfers.len(),
            transfers,
        })
        .into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .route("/pending", get(pending))
        .with_state(state)
}

/// Start the API server (combines metrics and status endpoints)
pub async fn start_api_server(addr: SocketAddr, state: AppState) -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server started");

    metrics::UP.set(1.0);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

impl AppState {
    pub fn new(ledger: SharedLedger, origin_chain_id: u64, destination_chain_id: u64) -> Self {
        Self {
            ledger,
            origin_chain_id,
            destination_chain_id,
            started_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryLedger, TransferLedger};
    use crate::types::{EventOrigin, RelayJob};
    use alloy::primitives::{TxHash, B256};
    use std::sync::Arc;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn state_with_one_pending() -> AppState {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .record(&RelayJob::Forward {
                transfer_id: B256::repeat_byte(1),
                origin: EventOrigin {
                    chain_id: 5,
                    block_number: 10,
                    tx_hash: TxHash::repeat_byte(2),
                    log_index: 0,
                },
            })
            .await
            .unwrap();
        ledger.set_last_block(5, 10).await.unwrap();
        AppState::new(ledger, 5, 9001)
    }

    #[tokio::test]
    async fn test_status_reports_counts_and_cursors() {
        let state = state_with_one_pending().await;
        let response = status(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["transfers"]["pending"], 1);
        assert_eq!(json["origin"]["last_processed_block"], 10);
        assert!(json["destination"]["last_processed_block"].is_null());
    }

    #[tokio::test]
    async fn test_pending_lists_unfinished() {
        let state = state_with_one_pending().await;
        let response = pending(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["transfers"][0]["status"], "pending");
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await, "OK");
    }
}
