// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::path::Path;
use utoipa::ToSchema;

use crate::config::DATA_DIR_ENV;
use crate::state::AppState;

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Data directory availability (if configured).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Wallet store readability.
    pub store: String,
    /// Configured payment providers, comma separated, or "none".
    pub providers: String,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Check if the data directory exists and is accessible.
fn check_data_dir() -> Option<String> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if Path::new(&dir).exists() {
            Some("ok".to_string())
        } else {
            Some("missing".to_string())
        }
    } else {
        None
    }
}

/// Probe the wallet store with a cheap indexed read.
fn check_store(state: &AppState) -> String {
    match state.store.find_account_by_number("0000000000") {
        Ok(_) => "ok".to_string(),
        Err(_) => "unavailable".to_string(),
    }
}

fn configured_providers(state: &AppState) -> String {
    let ids = state.engine.gateways().configured();
    if ids.is_empty() {
        "none".to_string()
    } else {
        ids.iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Health check endpoint handler.
///
/// Returns 200 if all checks pass, 503 if any check fails.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let data_dir = check_data_dir();
    let store = check_store(&state);

    let data_ok = data_dir.as_ref().map(|s| s == "ok").unwrap_or(true);
    let all_ok = data_ok && store == "ok";

    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            data_dir,
            store,
            providers: configured_providers(&state),
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
/// Does not check dependencies - use readiness for that.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
///
/// Returns 200 only if all dependencies are available.
/// Use for Kubernetes readiness probes.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::providers::GatewayRegistry;
    use crate::reconcile::ReconciliationEngine;
    use crate::storage::WalletStore;

    #[tokio::test]
    async fn healthy_service_reports_ok() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(WalletStore::open(&dir.path().join("wallet.redb")).unwrap());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            GatewayRegistry::new(),
            None,
        ));
        let state = AppState::new(store, engine);

        let (status, Json(response)) = health(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, "ok");
        assert_eq!(response.checks.store, "ok");
        assert_eq!(response.checks.providers, "none");
    }
}
