// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use payvault_server::api::router;
use payvault_server::config::{self, DATA_DIR_ENV};
use payvault_server::providers::GatewayRegistry;
use payvault_server::rates::RateService;
use payvault_server::reconcile::{sweep::PendingSweeper, ReconciliationEngine};
use payvault_server::state::AppState;
use payvault_server::storage::WalletStore;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config::env_or_default("LOG_FORMAT", "pretty") == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves when a shutdown signal arrives, after cancelling background tasks.
async fn shutdown_signal(token: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    info!("shutdown signal received");
    token.cancel();
}

#[tokio::main]
async fn main() {
    init_tracing();

    // Open the embedded wallet store (balances, history, payment requests)
    let data_dir = PathBuf::from(config::env_or_default(DATA_DIR_ENV, "data"));
    std::fs::create_dir_all(&data_dir).expect("Failed to create data directory");
    let store = Arc::new(
        WalletStore::open(&data_dir.join("payvault.redb")).expect("Failed to open wallet store"),
    );

    // Providers and rates come from the environment; missing credentials
    // disable the feature rather than failing startup
    let gateways = GatewayRegistry::from_env();
    if gateways.is_empty() {
        warn!("no payment providers configured; payouts and deposits are disabled");
    } else {
        info!(providers = ?gateways.configured(), "payment providers configured");
    }
    let rates = RateService::from_env();
    if rates.is_none() {
        warn!("EXCHANGE_RATE_API_KEY not set; currency conversion is disabled");
    }

    let engine = Arc::new(ReconciliationEngine::new(store.clone(), gateways, rates));

    // Background sweep re-drives pending settlements until shutdown
    let shutdown = CancellationToken::new();
    tokio::spawn(PendingSweeper::new(engine.clone()).run(shutdown.clone()));

    let state = AppState::new(store, engine);
    let app = router(state);

    // Parse bind address
    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .expect("Failed to parse bind address");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    info!(%addr, "Payvault server listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .expect("Server failed");
}
