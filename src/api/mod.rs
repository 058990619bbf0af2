// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    ledger::{
        history::{EntryKind, EntryStatus, HistoryEntry},
        Currency,
    },
    providers::{PayoutRecipient, ProviderId},
    reconcile::SweepReport,
    registry::{PaymentDirection, RequestStatus},
    state::AppState,
};

pub mod accounts;
pub mod deposits;
pub mod health;
pub mod payouts;
pub mod webhooks;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/transfer", post(accounts::transfer))
        .route("/accounts/convert", post(accounts::convert))
        .route("/accounts/{account_id}/balance", get(accounts::get_balance))
        .route("/accounts/{account_id}/history", get(accounts::get_history))
        .route(
            "/payouts",
            post(payouts::create_payout).get(payouts::list_payouts),
        )
        .route("/payouts/verify", get(payouts::verify_payout))
        .route("/payouts/{request_id}", get(payouts::get_payout))
        .route("/deposits", post(deposits::create_deposit))
        .route(
            "/deposits/{request_id}/confirm",
            post(deposits::confirm_deposit),
        )
        .route("/webhooks/payments", post(webhooks::payment_notification))
        .route("/providers", get(payouts::list_providers))
        .route("/sweep", post(payouts::run_sweep))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        accounts::create_account,
        accounts::get_balance,
        accounts::get_history,
        accounts::transfer,
        accounts::convert,
        payouts::create_payout,
        payouts::get_payout,
        payouts::list_payouts,
        payouts::verify_payout,
        payouts::list_providers,
        payouts::run_sweep,
        deposits::create_deposit,
        deposits::confirm_deposit,
        webhooks::payment_notification,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            Currency,
            ProviderId,
            PayoutRecipient,
            PaymentDirection,
            RequestStatus,
            HistoryEntry,
            EntryKind,
            EntryStatus,
            SweepReport,
            accounts::AccountResponse,
            accounts::HistoryListResponse,
            accounts::TransferRequest,
            accounts::TransferResponse,
            accounts::ConvertRequest,
            accounts::ConvertResponse,
            payouts::CreatePayoutRequest,
            payouts::PaymentRequestResponse,
            payouts::PaymentRequestListResponse,
            payouts::ProviderSummary,
            payouts::ProviderListResponse,
            deposits::CreateDepositRequest,
            webhooks::PaymentNotification,
            webhooks::NotificationAck,
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks
        )
    ),
    tags(
        (name = "Accounts", description = "Account opening, balances, history, transfers, conversions"),
        (name = "Payouts", description = "Provider payouts and settlement reconciliation"),
        (name = "Deposits", description = "Provider deposits"),
        (name = "Webhooks", description = "Inbound provider notifications"),
        (name = "Health", description = "Service health probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::providers::GatewayRegistry;
    use crate::reconcile::ReconciliationEngine;
    use crate::storage::WalletStore;

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(WalletStore::open(&dir.path().join("wallet.redb")).unwrap());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            GatewayRegistry::new(),
            None,
        ));
        let app = router(AppState::new(store, engine));
        // Ensure the router can be converted into a service without panicking.
        let _ = app.into_make_service();
    }
}
