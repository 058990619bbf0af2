// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Deposit endpoints. Deposits never pre-credit: the balance moves only
//! after a definitive provider success is confirmed.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

use super::payouts::{clean_note, to_response, PaymentRequestResponse};
use crate::{
    error::ApiError,
    ledger::Currency,
    providers::ProviderId,
    reconcile::DepositInstruction,
    state::AppState,
};

/// Request body for opening a deposit.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateDepositRequest {
    /// Account to credit once the provider settles.
    pub account_id: String,
    /// Provider to collect through.
    pub provider: ProviderId,
    pub amount: Decimal,
    pub currency: Currency,
    /// Optional free-form note, forwarded to the provider.
    pub description: Option<String>,
}

/// Open a deposit with a provider.
///
/// Returns the pending request together with the provider's continuation
/// URL (gateway redirect, order approval) when the flow has one. Nothing is
/// credited until the settlement is confirmed.
#[utoipa::path(
    post,
    path = "/v1/deposits",
    tag = "Deposits",
    request_body = CreateDepositRequest,
    responses(
        (status = 201, description = "Deposit request created", body = PaymentRequestResponse),
        (status = 400, description = "Invalid amount or provider refusal"),
        (status = 404, description = "Account not found"),
        (status = 503, description = "Provider not configured or unavailable")
    )
)]
pub async fn create_deposit(
    State(state): State<AppState>,
    Json(request): Json<CreateDepositRequest>,
) -> Result<(StatusCode, Json<PaymentRequestResponse>), ApiError> {
    let record = state
        .engine
        .create_deposit(DepositInstruction {
            account_id: request.account_id,
            provider: request.provider,
            amount: request.amount,
            currency: request.currency,
            description: clean_note(request.description),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(to_response(&record))))
}

/// Confirm a deposit with its provider.
///
/// Verifies the settlement and credits the account if the provider reports
/// a definitive success. Safe to call repeatedly: once the request is
/// terminal, further confirmations return it unchanged without contacting
/// the provider. Unlike the webhook path, provider unavailability surfaces
/// here so the client can retry.
#[utoipa::path(
    post,
    path = "/v1/deposits/{request_id}/confirm",
    tag = "Deposits",
    params(
        ("request_id" = String, Path, description = "Deposit request ID")
    ),
    responses(
        (status = 200, description = "Request state after confirmation", body = PaymentRequestResponse),
        (status = 400, description = "Request is not a deposit"),
        (status = 404, description = "Request not found"),
        (status = 503, description = "Provider unavailable")
    )
)]
pub async fn confirm_deposit(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<PaymentRequestResponse>, ApiError> {
    let record = state.engine.confirm_deposit(&request_id).await?;
    Ok(Json(to_response(&record)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    use super::*;
    use crate::providers::{
        GatewayRegistry, InitiateResult, MockGateway, ProviderGateway, ProviderOutcome,
    };
    use crate::reconcile::ReconciliationEngine;
    use crate::registry::RequestStatus;
    use crate::storage::WalletStore;

    fn test_state(mock: MockGateway) -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(WalletStore::open(&dir.path().join("wallet.redb")).unwrap());
        let registry = GatewayRegistry::new().with(ProviderGateway::Mock(mock));
        let engine = Arc::new(ReconciliationEngine::new(store.clone(), registry, None));
        (dir, AppState::new(store, engine))
    }

    fn deposit_body(account_id: &str) -> CreateDepositRequest {
        CreateDepositRequest {
            account_id: account_id.to_string(),
            provider: ProviderId::Zarinpal,
            amount: dec!(50000),
            currency: Currency::IRR,
            description: None,
        }
    }

    #[tokio::test]
    async fn create_deposit_returns_continuation_url_without_crediting() {
        let mock = MockGateway::new(ProviderId::Zarinpal);
        mock.push_initiate(Ok(InitiateResult {
            authority: "A000123".to_string(),
            action_url: Some("https://gateway.example/StartPay/A000123".to_string()),
            outcome: ProviderOutcome::pending("created"),
        }));
        let (_dir, state) = test_state(mock);
        let account = state.store.create_account().unwrap();

        let (status, Json(response)) =
            create_deposit(State(state.clone()), Json(deposit_body(&account.account_id)))
                .await
                .expect("deposit creation succeeds");

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(response.status, RequestStatus::Pending);
        assert_eq!(
            response.action_url.as_deref(),
            Some("https://gateway.example/StartPay/A000123")
        );

        let balance = state.store.get_account(&account.account_id).unwrap();
        assert_eq!(balance.balance(Currency::IRR), Decimal::ZERO);
    }

    #[tokio::test]
    async fn confirm_credits_once_and_is_idempotent() {
        let mock = MockGateway::new(ProviderId::Zarinpal);
        mock.push_verify(Ok(ProviderOutcome::approved(
            "100",
            Some("ref-9".to_string()),
        )));
        let (_dir, state) = test_state(mock.clone());
        let account = state.store.create_account().unwrap();

        let (_, Json(created)) =
            create_deposit(State(state.clone()), Json(deposit_body(&account.account_id)))
                .await
                .expect("deposit creation succeeds");

        let Json(confirmed) = confirm_deposit(State(state.clone()), Path(created.request_id.clone()))
            .await
            .expect("confirmation succeeds");
        assert_eq!(confirmed.status, RequestStatus::Approved);
        assert_eq!(confirmed.provider_ref.as_deref(), Some("ref-9"));

        let Json(again) = confirm_deposit(State(state.clone()), Path(created.request_id))
            .await
            .expect("repeat confirmation succeeds");
        assert_eq!(again.status, RequestStatus::Approved);
        // The terminal short-circuit answers without consulting the provider.
        assert_eq!(mock.verify_calls(), 1);

        let balance = state.store.get_account(&account.account_id).unwrap();
        assert_eq!(balance.balance(Currency::IRR), dec!(50000));
    }

    #[tokio::test]
    async fn confirm_of_undecided_deposit_stays_pending() {
        let mock = MockGateway::new(ProviderId::Zarinpal);
        let (_dir, state) = test_state(mock);
        let account = state.store.create_account().unwrap();

        let (_, Json(created)) =
            create_deposit(State(state.clone()), Json(deposit_body(&account.account_id)))
                .await
                .expect("deposit creation succeeds");

        let Json(confirmed) = confirm_deposit(State(state.clone()), Path(created.request_id))
            .await
            .expect("confirmation succeeds");
        assert_eq!(confirmed.status, RequestStatus::Pending);

        let balance = state.store.get_account(&account.account_id).unwrap();
        assert_eq!(balance.balance(Currency::IRR), Decimal::ZERO);
    }

    #[tokio::test]
    async fn confirm_of_unknown_request_is_not_found() {
        let mock = MockGateway::new(ProviderId::Zarinpal);
        let (_dir, state) = test_state(mock);

        let error = confirm_deposit(State(state), Path("nope".to_string()))
            .await
            .expect_err("unknown request should fail");
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }
}
