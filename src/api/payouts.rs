// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Payout endpoints: creation, lookup, redirect-return verification,
//! provider discovery, and the manual sweep trigger.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::ApiError,
    ledger::Currency,
    providers::{PayoutRecipient, ProviderId},
    reconcile::{PayoutInstruction, SweepReport},
    registry::{PaymentDirection, RequestStatus, StoredPaymentRequest},
    state::AppState,
};

/// Request body for creating a payout.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreatePayoutRequest {
    /// Account to debit.
    pub account_id: String,
    /// Provider to pay out through.
    pub provider: ProviderId,
    pub amount: Decimal,
    pub currency: Currency,
    /// Where the funds should land. Cleaned and validated before any
    /// reservation is made.
    pub recipient: PayoutRecipient,
    /// Optional free-form note, forwarded to the provider.
    pub description: Option<String>,
}

/// Payment request representation returned to clients.
///
/// The recipient appears only as its masked ledger reference; raw card
/// numbers never leave the server.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentRequestResponse {
    pub request_id: String,
    pub account_id: String,
    pub direction: PaymentDirection,
    pub provider: ProviderId,
    pub amount: Decimal,
    pub currency: Currency,
    /// Masked recipient reference (IBAN, `CARD-<last4>`, `PAYPAL-<email>`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Provider-issued tracking identifier. Absent while an initiate retry
    /// is still owed to the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    /// URL the end user must visit to continue the provider flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub status: RequestStatus,
    /// Settlement receipt reported by the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// List response for payment requests.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentRequestListResponse {
    pub requests: Vec<PaymentRequestResponse>,
    pub total: usize,
}

/// Query params for listing payment requests.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct PayoutListQuery {
    /// Account whose requests to list.
    pub account_id: String,
    /// Optional direction filter (`payout` or `deposit`).
    pub direction: Option<PaymentDirection>,
}

/// Query params of the provider redirect return.
///
/// Zarinpal sends these capitalized (`Authority`, `Status`); both spellings
/// are accepted.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct VerifyReturnQuery {
    /// Provider-issued tracking identifier.
    #[serde(alias = "Authority")]
    pub authority: String,
    /// Gateway result hint (`OK` or `NOK`). Logged, never trusted; the
    /// provider's verify endpoint decides the outcome.
    #[serde(alias = "Status")]
    pub status: Option<String>,
}

/// One configured provider and its capabilities.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProviderSummary {
    /// Stable provider ID used by API requests.
    pub provider_id: ProviderId,
    /// Human-friendly provider name for UI display.
    pub display_name: String,
    /// Currencies this provider settles in.
    pub currencies: Vec<Currency>,
    /// Payout recipient kinds this provider accepts.
    pub recipient_kinds: Vec<String>,
}

/// Response for provider discovery.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProviderListResponse {
    /// Providers currently configured on this deployment.
    pub providers: Vec<ProviderSummary>,
    /// Whether currency conversion is available (a rate source is configured).
    pub conversion_enabled: bool,
}

pub(super) fn to_response(record: &StoredPaymentRequest) -> PaymentRequestResponse {
    PaymentRequestResponse {
        request_id: record.request_id.clone(),
        account_id: record.account_id.clone(),
        direction: record.direction,
        provider: record.provider,
        amount: record.amount,
        currency: record.currency,
        recipient: record.recipient.as_ref().map(PayoutRecipient::reference),
        authority: record.authority.clone(),
        action_url: record.action_url.clone(),
        status: record.status,
        provider_ref: record.provider_ref.clone(),
        failure_reason: record.failure_reason.clone(),
        description: record.description.clone(),
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }
}

pub(super) fn clean_note(note: Option<String>) -> Option<String> {
    note.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

/// Create a payout.
///
/// The amount is debited and reserved before the provider is contacted. A
/// definitive provider refusal reverses the reservation and fails the call;
/// a transient provider failure returns the request still pending, without
/// an authority, and the periodic sweep retries the submission.
#[utoipa::path(
    post,
    path = "/v1/payouts",
    tag = "Payouts",
    request_body = CreatePayoutRequest,
    responses(
        (status = 201, description = "Payout request created", body = PaymentRequestResponse),
        (status = 400, description = "Invalid amount or recipient, insufficient funds, or provider refusal"),
        (status = 404, description = "Account not found"),
        (status = 503, description = "Provider not configured")
    )
)]
pub async fn create_payout(
    State(state): State<AppState>,
    Json(request): Json<CreatePayoutRequest>,
) -> Result<(StatusCode, Json<PaymentRequestResponse>), ApiError> {
    let record = state
        .engine
        .request_payout(PayoutInstruction {
            account_id: request.account_id,
            provider: request.provider,
            amount: request.amount,
            currency: request.currency,
            recipient: request.recipient,
            description: clean_note(request.description),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(to_response(&record))))
}

/// Fetch one payment request by ID.
#[utoipa::path(
    get,
    path = "/v1/payouts/{request_id}",
    tag = "Payouts",
    params(
        ("request_id" = String, Path, description = "Payment request ID")
    ),
    responses(
        (status = 200, description = "Payment request", body = PaymentRequestResponse),
        (status = 404, description = "Request not found")
    )
)]
pub async fn get_payout(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<PaymentRequestResponse>, ApiError> {
    let record = state.store.get_request(&request_id)?;
    Ok(Json(to_response(&record)))
}

/// List an account's payment requests, newest first.
#[utoipa::path(
    get,
    path = "/v1/payouts",
    tag = "Payouts",
    params(PayoutListQuery),
    responses(
        (status = 200, description = "Payment requests", body = PaymentRequestListResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn list_payouts(
    State(state): State<AppState>,
    Query(query): Query<PayoutListQuery>,
) -> Result<Json<PaymentRequestListResponse>, ApiError> {
    // Distinguishes "no such account" from "no requests yet".
    let _ = state.store.get_account(&query.account_id)?;
    let requests: Vec<PaymentRequestResponse> = state
        .store
        .list_requests_for_account(&query.account_id)?
        .iter()
        .filter(|record| query.direction.is_none_or(|d| record.direction == d))
        .map(to_response)
        .collect();
    Ok(Json(PaymentRequestListResponse {
        total: requests.len(),
        requests,
    }))
}

/// Settle a payment after the user returned from the provider redirect.
///
/// The gateway's `Status` parameter rides an unsigned redirect and is only
/// logged; the outcome is decided by verifying with the provider. A payment
/// the user canceled verifies as a definitive rejection, which reverses the
/// reservation in this call.
#[utoipa::path(
    get,
    path = "/v1/payouts/verify",
    tag = "Payouts",
    params(VerifyReturnQuery),
    responses(
        (status = 200, description = "Request state after verification", body = PaymentRequestResponse),
        (status = 404, description = "Unknown authority")
    )
)]
pub async fn verify_payout(
    State(state): State<AppState>,
    Query(query): Query<VerifyReturnQuery>,
) -> Result<Json<PaymentRequestResponse>, ApiError> {
    let record = state
        .engine
        .verify_by_authority(&query.authority, query.status.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("No payment request with this authority"))?;
    Ok(Json(to_response(&record)))
}

/// List configured providers and their capabilities.
#[utoipa::path(
    get,
    path = "/v1/providers",
    tag = "Payouts",
    responses(
        (status = 200, description = "Configured providers", body = ProviderListResponse)
    )
)]
pub async fn list_providers(State(state): State<AppState>) -> Json<ProviderListResponse> {
    let registry = state.engine.gateways();
    let providers = registry
        .configured()
        .into_iter()
        .filter_map(|id| registry.get(id))
        .map(|gateway| ProviderSummary {
            provider_id: gateway.id(),
            display_name: gateway.id().display_name().to_string(),
            currencies: Currency::ALL
                .iter()
                .copied()
                .filter(|currency| gateway.supports_currency(*currency))
                .collect(),
            recipient_kinds: gateway
                .recipient_kinds()
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
        .collect();
    Json(ProviderListResponse {
        providers,
        conversion_enabled: state.engine.conversion_enabled(),
    })
}

/// Run one reconciliation sweep pass now.
///
/// Consults the provider for every eligible pending request, exactly as the
/// periodic sweep does. When a sweep is already in flight the report comes
/// back with `ran = false` and nothing is consulted twice.
#[utoipa::path(
    post,
    path = "/v1/sweep",
    tag = "Payouts",
    responses(
        (status = 200, description = "Sweep statistics", body = SweepReport)
    )
)]
pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    let report = state.engine.sweep_pending().await?;
    Ok(Json(report))
}
