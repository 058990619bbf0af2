// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Account endpoints: opening, balances, history, transfers, conversions.

use std::collections::BTreeMap;

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
    ledger::{account::AccountRecord, history::HistoryEntry, Currency},
    state::AppState,
};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

/// Account representation returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AccountResponse {
    /// Account ID.
    pub account_id: String,
    /// Short numeric address other accounts transfer to.
    pub account_number: String,
    /// Balance per currency.
    pub balances: BTreeMap<Currency, Decimal>,
    /// Creation time.
    pub created_at: String,
    /// Last balance mutation time.
    pub updated_at: String,
}

/// History listing response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryListResponse {
    /// Account the entries belong to.
    pub account_id: String,
    /// Entries, newest first.
    pub entries: Vec<HistoryEntry>,
    /// Number of entries returned.
    pub total: usize,
}

/// Query params for history listing.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Maximum number of entries to return (default 50, capped at 500).
    pub limit: Option<usize>,
}

/// Request body for an internal transfer.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TransferRequest {
    /// Account to debit.
    pub sender_account_id: String,
    /// Receiver's account *number*, not their account ID.
    pub receiver_account_number: String,
    pub currency: Currency,
    pub amount: Decimal,
}

/// Transfer receipt returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransferResponse {
    pub sender_account_id: String,
    pub receiver_account_id: String,
    pub receiver_account_number: String,
    pub currency: Currency,
    pub amount: Decimal,
    /// Sender's balance in `currency` after the transfer.
    pub sender_balance: Decimal,
}

/// Request body for a currency conversion.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConvertRequest {
    pub account_id: String,
    pub from_currency: Currency,
    pub to_currency: Currency,
    /// Amount to convert, denominated in `from_currency`.
    pub amount: Decimal,
}

/// Conversion receipt returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConvertResponse {
    pub account_id: String,
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub debited: Decimal,
    pub credited: Decimal,
    /// Exchange rate applied, quoted at conversion time.
    pub rate: Decimal,
    pub from_balance: Decimal,
    pub to_balance: Decimal,
}

fn to_account_response(record: &AccountRecord) -> AccountResponse {
    AccountResponse {
        account_id: record.account_id.clone(),
        account_number: record.account_number.clone(),
        balances: record.balances.clone(),
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }
}

/// Open a new account.
///
/// Every account starts with a zero balance in each supported currency and
/// a generated ten-digit account number usable as a transfer address.
#[utoipa::path(
    post,
    path = "/v1/accounts",
    tag = "Accounts",
    responses(
        (status = 201, description = "Account created", body = AccountResponse)
    )
)]
pub async fn create_account(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let record = state.store.create_account()?;
    Ok((StatusCode::CREATED, Json(to_account_response(&record))))
}

/// Get the balances of an account.
#[utoipa::path(
    get,
    path = "/v1/accounts/{account_id}/balance",
    tag = "Accounts",
    params(
        ("account_id" = String, Path, description = "Account ID")
    ),
    responses(
        (status = 200, description = "Current balances", body = AccountResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn get_balance(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let record = state.store.get_account(&account_id)?;
    Ok(Json(to_account_response(&record)))
}

/// List an account's balance history, newest first.
///
/// Every balance mutation has exactly one entry here, including pending
/// payout reservations whose status is later corrected in place.
#[utoipa::path(
    get,
    path = "/v1/accounts/{account_id}/history",
    tag = "Accounts",
    params(
        ("account_id" = String, Path, description = "Account ID"),
        HistoryQuery
    ),
    responses(
        (status = 200, description = "History entries", body = HistoryListResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn get_history(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryListResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let entries = state.store.list_history(&account_id, limit)?;
    Ok(Json(HistoryListResponse {
        account_id,
        total: entries.len(),
        entries,
    }))
}

/// Transfer funds to another local account by account number.
///
/// Both legs commit atomically; self-transfers are rejected.
#[utoipa::path(
    post,
    path = "/v1/accounts/transfer",
    tag = "Accounts",
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Transfer committed", body = TransferResponse),
        (status = 400, description = "Insufficient funds, invalid amount, or self-transfer"),
        (status = 404, description = "Sender or receiver not found")
    )
)]
pub async fn transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let receipt = state.engine.transfer(
        &request.sender_account_id,
        &request.receiver_account_number,
        request.currency,
        request.amount,
    )?;
    Ok(Json(TransferResponse {
        sender_account_id: receipt.sender_account_id,
        receiver_account_id: receipt.receiver_account_id,
        receiver_account_number: receipt.receiver_account_number,
        currency: receipt.currency,
        amount: receipt.amount,
        sender_balance: receipt.sender_balance,
    }))
}

/// Convert between two currency balances of one account.
///
/// The exchange rate is quoted live at conversion time; when no rate source
/// is configured or the quote fails, nothing is debited.
#[utoipa::path(
    post,
    path = "/v1/accounts/convert",
    tag = "Accounts",
    request_body = ConvertRequest,
    responses(
        (status = 200, description = "Conversion committed", body = ConvertResponse),
        (status = 400, description = "Insufficient funds or invalid conversion"),
        (status = 404, description = "Account not found"),
        (status = 503, description = "Exchange-rate service unavailable")
    )
)]
pub async fn convert(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let receipt = state
        .engine
        .convert(
            &request.account_id,
            request.from_currency,
            request.to_currency,
            request.amount,
        )
        .await?;
    Ok(Json(ConvertResponse {
        account_id: receipt.account_id,
        from_currency: receipt.from_currency,
        to_currency: receipt.to_currency,
        debited: receipt.debited,
        credited: receipt.credited,
        rate: receipt.rate,
        from_balance: receipt.from_balance,
        to_balance: receipt.to_balance,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    use super::*;
    use crate::providers::{GatewayRegistry, ProviderId, ProviderOutcome};
    use crate::reconcile::ReconciliationEngine;
    use crate::registry::StoredPaymentRequest;
    use crate::storage::WalletStore;

    fn test_state() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(WalletStore::open(&dir.path().join("wallet.redb")).unwrap());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            GatewayRegistry::new(),
            None,
        ));
        (dir, AppState::new(store, engine))
    }

    fn seed_balance(store: &WalletStore, account_id: &str, currency: Currency, amount: Decimal) {
        let mut request = StoredPaymentRequest::new_deposit(
            account_id.to_string(),
            ProviderId::Paypal,
            amount,
            currency,
            None,
        );
        request.authority = Some(format!("seed-{}", request.request_id));
        store.insert_deposit(&request).expect("insert seed deposit");
        let outcome = ProviderOutcome::approved("seed", None);
        store
            .finalize(&request.request_id, &outcome)
            .expect("finalize seed deposit");
    }

    #[tokio::test]
    async fn create_account_starts_empty() {
        let (_dir, state) = test_state();

        let (status, Json(account)) = create_account(State(state.clone()))
            .await
            .expect("account creation succeeds");

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(account.account_number.len(), 10);
        for currency in Currency::ALL {
            assert_eq!(account.balances[&currency], Decimal::ZERO);
        }

        let Json(fetched) = get_balance(State(state), Path(account.account_id.clone()))
            .await
            .expect("balance lookup succeeds");
        assert_eq!(fetched.account_id, account.account_id);
    }

    #[tokio::test]
    async fn balance_of_unknown_account_is_not_found() {
        let (_dir, state) = test_state();
        let error = get_balance(State(state), Path("nope".to_string()))
            .await
            .expect_err("unknown account should fail");
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn transfer_moves_funds_and_shows_in_history() {
        let (_dir, state) = test_state();
        let sender = state.store.create_account().unwrap();
        let receiver = state.store.create_account().unwrap();
        seed_balance(&state.store, &sender.account_id, Currency::USD, dec!(40.00));

        let Json(receipt) = transfer(
            State(state.clone()),
            Json(TransferRequest {
                sender_account_id: sender.account_id.clone(),
                receiver_account_number: receiver.account_number.clone(),
                currency: Currency::USD,
                amount: dec!(15.00),
            }),
        )
        .await
        .expect("transfer succeeds");

        assert_eq!(receipt.sender_balance, dec!(25.00));
        assert_eq!(receipt.receiver_account_id, receiver.account_id);

        let Json(history) = get_history(
            State(state),
            Path(receiver.account_id.clone()),
            Query(HistoryQuery { limit: None }),
        )
        .await
        .expect("history lookup succeeds");
        assert_eq!(history.total, 1);
        assert_eq!(history.entries[0].amount, dec!(15.00));
    }

    #[tokio::test]
    async fn conversion_without_rate_service_is_unavailable() {
        let (_dir, state) = test_state();
        let account = state.store.create_account().unwrap();
        seed_balance(&state.store, &account.account_id, Currency::USD, dec!(10.00));

        let error = convert(
            State(state),
            Json(ConvertRequest {
                account_id: account.account_id,
                from_currency: Currency::USD,
                to_currency: Currency::GBP,
                amount: dec!(5.00),
            }),
        )
        .await
        .expect_err("conversion without a rate source should fail");
        assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
