// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Stripe card-processor integration.
//!
//! Payouts ride the balance payout API, deposits open a payment intent and
//! settle asynchronously. Neither flow hands the user a redirect URL here;
//! callers poll status through `check_status`. All calls are form-encoded
//! with bearer auth, and initiates carry an `Idempotency-Key` so a retried
//! request cannot move money twice.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::env_or_default;
use crate::ledger::{to_minor_units, Currency};
use crate::registry::PaymentDirection;

use super::{
    env_required, DepositOrder, InitiateResult, PayoutOrder, PayoutRecipient, ProviderError,
    ProviderHandle, ProviderOutcome, SettlementStatus,
};

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

#[derive(Debug, Clone)]
pub struct StripeClient {
    api_base_url: String,
    secret_key: String,
    http: Client,
}

impl StripeClient {
    pub fn is_configured() -> bool {
        crate::config::env_optional("STRIPE_SECRET_KEY").is_some()
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let api_base_url = env_or_default("STRIPE_BASE_URL", DEFAULT_API_BASE_URL);
        let secret_key = env_required("STRIPE_SECRET_KEY")?;

        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url,
            secret_key,
            http,
        })
    }

    pub async fn initiate_payout(
        &self,
        order: &PayoutOrder<'_>,
    ) -> Result<InitiateResult, ProviderError> {
        if matches!(order.recipient, PayoutRecipient::PaypalEmail { .. }) {
            return Err(ProviderError::Rejected(
                "Stripe payouts require a bank account or card destination".to_string(),
            ));
        }

        let amount_minor = minor_units(order.amount, order.currency)?;
        let description = order
            .description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Payout {}", order.request_id));

        let form = [
            ("amount", amount_minor.to_string()),
            ("currency", order.currency.code().to_lowercase()),
            ("description", description),
            ("statement_descriptor", "PAYVAULT".to_string()),
            ("metadata[request_id]", order.request_id.to_string()),
            ("metadata[destination]", order.recipient.reference()),
        ];

        let url = format!("{}/v1/payouts", self.api_base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", order.request_id)
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("payout request failed: {e}")))?;

        let status = response.status();
        let body = read_json_body(status, response).await?;
        let id = require_object_id(status, &body)?;
        let outcome = payout_outcome(&body);

        Ok(InitiateResult {
            authority: id,
            action_url: None,
            outcome,
        })
    }

    pub async fn initiate_deposit(
        &self,
        order: &DepositOrder<'_>,
    ) -> Result<InitiateResult, ProviderError> {
        let amount_minor = minor_units(order.amount, order.currency)?;
        let description = order
            .description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Wallet top-up {}", order.request_id));

        let form = [
            ("amount", amount_minor.to_string()),
            ("currency", order.currency.code().to_lowercase()),
            ("description", description),
            ("metadata[request_id]", order.request_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let url = format!(
            "{}/v1/payment_intents",
            self.api_base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", order.request_id)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                ProviderError::Unavailable(format!("payment intent request failed: {e}"))
            })?;

        let status = response.status();
        let body = read_json_body(status, response).await?;
        let id = require_object_id(status, &body)?;
        let outcome = intent_outcome(&body);

        Ok(InitiateResult {
            authority: id,
            action_url: None,
            outcome,
        })
    }

    /// Read the current settlement state of a payout or payment intent.
    pub async fn check_status(
        &self,
        handle: &ProviderHandle,
    ) -> Result<ProviderOutcome, ProviderError> {
        let base = self.api_base_url.trim_end_matches('/');
        let url = match handle.direction {
            PaymentDirection::Payout => format!("{base}/v1/payouts/{}", handle.authority),
            PaymentDirection::Deposit => format!("{base}/v1/payment_intents/{}", handle.authority),
        };

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("status request failed: {e}")))?;

        let status = response.status();
        let body = read_json_body(status, response).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(match handle.direction {
            PaymentDirection::Payout => payout_outcome(&body),
            PaymentDirection::Deposit => intent_outcome(&body),
        })
    }
}

fn minor_units(amount: Decimal, currency: Currency) -> Result<u64, ProviderError> {
    to_minor_units(amount, currency).ok_or_else(|| {
        ProviderError::Rejected(format!(
            "amount {amount} is not representable in {currency} minor units"
        ))
    })
}

pub fn map_payout_status(status: &str) -> SettlementStatus {
    match status {
        "paid" => SettlementStatus::Approved,
        "failed" | "canceled" => SettlementStatus::Rejected,
        // "pending" and "in_transit" mean the transfer is still moving.
        _ => SettlementStatus::Pending,
    }
}

pub fn map_intent_status(status: &str) -> SettlementStatus {
    match status {
        "succeeded" => SettlementStatus::Approved,
        "canceled" => SettlementStatus::Rejected,
        // requires_payment_method, requires_action, processing and friends
        // all mean the customer has not finished paying yet.
        _ => SettlementStatus::Pending,
    }
}

fn payout_outcome(body: &Value) -> ProviderOutcome {
    let raw = body
        .pointer("/status")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    match map_payout_status(raw) {
        SettlementStatus::Approved => {
            let reference = body
                .pointer("/balance_transaction")
                .and_then(Value::as_str)
                .or_else(|| body.pointer("/id").and_then(Value::as_str))
                .map(str::to_string);
            ProviderOutcome::approved(raw, reference)
        }
        SettlementStatus::Rejected => {
            let reason = body
                .pointer("/failure_message")
                .and_then(Value::as_str)
                .unwrap_or("payout did not complete");
            ProviderOutcome::rejected(raw, reason)
        }
        SettlementStatus::Pending => ProviderOutcome::pending(raw),
    }
}

fn intent_outcome(body: &Value) -> ProviderOutcome {
    let raw = body
        .pointer("/status")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    match map_intent_status(raw) {
        SettlementStatus::Approved => {
            let reference = body
                .pointer("/latest_charge")
                .and_then(Value::as_str)
                .or_else(|| body.pointer("/id").and_then(Value::as_str))
                .map(str::to_string);
            ProviderOutcome::approved(raw, reference)
        }
        SettlementStatus::Rejected => {
            let reason = body
                .pointer("/last_payment_error/message")
                .or_else(|| body.pointer("/cancellation_reason"))
                .and_then(Value::as_str)
                .unwrap_or("payment was canceled");
            ProviderOutcome::rejected(raw, reason)
        }
        SettlementStatus::Pending => ProviderOutcome::pending(raw),
    }
}

async fn read_json_body(
    status: StatusCode,
    response: reqwest::Response,
) -> Result<Value, ProviderError> {
    let text = response
        .text()
        .await
        .map_err(|e| ProviderError::Unavailable(format!("failed to read response body: {e}")))?;
    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(_) if !status.is_success() => Err(ProviderError::Unavailable(format!(
            "API returned {status}: {text}"
        ))),
        Err(e) => Err(ProviderError::InvalidResponse(format!(
            "API returned invalid JSON ({status}): {e}"
        ))),
    }
}

fn require_object_id(status: StatusCode, body: &Value) -> Result<String, ProviderError> {
    if let Some(id) = body.pointer("/id").and_then(Value::as_str) {
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }
    Err(api_error(status, body))
}

fn api_error(status: StatusCode, body: &Value) -> ProviderError {
    let message = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("unspecified API error");
    if status.is_client_error() {
        ProviderError::Rejected(format!("API refused the request: {message}"))
    } else if status.is_server_error() {
        ProviderError::Unavailable(format!("API error ({status}): {message}"))
    } else {
        ProviderError::InvalidResponse(format!("unexpected API response ({status}): {message}"))
    }
}
