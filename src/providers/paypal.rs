// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! PayPal payout-network integration.
//!
//! Payouts go through the batch payouts API, which reaches email wallets,
//! bank accounts and cards behind one recipient-typed item format. Batches
//! settle asynchronously, so an initiate call normally comes back `PENDING`
//! and the sweep resolves it later. Deposits open a checkout order that the
//! payer approves in the browser; on the next status check an approved
//! order is captured and the capture result decides settlement.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::env_or_default;
use crate::ledger::Currency;
use crate::registry::PaymentDirection;

use super::{
    env_required, DepositOrder, InitiateResult, PayoutOrder, PayoutRecipient, ProviderError,
    ProviderHandle, ProviderOutcome, SettlementStatus,
};

const DEFAULT_API_BASE_URL: &str = "https://api-m.sandbox.paypal.com";

#[derive(Debug, Clone)]
pub struct PaypalClient {
    api_base_url: String,
    client_id: String,
    secret_key: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
}

impl PaypalClient {
    pub fn is_configured() -> bool {
        crate::config::env_optional("PAYPAL_CLIENT_ID").is_some()
            && crate::config::env_optional("PAYPAL_SECRET_KEY").is_some()
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let api_base_url = env_or_default("PAYPAL_BASE_URL", DEFAULT_API_BASE_URL);
        let client_id = env_required("PAYPAL_CLIENT_ID")?;
        let secret_key = env_required("PAYPAL_SECRET_KEY")?;

        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url,
            client_id,
            secret_key,
            http,
        })
    }

    pub async fn initiate_payout(
        &self,
        order: &PayoutOrder<'_>,
    ) -> Result<InitiateResult, ProviderError> {
        let (recipient_type, receiver) = recipient_fields(order.recipient);
        let note = order
            .description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Payout {}", order.request_id));

        let payload = json!({
            "sender_batch_header": {
                "sender_batch_id": order.request_id,
                "email_subject": "You have a payout from Payvault",
            },
            "items": [{
                "recipient_type": recipient_type,
                "receiver": receiver,
                "amount": {
                    "value": amount_value(order.amount, order.currency),
                    "currency": order.currency.code(),
                },
                "note": note,
                "sender_item_id": order.request_id,
            }]
        });

        let body = self
            .authorized_post_json("/v1/payments/payouts", &payload)
            .await?;

        let authority = body
            .pointer("/batch_header/payout_batch_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidResponse(
                    "payout response carries no payout_batch_id".to_string(),
                )
            })?
            .to_string();

        Ok(InitiateResult {
            authority,
            action_url: None,
            outcome: batch_outcome(&body),
        })
    }

    pub async fn initiate_deposit(
        &self,
        order: &DepositOrder<'_>,
    ) -> Result<InitiateResult, ProviderError> {
        let description = order
            .description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Wallet top-up {}", order.request_id));

        let payload = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": order.request_id,
                "description": description,
                "amount": {
                    "currency_code": order.currency.code(),
                    "value": amount_value(order.amount, order.currency),
                }
            }]
        });

        let body = self
            .authorized_post_json("/v2/checkout/orders", &payload)
            .await?;

        let authority = body
            .pointer("/id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("order response carries no id".to_string())
            })?
            .to_string();

        Ok(InitiateResult {
            authority,
            action_url: approval_link(&body),
            outcome: order_outcome(&body),
        })
    }

    /// Read the settlement state of a payout batch or checkout order.
    ///
    /// An order the payer has approved still needs a capture call before any
    /// money moves; that capture happens here so callers only ever see the
    /// canonical pending/approved/rejected vocabulary.
    pub async fn check_status(
        &self,
        handle: &ProviderHandle,
    ) -> Result<ProviderOutcome, ProviderError> {
        match handle.direction {
            PaymentDirection::Payout => {
                let path = format!("/v1/payments/payouts/{}", handle.authority);
                let body = self.authorized_get_json(&path).await?;
                Ok(batch_outcome(&body))
            }
            PaymentDirection::Deposit => {
                let path = format!("/v2/checkout/orders/{}", handle.authority);
                let body = self.authorized_get_json(&path).await?;
                let raw = order_status(&body);
                if raw == "APPROVED" {
                    let capture_path =
                        format!("/v2/checkout/orders/{}/capture", handle.authority);
                    let captured = self
                        .authorized_post_json(&capture_path, &json!({}))
                        .await?;
                    return Ok(order_outcome(&captured));
                }
                Ok(order_outcome(&body))
            }
        }
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!(
                "{}/v1/oauth2/token",
                self.api_base_url.trim_end_matches('/')
            ))
            .basic_auth(&self.client_id, Some(&self.secret_key))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!(
                "token request returned {status}: {body}"
            )));
        }

        let token_response: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("invalid token response: {e}")))?;

        if token_response.access_token.trim().is_empty() {
            return Err(ProviderError::Unavailable(
                "token response did not include access_token".to_string(),
            ));
        }

        Ok(token_response.access_token)
    }

    async fn authorized_post_json(
        &self,
        path: &str,
        payload: &Value,
    ) -> Result<Value, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!(
                "{}{}",
                self.api_base_url.trim_end_matches('/'),
                path
            ))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("POST {path} failed: {e}")))?;

        let status = response.status();
        let body = read_json_body(status, response).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(body)
    }

    async fn authorized_get_json(&self, path: &str) -> Result<Value, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!(
                "{}{}",
                self.api_base_url.trim_end_matches('/'),
                path
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("GET {path} failed: {e}")))?;

        let status = response.status();
        let body = read_json_body(status, response).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(body)
    }
}

/// Map a recipient onto the payouts API item vocabulary.
fn recipient_fields(recipient: &PayoutRecipient) -> (&'static str, String) {
    match recipient {
        PayoutRecipient::PaypalEmail { email } => ("EMAIL", email.clone()),
        PayoutRecipient::BankAccount { iban, .. } => ("IBAN", iban.clone()),
        PayoutRecipient::Card { number, .. } => ("CARD", number.clone()),
    }
}

/// Decimal amount formatted with the currency's full minor precision, the
/// way the API expects it ("25.50", not "25.5").
fn amount_value(amount: Decimal, currency: Currency) -> String {
    let mut value = amount
        .round_dp_with_strategy(currency.decimal_places(), RoundingStrategy::MidpointAwayFromZero);
    value.rescale(currency.decimal_places());
    value.to_string()
}

pub fn map_batch_status(status: &str) -> SettlementStatus {
    match status {
        "SUCCESS" | "COMPLETED" => SettlementStatus::Approved,
        "DENIED" | "FAILED" | "CANCELED" => SettlementStatus::Rejected,
        // NEW, PENDING, PROCESSING, ACKNOWLEDGED: the batch is still moving.
        _ => SettlementStatus::Pending,
    }
}

pub fn map_order_status(status: &str) -> SettlementStatus {
    match status {
        "COMPLETED" => SettlementStatus::Approved,
        "VOIDED" => SettlementStatus::Rejected,
        // CREATED, SAVED, APPROVED, PAYER_ACTION_REQUIRED: not settled yet.
        _ => SettlementStatus::Pending,
    }
}

fn batch_outcome(body: &Value) -> ProviderOutcome {
    let raw = body
        .pointer("/batch_header/batch_status")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    match map_batch_status(raw) {
        SettlementStatus::Approved => {
            let reference = body
                .pointer("/items/0/transaction_id")
                .or_else(|| body.pointer("/items/0/payout_item_id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            ProviderOutcome::approved(raw, reference)
        }
        SettlementStatus::Rejected => {
            let reason = body
                .pointer("/items/0/errors/message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("payout batch ended as {raw}"));
            ProviderOutcome::rejected(raw, reason)
        }
        SettlementStatus::Pending => ProviderOutcome::pending(raw),
    }
}

fn order_status(body: &Value) -> &str {
    body.pointer("/status")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

fn order_outcome(body: &Value) -> ProviderOutcome {
    let raw = order_status(body);
    match map_order_status(raw) {
        SettlementStatus::Approved => {
            let reference = body
                .pointer("/purchase_units/0/payments/captures/0/id")
                .and_then(Value::as_str)
                .or_else(|| body.pointer("/id").and_then(Value::as_str))
                .map(str::to_string);
            ProviderOutcome::approved(raw, reference)
        }
        SettlementStatus::Rejected => {
            ProviderOutcome::rejected(raw, format!("checkout order ended as {raw}"))
        }
        SettlementStatus::Pending => ProviderOutcome::pending(raw),
    }
}

fn approval_link(body: &Value) -> Option<String> {
    let links = body.pointer("/links")?.as_array()?;
    links.iter().find_map(|link| {
        let rel = link.get("rel").and_then(Value::as_str)?;
        if rel == "approve" || rel == "payer-action" {
            link.get("href").and_then(Value::as_str).map(str::to_string)
        } else {
            None
        }
    })
}

async fn read_json_body(
    status: StatusCode,
    response: reqwest::Response,
) -> Result<Value, ProviderError> {
    let text = response
        .text()
        .await
        .map_err(|e| ProviderError::Unavailable(format!("failed to read response body: {e}")))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
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

fn api_error(status: StatusCode, body: &Value) -> ProviderError {
    let message = body
        .pointer("/message")
        .or_else(|| body.pointer("/error_description"))
        .and_then(Value::as_str)
        .unwrap_or("unspecified API error");
    let name = body
        .pointer("/name")
        .or_else(|| body.pointer("/error"))
        .and_then(Value::as_str)
        .unwrap_or("ERROR");
    if status.is_client_error() {
        ProviderError::Rejected(format!("API refused the request ({name}): {message}"))
    } else if status.is_server_error() {
        ProviderError::Unavailable(format!("API error {status} ({name}): {message}"))
    } else {
        ProviderError::InvalidResponse(format!(
            "unexpected API response {status} ({name}): {message}"
        ))
    }
}
