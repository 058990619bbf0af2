// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Zarinpal sandbox integration for Iranian Rial payments.
//!
//! The Rial rail is redirect-based for payouts and deposits alike: an
//! initiate call returns an authority plus a StartPay URL, the end user
//! completes the flow in the browser, and settlement is decided by the
//! verify endpoint. Verification is authoritative; the `Status` query
//! parameter on the redirect is only a hint.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::config::env_or_default;
use crate::ledger::{to_minor_units, Currency};

use super::{
    env_required, DepositOrder, InitiateResult, PayoutOrder, PayoutRecipient, ProviderError,
    ProviderHandle, ProviderOutcome, SettlementStatus,
};

const DEFAULT_BASE_URL: &str = "https://sandbox.zarinpal.com";
const DEFAULT_CALLBACK_URL: &str = "http://localhost:8080/v1/payouts/verify";

/// Verify code for a freshly settled payment.
const CODE_VERIFIED: i64 = 100;
/// Verify code for a payment that was already verified earlier. Still a
/// success; repeating verification must not fail the payment.
const CODE_ALREADY_VERIFIED: i64 = 101;

#[derive(Debug, Clone)]
pub struct ZarinpalClient {
    base_url: String,
    merchant_id: String,
    callback_url: String,
    http: Client,
}

impl ZarinpalClient {
    pub fn is_configured() -> bool {
        crate::config::env_optional("ZARINPAL_MERCHANT_ID").is_some()
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let base_url = env_or_default("ZARINPAL_BASE_URL", DEFAULT_BASE_URL);
        let merchant_id = env_required("ZARINPAL_MERCHANT_ID")?;
        let callback_url = env_or_default("ZARINPAL_CALLBACK_URL", DEFAULT_CALLBACK_URL);

        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            merchant_id,
            callback_url,
            http,
        })
    }

    pub async fn initiate_payout(
        &self,
        order: &PayoutOrder<'_>,
    ) -> Result<InitiateResult, ProviderError> {
        // The Rial rail only reaches Iranian bank accounts.
        match order.recipient {
            PayoutRecipient::BankAccount { iban, .. } if iban.starts_with("IR") => {}
            PayoutRecipient::BankAccount { .. } => {
                return Err(ProviderError::Rejected(
                    "Zarinpal payouts require an Iranian IBAN".to_string(),
                ));
            }
            _ => {
                return Err(ProviderError::Rejected(
                    "Zarinpal payouts only support bank accounts".to_string(),
                ));
            }
        }

        let description = order
            .description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Payout {}", order.request_id));
        self.request_payment(order.request_id, order.amount, order.currency, &description)
            .await
    }

    pub async fn initiate_deposit(
        &self,
        order: &DepositOrder<'_>,
    ) -> Result<InitiateResult, ProviderError> {
        let description = order
            .description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Wallet top-up {}", order.request_id));
        self.request_payment(order.request_id, order.amount, order.currency, &description)
            .await
    }

    async fn request_payment(
        &self,
        request_id: &str,
        amount: Decimal,
        currency: Currency,
        description: &str,
    ) -> Result<InitiateResult, ProviderError> {
        let amount_rial = to_minor_units(amount, currency).ok_or_else(|| {
            ProviderError::Rejected(format!("amount {amount} is not representable in Rial"))
        })?;

        let payload = json!({
            "merchant_id": self.merchant_id,
            "amount": amount_rial,
            "currency": "IRR",
            "description": description,
            "callback_url": self.callback_url,
            "metadata": { "order_id": request_id }
        });

        let url = format!(
            "{}/pg/v4/payment/request.json",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("payment request failed: {e}")))?;

        let status = response.status();
        let body = read_json_body(status, response).await?;
        let authority = parse_initiate_body(status, &body)?;
        let action_url = start_pay_url(&self.base_url, &authority);

        Ok(InitiateResult {
            authority,
            action_url: Some(action_url),
            outcome: ProviderOutcome::pending("requested"),
        })
    }

    /// Verify a settlement with the gateway.
    ///
    /// Zarinpal answers with a business code even for unpaid sessions, so a
    /// non-success code here is a definitive rejection, not an error.
    pub async fn verify(&self, handle: &ProviderHandle) -> Result<ProviderOutcome, ProviderError> {
        let amount_rial = to_minor_units(handle.amount, handle.currency).ok_or_else(|| {
            ProviderError::InvalidResponse(format!(
                "stored amount {} is not representable in Rial",
                handle.amount
            ))
        })?;

        let payload = json!({
            "merchant_id": self.merchant_id,
            "amount": amount_rial,
            "authority": handle.authority,
        });

        let url = format!(
            "{}/pg/v4/payment/verify.json",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("verify request failed: {e}")))?;

        let status = response.status();
        let body = read_json_body(status, response).await?;
        parse_verify_body(status, &body)
    }
}

/// Hosted payment page URL for an authority.
pub fn start_pay_url(base_url: &str, authority: &str) -> String {
    format!("{}/pg/StartPay/{authority}", base_url.trim_end_matches('/'))
}

pub fn map_verify_code(code: i64) -> SettlementStatus {
    match code {
        CODE_VERIFIED | CODE_ALREADY_VERIFIED => SettlementStatus::Approved,
        _ => SettlementStatus::Rejected,
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
        Err(_) if status.is_server_error() => Err(ProviderError::Unavailable(format!(
            "gateway returned {status}: {text}"
        ))),
        Err(e) => Err(ProviderError::InvalidResponse(format!(
            "gateway returned invalid JSON ({status}): {e}"
        ))),
    }
}

fn parse_initiate_body(status: StatusCode, body: &Value) -> Result<String, ProviderError> {
    if let Some(authority) = body.pointer("/data/authority").and_then(Value::as_str) {
        let code = body.pointer("/data/code").and_then(Value::as_i64);
        if code == Some(CODE_VERIFIED) && !authority.is_empty() {
            return Ok(authority.to_string());
        }
    }
    match extract_gateway_error(body) {
        Some((code, message)) if !status.is_server_error() => Err(ProviderError::Rejected(
            format!("gateway refused the payment request ({code}): {message}"),
        )),
        Some((code, message)) => Err(ProviderError::Unavailable(format!(
            "gateway error ({code}): {message}"
        ))),
        None => Err(ProviderError::InvalidResponse(
            "payment request response carries no authority".to_string(),
        )),
    }
}

fn parse_verify_body(status: StatusCode, body: &Value) -> Result<ProviderOutcome, ProviderError> {
    if let Some(code) = body.pointer("/data/code").and_then(Value::as_i64) {
        return Ok(match map_verify_code(code) {
            SettlementStatus::Approved => {
                let ref_id = body
                    .pointer("/data/ref_id")
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .filter(|s| !s.is_empty());
                ProviderOutcome::approved(code.to_string(), ref_id)
            }
            _ => ProviderOutcome::rejected(code.to_string(), "payment was not verified"),
        });
    }
    match extract_gateway_error(body) {
        Some((code, message)) if !status.is_server_error() => {
            // The session exists but did not settle (e.g. the user abandoned
            // the gateway page). Definitive for this authority.
            Ok(ProviderOutcome::rejected(code.to_string(), message))
        }
        Some((code, message)) => Err(ProviderError::Unavailable(format!(
            "gateway error ({code}): {message}"
        ))),
        None => Err(ProviderError::InvalidResponse(
            "verify response carries no code".to_string(),
        )),
    }
}

fn extract_gateway_error(body: &Value) -> Option<(i64, String)> {
    let errors = body.get("errors")?;
    let code = errors.get("code").and_then(Value::as_i64)?;
    let message = errors
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unspecified gateway error")
        .to_string();
    Some((code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_code_mapping_is_stable() {
        assert_eq!(map_verify_code(100), SettlementStatus::Approved);
        assert_eq!(map_verify_code(101), SettlementStatus::Approved);
        assert_eq!(map_verify_code(-51), SettlementStatus::Rejected);
        assert_eq!(map_verify_code(0), SettlementStatus::Rejected);
    }

    #[test]
    fn start_pay_url_strips_trailing_slash() {
        assert_eq!(
            start_pay_url("https://sandbox.zarinpal.com/", "A00001"),
            "https://sandbox.zarinpal.com/pg/StartPay/A00001"
        );
    }

    #[test]
    fn initiate_body_yields_authority() {
        let body = json!({
            "data": { "code": 100, "authority": "A0000012345", "fee": 100 },
            "errors": []
        });
        let authority = parse_initiate_body(StatusCode::OK, &body).unwrap();
        assert_eq!(authority, "A0000012345");
    }

    #[test]
    fn initiate_refusal_is_definitive() {
        let body = json!({
            "data": [],
            "errors": { "code": -9, "message": "The input params invalid" }
        });
        let err = parse_initiate_body(StatusCode::BAD_REQUEST, &body).unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn gateway_5xx_initiate_stays_retryable() {
        let body = json!({
            "data": [],
            "errors": { "code": -99, "message": "internal error" }
        });
        let err = parse_initiate_body(StatusCode::BAD_GATEWAY, &body).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn verified_session_is_approved_with_receipt() {
        let body = json!({
            "data": { "code": 100, "ref_id": 201_000_011, "card_pan": "502229******1234" },
            "errors": []
        });
        let outcome = parse_verify_body(StatusCode::OK, &body).unwrap();
        assert_eq!(outcome.status, SettlementStatus::Approved);
        assert_eq!(outcome.reference.as_deref(), Some("201000011"));
    }

    #[test]
    fn already_verified_session_counts_as_success() {
        let body = json!({
            "data": { "code": 101, "ref_id": 201_000_011 },
            "errors": []
        });
        let outcome = parse_verify_body(StatusCode::OK, &body).unwrap();
        assert_eq!(outcome.status, SettlementStatus::Approved);
    }

    #[test]
    fn unpaid_session_is_a_definitive_rejection() {
        let body = json!({
            "data": [],
            "errors": { "code": -51, "message": "Session is not in success status" }
        });
        let outcome = parse_verify_body(StatusCode::BAD_REQUEST, &body).unwrap();
        assert_eq!(outcome.status, SettlementStatus::Rejected);
        assert_eq!(
            outcome.failure_reason.as_deref(),
            Some("Session is not in success status")
        );
    }

    #[test]
    fn empty_verify_body_is_invalid() {
        let body = json!({ "data": [] });
        let err = parse_verify_body(StatusCode::OK, &body).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }
}
