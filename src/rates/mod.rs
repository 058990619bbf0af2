// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Exchange-rate quotes for currency conversion.
//!
//! Conversion always uses a rate quoted at the instant of the request. The
//! production source is the exchangerate-api.com v6 endpoint; tests and dev
//! builds can use a fixed in-memory table instead. When no source is
//! configured the service is absent and conversion is disabled.

#[cfg(any(test, feature = "dev"))]
use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::{env_optional, env_or_default};
use crate::ledger::Currency;

const DEFAULT_BASE_URL: &str = "https://v6.exchangerate-api.com";

#[derive(Debug, thiserror::Error)]
pub enum RateError {
    #[error("rate service request failed: {0}")]
    Unavailable(String),
    #[error("no rate available for {from} -> {to}")]
    UnsupportedPair { from: Currency, to: Currency },
    #[error("rate service returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// A source of live conversion rates.
pub enum RateService {
    ExchangeRateApi(ExchangeRateApiClient),
    #[cfg(any(test, feature = "dev"))]
    Fixed(FixedRates),
}

impl RateService {
    /// Build the configured rate source, if any.
    pub fn from_env() -> Option<Self> {
        let api_key = env_optional("EXCHANGE_RATE_API_KEY")?;
        let base_url = env_or_default("EXCHANGE_RATE_BASE_URL", DEFAULT_BASE_URL);
        match ExchangeRateApiClient::new(base_url, api_key) {
            Ok(client) => Some(RateService::ExchangeRateApi(client)),
            Err(err) => {
                tracing::warn!(error = %err, "rate service disabled");
                None
            }
        }
    }

    pub async fn quote(&self, from: Currency, to: Currency) -> Result<Decimal, RateError> {
        match self {
            RateService::ExchangeRateApi(client) => client.quote(from, to).await,
            #[cfg(any(test, feature = "dev"))]
            RateService::Fixed(rates) => rates.quote(from, to),
        }
    }
}

pub struct ExchangeRateApiClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl ExchangeRateApiClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self, RateError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| RateError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            api_key,
            http,
        })
    }

    pub async fn quote(&self, from: Currency, to: Currency) -> Result<Decimal, RateError> {
        let url = format!(
            "{}/v6/{}/latest/{}",
            self.base_url.trim_end_matches('/'),
            self.api_key,
            from.code()
        );
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RateError::Unavailable(format!("rate request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RateError::Unavailable(format!(
                "rate request returned {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RateError::InvalidResponse(format!("invalid JSON: {e}")))?;
        parse_rate(&body, from, to)
    }
}

fn parse_rate(body: &Value, from: Currency, to: Currency) -> Result<Decimal, RateError> {
    let result = body.pointer("/result").and_then(Value::as_str);
    if result != Some("success") {
        let detail = body
            .pointer("/error-type")
            .and_then(Value::as_str)
            .unwrap_or("unspecified error");
        return Err(RateError::Unavailable(format!(
            "rate lookup did not succeed: {detail}"
        )));
    }

    let rate_value = body
        .pointer(&format!("/conversion_rates/{}", to.code()))
        .ok_or(RateError::UnsupportedPair { from, to })?;
    let rate: Decimal = serde_json::from_value(rate_value.clone())
        .map_err(|e| RateError::InvalidResponse(format!("unparseable rate: {e}")))?;
    if rate <= Decimal::ZERO {
        return Err(RateError::InvalidResponse(format!(
            "non-positive rate {rate} for {from} -> {to}"
        )));
    }
    Ok(rate)
}

/// Fixed in-memory rate table for tests and local development.
#[cfg(any(test, feature = "dev"))]
#[derive(Default)]
pub struct FixedRates {
    rates: HashMap<(Currency, Currency), Decimal>,
}

#[cfg(any(test, feature = "dev"))]
impl FixedRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, from: Currency, to: Currency, rate: Decimal) -> Self {
        self.rates.insert((from, to), rate);
        self
    }

    fn quote(&self, from: Currency, to: Currency) -> Result<Decimal, RateError> {
        self.rates
            .get(&(from, to))
            .copied()
            .ok_or(RateError::UnsupportedPair { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn parses_rate_from_success_body() {
        let body = json!({
            "result": "success",
            "base_code": "USD",
            "conversion_rates": { "USD": 1, "GBP": 0.9155, "EUR": 1.0721 }
        });
        let rate = parse_rate(&body, Currency::USD, Currency::GBP).unwrap();
        assert_eq!(rate, dec!(0.9155));
    }

    #[test]
    fn missing_target_currency_is_unsupported() {
        let body = json!({
            "result": "success",
            "conversion_rates": { "USD": 1 }
        });
        let err = parse_rate(&body, Currency::USD, Currency::IRR).unwrap_err();
        assert!(matches!(
            err,
            RateError::UnsupportedPair {
                from: Currency::USD,
                to: Currency::IRR
            }
        ));
    }

    #[test]
    fn error_body_reports_unavailable() {
        let body = json!({ "result": "error", "error-type": "invalid-key" });
        let err = parse_rate(&body, Currency::USD, Currency::EUR).unwrap_err();
        assert!(matches!(err, RateError::Unavailable(_)));
    }

    #[test]
    fn non_positive_rate_is_invalid() {
        let body = json!({
            "result": "success",
            "conversion_rates": { "EUR": 0 }
        });
        let err = parse_rate(&body, Currency::USD, Currency::EUR).unwrap_err();
        assert!(matches!(err, RateError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn fixed_table_quotes_only_known_pairs() {
        let rates = FixedRates::new().with(Currency::USD, Currency::GBP, dec!(0.9155));
        let service = RateService::Fixed(rates);
        let quoted = service.quote(Currency::USD, Currency::GBP).await.unwrap();
        assert_eq!(quoted, dec!(0.9155));
        let missing = service.quote(Currency::GBP, Currency::USD).await;
        assert!(matches!(missing, Err(RateError::UnsupportedPair { .. })));
    }
}
