// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! # Runtime Configuration Constants
//!
//! This module defines environment variable names, default values, and the
//! small helpers used to read them. Configuration is loaded from the
//! environment at startup; a provider whose credentials are absent is simply
//! not registered.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for the embedded database | `data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `SWEEP_INTERVAL_SECS` | Seconds between pending-settlement sweeps | `1800` |
//! | `SWEEP_MIN_RESYNC_SECS` | Minimum seconds between provider checks of one request | `60` |
//! | `ZARINPAL_MERCHANT_ID` | Zarinpal merchant identifier | Required to enable Zarinpal |
//! | `ZARINPAL_BASE_URL` | Zarinpal API base URL | `https://sandbox.zarinpal.com` |
//! | `ZARINPAL_CALLBACK_URL` | Redirect target after the Zarinpal flow | `http://localhost:8080/v1/payouts/verify` |
//! | `STRIPE_SECRET_KEY` | Stripe API secret key | Required to enable Stripe |
//! | `STRIPE_BASE_URL` | Stripe API base URL | `https://api.stripe.com` |
//! | `PAYPAL_CLIENT_ID` | PayPal REST client id | Required to enable PayPal |
//! | `PAYPAL_SECRET_KEY` | PayPal REST secret | Required to enable PayPal |
//! | `PAYPAL_BASE_URL` | PayPal API base URL | `https://api-m.sandbox.paypal.com` |
//! | `EXCHANGE_RATE_API_KEY` | exchangerate-api.com key; conversion is disabled without it | Optional |
//! | `EXCHANGE_RATE_BASE_URL` | Exchange rate API base URL | `https://v6.exchangerate-api.com` |

/// Environment variable name for the database directory path.
///
/// The embedded redb database file lives under this directory. It must be
/// writable and persistent; losing it loses balances and pending requests.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Read an environment variable, treating empty or whitespace values as unset.
pub fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

pub fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

/// Read a u64 environment variable, falling back to `default` when missing
/// or unparsable.
pub fn env_u64_or(name: &str, default: u64) -> u64 {
    env_optional(name)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_count_as_unset() {
        std::env::set_var("PAYVAULT_TEST_BLANK", "   ");
        assert_eq!(env_optional("PAYVAULT_TEST_BLANK"), None);
        assert_eq!(env_or_default("PAYVAULT_TEST_BLANK", "fallback"), "fallback");
    }

    #[test]
    fn u64_values_fall_back_on_garbage() {
        std::env::set_var("PAYVAULT_TEST_U64", "120");
        assert_eq!(env_u64_or("PAYVAULT_TEST_U64", 5), 120);
        std::env::set_var("PAYVAULT_TEST_U64_BAD", "soon");
        assert_eq!(env_u64_or("PAYVAULT_TEST_U64_BAD", 5), 5);
        assert_eq!(env_u64_or("PAYVAULT_TEST_U64_MISSING", 5), 5);
    }
}
