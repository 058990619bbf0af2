// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Multi-currency ledger primitives.
//!
//! Balances and history amounts are [`rust_decimal::Decimal`] values scaled
//! per currency: Rial carries no fractional digits, the card-scheme
//! currencies carry two. Every balance mutation produces exactly one
//! [`HistoryEntry`](history::HistoryEntry) whose `previous_balance` and
//! `new_balance` snapshot the affected balance, which is what makes the
//! history auditable after the fact.

pub mod account;
pub mod history;

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Currencies an account can hold a balance in.
///
/// The set is closed on purpose: settlement rails, scale rules, and provider
/// routing are all keyed off these four codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub enum Currency {
    USD,
    GBP,
    EUR,
    IRR,
}

impl Currency {
    pub const ALL: [Currency; 4] = [Currency::USD, Currency::GBP, Currency::EUR, Currency::IRR];

    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::GBP => "GBP",
            Currency::EUR => "EUR",
            Currency::IRR => "IRR",
        }
    }

    /// Number of fractional digits amounts in this currency may carry.
    ///
    /// Rial amounts are whole numbers; there is no sub-Rial unit on any
    /// supported rail.
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::IRR => 0,
            Currency::USD | Currency::GBP | Currency::EUR => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported currency: {0}")]
pub struct UnknownCurrency(pub String);

impl FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "GBP" => Ok(Currency::GBP),
            "EUR" => Ok(Currency::EUR),
            "IRR" => Ok(Currency::IRR),
            other => Err(UnknownCurrency(other.to_string())),
        }
    }
}

/// Whether `amount` respects the fractional-digit limit of `currency`.
///
/// Trailing zeros do not count against the limit, so `10.00 IRR` is valid
/// while `10.5 IRR` is not.
pub fn valid_scale(amount: Decimal, currency: Currency) -> bool {
    amount.normalize().scale() <= currency.decimal_places()
}

/// Convert `amount` to the smallest unit of `currency` (cents, pence, Rial).
///
/// Returns `None` for negative amounts, amounts with excess fractional
/// digits, or amounts too large for `u64`. Providers that bill in minor
/// units (Stripe, Zarinpal) go through this.
pub fn to_minor_units(amount: Decimal, currency: Currency) -> Option<u64> {
    if amount.is_sign_negative() || !valid_scale(amount, currency) {
        return None;
    }
    let factor = Decimal::from(10u64.pow(currency.decimal_places()));
    (amount * factor).to_u64()
}

/// Apply an exchange rate and round half away from zero to the destination
/// currency's scale.
pub fn convert_amount(amount: Decimal, rate: Decimal, to: Currency) -> Decimal {
    (amount * rate).round_dp_with_strategy(
        to.decimal_places(),
        RoundingStrategy::MidpointAwayFromZero,
    )
}
