// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Account records and balance mutation helpers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Currency;

/// Balance snapshot taken across a single mutation. Recorded verbatim on the
/// paired history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub previous: Decimal,
    pub new: Decimal,
}

/// A wallet account holding one balance per supported currency.
///
/// `history_seq` is the per-account history counter. It only ever grows, and
/// every committed history entry consumes exactly one value, so the sequence
/// doubles as a total order over the account's ledger activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    /// Short human-facing identifier used as the transfer address.
    pub account_number: String,
    pub balances: BTreeMap<Currency, Decimal>,
    pub history_seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    /// Create a fresh account with a zero balance in every supported currency.
    pub fn new(account_id: String, account_number: String) -> Self {
        let now = Utc::now();
        let balances = Currency::ALL
            .iter()
            .map(|currency| (*currency, Decimal::ZERO))
            .collect();
        Self {
            account_id,
            account_number,
            balances,
            history_seq: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn balance(&self, currency: Currency) -> Decimal {
        self.balances.get(&currency).copied().unwrap_or(Decimal::ZERO)
    }

    /// Add `amount` to the balance in `currency`.
    pub fn credit(&mut self, currency: Currency, amount: Decimal) -> BalanceChange {
        let previous = self.balance(currency);
        let new = previous + amount;
        self.balances.insert(currency, new);
        self.updated_at = Utc::now();
        BalanceChange { previous, new }
    }

    /// Subtract `amount` from the balance in `currency`, refusing to go
    /// negative. Returns `None` when funds are insufficient, leaving the
    /// record untouched.
    pub fn try_debit(&mut self, currency: Currency, amount: Decimal) -> Option<BalanceChange> {
        let previous = self.balance(currency);
        if previous < amount {
            return None;
        }
        let new = previous - amount;
        self.balances.insert(currency, new);
        self.updated_at = Utc::now();
        Some(BalanceChange { previous, new })
    }

    /// Claim the next history sequence number.
    pub fn next_seq(&mut self) -> u64 {
        self.history_seq += 1;
        self.history_seq
    }
}

/// Generate a 10-digit account number from random UUID material.
///
/// Collisions are possible and are handled by the caller re-rolling against
/// the account-number index.
pub fn generate_account_number() -> String {
    let raw = Uuid::new_v4().as_u128() % 10_000_000_000;
    format!("{raw:010}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account() -> AccountRecord {
        AccountRecord::new("acct-1".to_string(), generate_account_number())
    }

    #[test]
    fn new_account_has_zero_balances_everywhere() {
        let account = account();
        for currency in Currency::ALL {
            assert_eq!(account.balance(currency), Decimal::ZERO);
        }
        assert_eq!(account.history_seq, 0);
    }

    #[test]
    fn credit_and_debit_snapshot_balances() {
        let mut account = account();
        let change = account.credit(Currency::IRR, dec!(100000));
        assert_eq!(change.previous, Decimal::ZERO);
        assert_eq!(change.new, dec!(100000));

        let change = account.try_debit(Currency::IRR, dec!(30000)).unwrap();
        assert_eq!(change.previous, dec!(100000));
        assert_eq!(change.new, dec!(70000));
        assert_eq!(account.balance(Currency::IRR), dec!(70000));
    }

    #[test]
    fn debit_refuses_to_overdraw() {
        let mut account = account();
        account.credit(Currency::USD, dec!(10.00));
        assert!(account.try_debit(Currency::USD, dec!(10.01)).is_none());
        assert_eq!(account.balance(Currency::USD), dec!(10.00));
        // Debiting one currency never touches another.
        assert!(account.try_debit(Currency::EUR, dec!(0.01)).is_none());
    }

    #[test]
    fn seq_is_strictly_increasing() {
        let mut account = account();
        assert_eq!(account.next_seq(), 1);
        assert_eq!(account.next_seq(), 2);
        assert_eq!(account.history_seq, 2);
    }

    #[test]
    fn account_numbers_are_ten_digits() {
        let number = generate_account_number();
        assert_eq!(number.len(), 10);
        assert!(number.chars().all(|c| c.is_ascii_digit()));
    }
}
