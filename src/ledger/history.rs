// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Balance history entries.
//!
//! One entry per committed balance mutation, written in the same storage
//! transaction as the balance itself. A pending withdrawal entry is the
//! reservation: it exists from the moment funds leave the balance, and its
//! status is corrected in place when the provider settles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::account::BalanceChange;
use super::Currency;
use crate::providers::ProviderId;

/// What moved the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Outbound payout through a provider.
    Withdrawal,
    /// Inbound settlement from a provider.
    Deposit,
    TransferIn,
    TransferOut,
    ConversionIn,
    ConversionOut,
}

impl EntryKind {
    /// Debit kinds decrease the balance, credit kinds increase it.
    pub fn is_debit(&self) -> bool {
        matches!(
            self,
            EntryKind::Withdrawal | EntryKind::TransferOut | EntryKind::ConversionOut
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Approved,
    Rejected,
}

/// An immutable-by-amount record of one balance mutation.
///
/// `previous_balance` and `new_balance` are snapshots of the affected
/// currency balance around the mutation. Only `status` and `updated_at`
/// change after the entry is written.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    pub entry_id: String,
    /// Position in the owning account's history sequence.
    pub seq: u64,
    pub account_id: String,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub currency: Currency,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    /// Provider-issued tracking identifier, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    /// Counterparty reference: masked payout target, peer account number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        account_id: &str,
        seq: u64,
        kind: EntryKind,
        amount: Decimal,
        currency: Currency,
        change: BalanceChange,
        status: EntryStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            entry_id: Uuid::new_v4().to_string(),
            seq,
            account_id: account_id.to_string(),
            kind,
            amount,
            currency,
            previous_balance: change.previous,
            new_balance: change.new,
            provider: None,
            authority: None,
            reference: None,
            description: None,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check that the balance snapshots agree with the amount and direction.
    ///
    /// The store refuses to commit an entry for which this is false.
    pub fn conserves_balance(&self) -> bool {
        if self.kind.is_debit() {
            self.previous_balance - self.amount == self.new_balance
        } else {
            self.previous_balance + self.amount == self.new_balance
        }
    }

    pub fn mark_approved(&mut self) {
        self.status = EntryStatus::Approved;
        self.updated_at = Utc::now();
    }

    pub fn mark_rejected(&mut self) {
        self.status = EntryStatus::Rejected;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn withdrawal() -> HistoryEntry {
        HistoryEntry::new(
            "acct-1",
            1,
            EntryKind::Withdrawal,
            dec!(30000),
            Currency::IRR,
            BalanceChange {
                previous: dec!(100000),
                new: dec!(70000),
            },
            EntryStatus::Pending,
        )
    }

    #[test]
    fn debit_conservation_holds() {
        let entry = withdrawal();
        assert!(entry.conserves_balance());

        let mut broken = withdrawal();
        broken.new_balance = dec!(71000);
        assert!(!broken.conserves_balance());
    }

    #[test]
    fn credit_conservation_holds() {
        let entry = HistoryEntry::new(
            "acct-1",
            2,
            EntryKind::Deposit,
            dec!(25.50),
            Currency::USD,
            BalanceChange {
                previous: dec!(0),
                new: dec!(25.50),
            },
            EntryStatus::Approved,
        );
        assert!(entry.conserves_balance());
    }

    #[test]
    fn status_corrections_touch_updated_at_only() {
        let mut entry = withdrawal();
        let created = entry.created_at;
        entry.mark_rejected();
        assert_eq!(entry.status, EntryStatus::Rejected);
        assert_eq!(entry.created_at, created);
        assert!(entry.updated_at >= created);
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&EntryKind::ConversionOut).unwrap();
        assert_eq!(json, "\"conversion_out\"");
        let json = serde_json::to_string(&EntryStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }
}
