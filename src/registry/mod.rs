// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Payment request registry records.
//!
//! Every provider-facing payment, payout or deposit, has exactly one
//! registry record keyed by a locally generated `request_id`. The provider
//! authority is attached after a successful initiate call, so a payout whose
//! initiate failed transiently exists here with a live reservation and no
//! authority until the sweep re-drives it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::ledger::Currency;
use crate::providers::{PayoutRecipient, ProviderHandle, ProviderId};

/// Direction of the payment relative to the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    /// Funds entering the wallet from a provider.
    Deposit,
    /// Funds leaving the wallet through a provider.
    Payout,
}

/// Request lifecycle status.
///
/// `Pending` is the only state with outgoing transitions; the terminal
/// states are absorbing and re-finalization is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Persisted payment request record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredPaymentRequest {
    /// Unique request identifier, generated locally before any provider
    /// contact and reused as the provider idempotency key.
    pub request_id: String,
    /// Account whose balance the request settles against.
    pub account_id: String,
    pub direction: PaymentDirection,
    pub provider: ProviderId,
    pub amount: Decimal,
    pub currency: Currency,
    /// Payout target. Absent on deposits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<PayoutRecipient>,
    /// Provider-issued tracking identifier, attached once initiate succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    /// URL where the end user continues the provider flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub status: RequestStatus,
    /// History sequence of the reservation entry this payout debited.
    /// Absent on deposits, which only touch the ledger at settlement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_seq: Option<u64>,
    /// Settlement receipt reported by the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the sweep or an inline verify last consulted the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl StoredPaymentRequest {
    /// Construct a pending payout request. The reservation sequence is
    /// filled in by the store when the debit commits.
    pub fn new_payout(
        account_id: String,
        provider: ProviderId,
        amount: Decimal,
        currency: Currency,
        recipient: PayoutRecipient,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: Uuid::new_v4().to_string(),
            account_id,
            direction: PaymentDirection::Payout,
            provider,
            amount,
            currency,
            recipient: Some(recipient),
            authority: None,
            action_url: None,
            status: RequestStatus::Pending,
            reservation_seq: None,
            provider_ref: None,
            failure_reason: None,
            description,
            created_at: now,
            updated_at: now,
            last_synced_at: None,
        }
    }

    /// Construct a pending deposit request.
    pub fn new_deposit(
        account_id: String,
        provider: ProviderId,
        amount: Decimal,
        currency: Currency,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: Uuid::new_v4().to_string(),
            account_id,
            direction: PaymentDirection::Deposit,
            provider,
            amount,
            currency,
            recipient: None,
            authority: None,
            action_url: None,
            status: RequestStatus::Pending,
            reservation_seq: None,
            provider_ref: None,
            failure_reason: None,
            description,
            created_at: now,
            updated_at: now,
            last_synced_at: None,
        }
    }

    /// Build the handle providers need to re-check this settlement.
    /// `None` until an authority has been attached.
    pub fn provider_handle(&self) -> Option<ProviderHandle> {
        self.authority.as_ref().map(|authority| ProviderHandle {
            authority: authority.clone(),
            amount: self.amount,
            currency: self.currency,
            direction: self.direction,
        })
    }

    pub fn mark_approved(&mut self, provider_ref: Option<String>) {
        self.status = RequestStatus::Approved;
        if provider_ref.is_some() {
            self.provider_ref = provider_ref;
        }
        self.updated_at = Utc::now();
    }

    pub fn mark_rejected(&mut self, failure_reason: Option<String>) {
        self.status = RequestStatus::Rejected;
        if failure_reason.is_some() {
            self.failure_reason = failure_reason;
        }
        self.updated_at = Utc::now();
    }

    pub fn touch_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payout() -> StoredPaymentRequest {
        StoredPaymentRequest::new_payout(
            "acct-1".to_string(),
            ProviderId::Zarinpal,
            dec!(30000),
            Currency::IRR,
            PayoutRecipient::BankAccount {
                iban: "IR060120000000001234567891".to_string(),
                holder_name: "Alice".to_string(),
            },
            Some("rent".to_string()),
        )
    }

    #[test]
    fn new_payout_is_pending_without_authority() {
        let request = payout();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(!request.status.is_terminal());
        assert!(request.authority.is_none());
        assert!(request.reservation_seq.is_none());
        assert!(request.provider_handle().is_none());
    }

    #[test]
    fn handle_carries_amount_and_direction() {
        let mut request = payout();
        request.authority = Some("A0000012345".to_string());
        let handle = request.provider_handle().unwrap();
        assert_eq!(handle.authority, "A0000012345");
        assert_eq!(handle.amount, dec!(30000));
        assert_eq!(handle.currency, Currency::IRR);
        assert_eq!(handle.direction, PaymentDirection::Payout);
    }

    #[test]
    fn terminal_marks_keep_first_reason() {
        let mut request = payout();
        request.mark_rejected(Some("declined".to_string()));
        assert!(request.status.is_terminal());
        assert_eq!(request.failure_reason.as_deref(), Some("declined"));

        // A later mark without a reason must not erase the recorded one.
        request.mark_rejected(None);
        assert_eq!(request.failure_reason.as_deref(), Some("declined"));
    }

    #[test]
    fn deposit_has_no_recipient() {
        let request = StoredPaymentRequest::new_deposit(
            "acct-1".to_string(),
            ProviderId::Stripe,
            dec!(25.50),
            Currency::USD,
            None,
        );
        assert_eq!(request.direction, PaymentDirection::Deposit);
        assert!(request.recipient.is_none());
    }
}
