// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! External payment provider gateways.
//!
//! Each provider speaks its own wire protocol but is driven through one
//! capability surface: initiate a payout or deposit, verify a settlement
//! after a redirect callback, and poll settlement state from the sweep.
//! Provider-specific statuses are mapped to the canonical
//! [`SettlementStatus`] at the adapter boundary; nothing outside this module
//! sees a raw provider status.
//!
//! - `zarinpal` - Iranian Rial gateway (redirect flow, bank payouts)
//! - `stripe` - card processor (payouts and payment intents, minor units)
//! - `paypal` - PayPal Payouts and Orders (OAuth2, batch payouts)
//! - `mock` - scriptable in-memory gateway for tests and dev builds

pub mod paypal;
pub mod stripe;
pub mod zarinpal;

#[cfg(any(test, feature = "dev"))]
pub mod mock;

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ledger::Currency;
use crate::registry::PaymentDirection;

pub use paypal::PaypalClient;
pub use stripe::StripeClient;
pub use zarinpal::ZarinpalClient;

#[cfg(any(test, feature = "dev"))]
pub use mock::MockGateway;

/// Identifies a payment provider across the registry, stored records, and
/// the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Zarinpal,
    Stripe,
    Paypal,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::Zarinpal, ProviderId::Stripe, ProviderId::Paypal];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Zarinpal => "zarinpal",
            ProviderId::Stripe => "stripe",
            ProviderId::Paypal => "paypal",
        }
    }

    /// Human-friendly name for UI display.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Zarinpal => "Zarinpal",
            ProviderId::Stripe => "Stripe",
            ProviderId::Paypal => "PayPal",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where payout funds should land.
///
/// Stored on the payout request so the sweep can re-drive an initiate that
/// failed transiently. Raw card numbers never leave this type unmasked; the
/// ledger only ever sees [`PayoutRecipient::reference`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayoutRecipient {
    PaypalEmail { email: String },
    BankAccount { iban: String, holder_name: String },
    Card { number: String, holder_name: String },
}

impl PayoutRecipient {
    /// Clean and validate the recipient descriptor.
    ///
    /// Emails are trimmed and lowercased, IBANs uppercased with inner spaces
    /// removed, card numbers stripped of spaces and dashes. Returns the
    /// normalized copy; the raw input is never stored.
    pub fn normalized(&self) -> Result<PayoutRecipient, RecipientError> {
        match self {
            PayoutRecipient::PaypalEmail { email } => Ok(PayoutRecipient::PaypalEmail {
                email: clean_email(email)?,
            }),
            PayoutRecipient::BankAccount { iban, holder_name } => Ok(PayoutRecipient::BankAccount {
                iban: clean_iban(iban)?,
                holder_name: holder_name.trim().to_string(),
            }),
            PayoutRecipient::Card { number, holder_name } => Ok(PayoutRecipient::Card {
                number: clean_card_number(number)?,
                holder_name: holder_name.trim().to_string(),
            }),
        }
    }

    /// Reference string recorded on ledger entries. Card numbers are reduced
    /// to their last four digits.
    pub fn reference(&self) -> String {
        match self {
            PayoutRecipient::PaypalEmail { email } => format!("PAYPAL-{email}"),
            PayoutRecipient::BankAccount { iban, .. } => iban.clone(),
            PayoutRecipient::Card { number, .. } => {
                let last4 = if number.len() >= 4 {
                    &number[number.len() - 4..]
                } else {
                    number.as_str()
                };
                format!("CARD-{last4}")
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PayoutRecipient::PaypalEmail { .. } => "paypal_email",
            PayoutRecipient::BankAccount { .. } => "bank_account",
            PayoutRecipient::Card { .. } => "card",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecipientError {
    #[error("invalid email address")]
    Email,
    #[error("invalid IBAN")]
    Iban,
    #[error("invalid card number")]
    Card,
}

fn clean_email(raw: &str) -> Result<String, RecipientError> {
    let email = raw.trim().to_ascii_lowercase();
    let (local, domain) = email.split_once('@').ok_or(RecipientError::Email)?;
    let valid = !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.contains(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if valid {
        Ok(email)
    } else {
        Err(RecipientError::Email)
    }
}

fn clean_iban(raw: &str) -> Result<String, RecipientError> {
    let iban: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let valid = (15..=34).contains(&iban.len())
        && iban.chars().take(2).all(|c| c.is_ascii_alphabetic())
        && iban.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(iban)
    } else {
        Err(RecipientError::Iban)
    }
}

fn clean_card_number(raw: &str) -> Result<String, RecipientError> {
    let number: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    let valid = (12..=19).contains(&number.len()) && number.chars().all(|c| c.is_ascii_digit());
    if valid {
        Ok(number)
    } else {
        Err(RecipientError::Card)
    }
}

/// Canonical settlement state every provider status maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    /// Provider has not reached a final decision.
    Pending,
    /// Funds settled. Terminal.
    Approved,
    /// Provider definitively refused or the flow was abandoned. Terminal.
    Rejected,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Approved => "approved",
            SettlementStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Result of asking a provider about a settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOutcome {
    pub status: SettlementStatus,
    /// Provider-native status string, kept for logs and audits.
    pub raw_status: String,
    /// Settlement receipt (Zarinpal ref_id, Stripe payout id, PayPal batch id).
    pub reference: Option<String>,
    pub failure_reason: Option<String>,
}

impl ProviderOutcome {
    pub fn pending(raw_status: impl Into<String>) -> Self {
        Self {
            status: SettlementStatus::Pending,
            raw_status: raw_status.into(),
            reference: None,
            failure_reason: None,
        }
    }

    pub fn approved(raw_status: impl Into<String>, reference: Option<String>) -> Self {
        Self {
            status: SettlementStatus::Approved,
            raw_status: raw_status.into(),
            reference,
            failure_reason: None,
        }
    }

    pub fn rejected(raw_status: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: SettlementStatus::Rejected,
            raw_status: raw_status.into(),
            reference: None,
            failure_reason: Some(reason.into()),
        }
    }

    /// Terminal outcomes finalize the request; pending ones only refresh the
    /// sync timestamp.
    pub fn is_definitive(&self) -> bool {
        !matches!(self.status, SettlementStatus::Pending)
    }
}

/// What a successful initiate call hands back.
#[derive(Debug, Clone)]
pub struct InitiateResult {
    /// Provider-issued tracking identifier for this payment.
    pub authority: String,
    /// URL the end user must visit to complete the flow, when the provider
    /// has one (Zarinpal StartPay, PayPal order approval).
    pub action_url: Option<String>,
    pub outcome: ProviderOutcome,
}

/// Everything a provider needs to re-check a settlement later.
///
/// Zarinpal verification requires the original amount, so the handle carries
/// it alongside the authority.
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    pub authority: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub direction: PaymentDirection,
}

/// Parameters for initiating a payout.
#[derive(Debug, Clone)]
pub struct PayoutOrder<'a> {
    /// Local request identifier, reused as the provider idempotency key.
    pub request_id: &'a str,
    pub amount: Decimal,
    pub currency: Currency,
    pub recipient: &'a PayoutRecipient,
    pub description: Option<&'a str>,
}

/// Parameters for initiating a deposit.
#[derive(Debug, Clone)]
pub struct DepositOrder<'a> {
    pub request_id: &'a str,
    pub amount: Decimal,
    pub currency: Currency,
    pub description: Option<&'a str>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider is not configured: {0}")]
    MissingConfig(String),
    #[error("provider request failed: {0}")]
    Unavailable(String),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("provider returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether the failure leaves provider-side state unknown.
    ///
    /// Everything except an explicit rejection is retryable: a timeout or a
    /// garbled response may hide a request that actually went through, so
    /// callers must not treat those as a definitive refusal.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Rejected(_))
    }
}

pub(crate) fn env_required(name: &str) -> Result<String, ProviderError> {
    crate::config::env_optional(name).ok_or_else(|| ProviderError::MissingConfig(name.to_string()))
}

/// A configured provider gateway.
///
/// Tagged dispatch keeps the call sites monomorphic and lets the mock slot
/// in for tests without a trait object.
pub enum ProviderGateway {
    Zarinpal(ZarinpalClient),
    Stripe(StripeClient),
    Paypal(PaypalClient),
    #[cfg(any(test, feature = "dev"))]
    Mock(MockGateway),
}

impl ProviderGateway {
    pub fn id(&self) -> ProviderId {
        match self {
            ProviderGateway::Zarinpal(_) => ProviderId::Zarinpal,
            ProviderGateway::Stripe(_) => ProviderId::Stripe,
            ProviderGateway::Paypal(_) => ProviderId::Paypal,
            #[cfg(any(test, feature = "dev"))]
            ProviderGateway::Mock(mock) => mock.id(),
        }
    }

    pub fn supports_currency(&self, currency: Currency) -> bool {
        match self {
            ProviderGateway::Zarinpal(_) => matches!(currency, Currency::IRR),
            ProviderGateway::Stripe(_) | ProviderGateway::Paypal(_) => {
                matches!(currency, Currency::USD | Currency::GBP | Currency::EUR)
            }
            #[cfg(any(test, feature = "dev"))]
            ProviderGateway::Mock(_) => true,
        }
    }

    pub fn accepts_recipient(&self, recipient: &PayoutRecipient) -> bool {
        match self {
            ProviderGateway::Zarinpal(_) => matches!(recipient, PayoutRecipient::BankAccount { .. }),
            ProviderGateway::Stripe(_) => matches!(
                recipient,
                PayoutRecipient::BankAccount { .. } | PayoutRecipient::Card { .. }
            ),
            ProviderGateway::Paypal(_) => true,
            #[cfg(any(test, feature = "dev"))]
            ProviderGateway::Mock(_) => true,
        }
    }

    /// Recipient kinds [`Self::accepts_recipient`] admits, for discovery.
    pub fn recipient_kinds(&self) -> Vec<&'static str> {
        match self {
            ProviderGateway::Zarinpal(_) => vec!["bank_account"],
            ProviderGateway::Stripe(_) => vec!["bank_account", "card"],
            ProviderGateway::Paypal(_) => vec!["paypal_email", "bank_account", "card"],
            #[cfg(any(test, feature = "dev"))]
            ProviderGateway::Mock(_) => vec!["paypal_email", "bank_account", "card"],
        }
    }

    pub async fn initiate_payout(
        &self,
        order: &PayoutOrder<'_>,
    ) -> Result<InitiateResult, ProviderError> {
        match self {
            ProviderGateway::Zarinpal(client) => client.initiate_payout(order).await,
            ProviderGateway::Stripe(client) => client.initiate_payout(order).await,
            ProviderGateway::Paypal(client) => client.initiate_payout(order).await,
            #[cfg(any(test, feature = "dev"))]
            ProviderGateway::Mock(mock) => mock.initiate(order.request_id).await,
        }
    }

    pub async fn initiate_deposit(
        &self,
        order: &DepositOrder<'_>,
    ) -> Result<InitiateResult, ProviderError> {
        match self {
            ProviderGateway::Zarinpal(client) => client.initiate_deposit(order).await,
            ProviderGateway::Stripe(client) => client.initiate_deposit(order).await,
            ProviderGateway::Paypal(client) => client.initiate_deposit(order).await,
            #[cfg(any(test, feature = "dev"))]
            ProviderGateway::Mock(mock) => mock.initiate(order.request_id).await,
        }
    }

    /// Authoritative settlement check, used after callbacks and webhooks.
    pub async fn verify(&self, handle: &ProviderHandle) -> Result<ProviderOutcome, ProviderError> {
        match self {
            ProviderGateway::Zarinpal(client) => client.verify(handle).await,
            ProviderGateway::Stripe(client) => client.check_status(handle).await,
            ProviderGateway::Paypal(client) => client.check_status(handle).await,
            #[cfg(any(test, feature = "dev"))]
            ProviderGateway::Mock(mock) => mock.verify(handle).await,
        }
    }

    /// Settlement check from the periodic sweep.
    ///
    /// Zarinpal distinguishes verification (which claims the payment) from a
    /// plain status read; the other providers use the same endpoint for both.
    pub async fn poll(&self, handle: &ProviderHandle) -> Result<ProviderOutcome, ProviderError> {
        match self {
            ProviderGateway::Zarinpal(client) => client.verify(handle).await,
            ProviderGateway::Stripe(client) => client.check_status(handle).await,
            ProviderGateway::Paypal(client) => client.check_status(handle).await,
            #[cfg(any(test, feature = "dev"))]
            ProviderGateway::Mock(mock) => mock.poll(handle).await,
        }
    }
}

/// All gateways configured for this process, keyed by provider.
#[derive(Default)]
pub struct GatewayRegistry {
    gateways: HashMap<ProviderId, ProviderGateway>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from environment configuration, skipping providers
    /// whose credentials are absent or unusable.
    pub fn from_env() -> Self {
        let mut registry = Self::new();
        if ZarinpalClient::is_configured() {
            match ZarinpalClient::from_env() {
                Ok(client) => registry.insert(ProviderGateway::Zarinpal(client)),
                Err(err) => tracing::warn!(provider = %ProviderId::Zarinpal, error = %err, "skipping misconfigured provider"),
            }
        }
        if StripeClient::is_configured() {
            match StripeClient::from_env() {
                Ok(client) => registry.insert(ProviderGateway::Stripe(client)),
                Err(err) => tracing::warn!(provider = %ProviderId::Stripe, error = %err, "skipping misconfigured provider"),
            }
        }
        if PaypalClient::is_configured() {
            match PaypalClient::from_env() {
                Ok(client) => registry.insert(ProviderGateway::Paypal(client)),
                Err(err) => tracing::warn!(provider = %ProviderId::Paypal, error = %err, "skipping misconfigured provider"),
            }
        }
        registry
    }

    pub fn insert(&mut self, gateway: ProviderGateway) {
        self.gateways.insert(gateway.id(), gateway);
    }

    pub fn with(mut self, gateway: ProviderGateway) -> Self {
        self.insert(gateway);
        self
    }

    pub fn get(&self, id: ProviderId) -> Option<&ProviderGateway> {
        self.gateways.get(&id)
    }

    /// Configured provider ids in stable order.
    pub fn configured(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.gateways.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}
