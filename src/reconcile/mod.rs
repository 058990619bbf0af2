// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Payment reconciliation engine.
//!
//! The engine owns every state transition of a payment request. Payouts are
//! reserve-then-reconcile: the balance is debited and a pending history
//! entry written before any provider contact, so a crash or timeout can
//! never leave money both spendable and in flight. Deposits are the mirror
//! image and only credit after a definitive provider success.
//!
//! Finalization can arrive through three independent triggers: an inline
//! verify after the user returns from a provider redirect, an out-of-band
//! webhook, and the periodic sweep. All three funnel into the same
//! status-guarded store transition, so duplicate and racing notifications
//! collapse into no-ops.

pub mod sweep;

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::config::env_u64_or;
use crate::ledger::{convert_amount, valid_scale, Currency};
use crate::providers::{
    DepositOrder, GatewayRegistry, PayoutOrder, PayoutRecipient, ProviderError, ProviderGateway,
    ProviderId, ProviderOutcome, RecipientError,
};
use crate::rates::{RateError, RateService};
use crate::registry::{PaymentDirection, RequestStatus, StoredPaymentRequest};
use crate::storage::{ConversionReceipt, StoreError, TransferReceipt, WalletStore};

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Recipient(#[from] RecipientError),

    #[error(transparent)]
    Rate(#[from] RateError),

    #[error("provider {0} is not configured")]
    ProviderNotConfigured(ProviderId),

    #[error("provider {provider} does not support {currency}")]
    UnsupportedCurrency {
        provider: ProviderId,
        currency: Currency,
    },

    #[error("provider {provider} does not pay out to {kind} recipients")]
    UnsupportedRecipient {
        provider: ProviderId,
        kind: &'static str,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid conversion: {0}")]
    InvalidConversion(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("currency conversion is disabled: no rate service is configured")]
    ConversionDisabled,
}

// =============================================================================
// Instructions and Reports
// =============================================================================

/// What a caller asks for when requesting a payout.
#[derive(Debug, Clone)]
pub struct PayoutInstruction {
    pub account_id: String,
    pub provider: ProviderId,
    pub amount: Decimal,
    pub currency: Currency,
    pub recipient: PayoutRecipient,
    pub description: Option<String>,
}

/// What a caller asks for when opening a deposit.
#[derive(Debug, Clone)]
pub struct DepositInstruction {
    pub account_id: String,
    pub provider: ProviderId,
    pub amount: Decimal,
    pub currency: Currency,
    pub description: Option<String>,
}

/// Summary of one sweep pass.
#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct SweepReport {
    /// False when the tick was skipped because a previous sweep still ran.
    pub ran: bool,
    /// Requests consulted this pass.
    pub checked: usize,
    pub approved: usize,
    pub rejected: usize,
    /// Payouts whose failed initiation was driven again.
    pub retried_initiate: usize,
    /// Requests whose provider could not be consulted.
    pub errors: usize,
}

impl SweepReport {
    fn skipped() -> Self {
        Self::default()
    }
}

/// What happened to one request during a sweep.
enum SweepAction {
    Approved,
    Rejected,
    StillPending,
    Reinitiated,
    Failed,
}

// =============================================================================
// Engine
// =============================================================================

pub struct ReconciliationEngine {
    store: Arc<WalletStore>,
    gateways: GatewayRegistry,
    rates: Option<RateService>,
    /// Held for the duration of a sweep pass; `try_lock` keeps ticks from
    /// overlapping instead of queueing them.
    sweep_lock: Mutex<()>,
    /// Minimum age of a request's last provider consultation before the
    /// sweep consults again.
    min_resync: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<WalletStore>,
        gateways: GatewayRegistry,
        rates: Option<RateService>,
    ) -> Self {
        let min_resync = Duration::seconds(env_u64_or("SWEEP_MIN_RESYNC_SECS", 60) as i64);
        Self {
            store,
            gateways,
            rates,
            sweep_lock: Mutex::new(()),
            min_resync,
        }
    }

    #[cfg(test)]
    fn with_min_resync(mut self, secs: i64) -> Self {
        self.min_resync = Duration::seconds(secs);
        self
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    pub fn conversion_enabled(&self) -> bool {
        self.rates.is_some()
    }

    fn gateway(&self, id: ProviderId) -> Result<&ProviderGateway, EngineError> {
        self.gateways
            .get(id)
            .ok_or(EngineError::ProviderNotConfigured(id))
    }

    // -------------------------------------------------------------------------
    // Payouts
    // -------------------------------------------------------------------------

    /// Reserve funds and start a payout with the chosen provider.
    ///
    /// The debit and pending history entry commit before the provider is
    /// contacted. A definitive provider refusal reverses the reservation in
    /// the same call and surfaces the refusal; an ambiguous failure leaves
    /// the reservation in place for the sweep to drive.
    pub async fn request_payout(
        &self,
        instruction: PayoutInstruction,
    ) -> Result<StoredPaymentRequest, EngineError> {
        validate_amount(instruction.amount, instruction.currency)?;
        let gateway = self.gateway(instruction.provider)?;
        if !gateway.supports_currency(instruction.currency) {
            return Err(EngineError::UnsupportedCurrency {
                provider: instruction.provider,
                currency: instruction.currency,
            });
        }
        let recipient = instruction.recipient.normalized()?;
        if !gateway.accepts_recipient(&recipient) {
            return Err(EngineError::UnsupportedRecipient {
                provider: instruction.provider,
                kind: recipient.kind_name(),
            });
        }

        let mut request = StoredPaymentRequest::new_payout(
            instruction.account_id,
            instruction.provider,
            instruction.amount,
            instruction.currency,
            recipient.clone(),
            instruction.description.clone(),
        );
        let entry = self.store.reserve_payout(&mut request)?;
        info!(
            request_id = %request.request_id,
            account_id = %request.account_id,
            provider = %request.provider,
            amount = %request.amount,
            currency = %request.currency,
            previous_balance = %entry.previous_balance,
            new_balance = %entry.new_balance,
            "reserved payout"
        );

        let order = PayoutOrder {
            request_id: &request.request_id,
            amount: request.amount,
            currency: request.currency,
            recipient: &recipient,
            description: instruction.description.as_deref(),
        };
        match gateway.initiate_payout(&order).await {
            Ok(initiated) => {
                let updated = self.store.attach_authority(
                    &request.request_id,
                    &initiated.authority,
                    initiated.action_url.as_deref(),
                )?;
                if initiated.outcome.is_definitive() {
                    return Ok(self
                        .store
                        .finalize(&request.request_id, &initiated.outcome)?
                        .into_request());
                }
                Ok(updated)
            }
            Err(err) if err.is_retryable() => {
                // Provider state is unknown; the reservation stays and the
                // sweep retries the initiation with the same idempotency key.
                warn!(
                    request_id = %request.request_id,
                    provider = %request.provider,
                    error = %err,
                    "payout initiation did not complete; sweep will retry"
                );
                Ok(self.store.get_request(&request.request_id)?)
            }
            Err(err) => {
                let outcome = ProviderOutcome::rejected("initiate_rejected", err.to_string());
                self.store.finalize(&request.request_id, &outcome)?;
                info!(
                    request_id = %request.request_id,
                    provider = %request.provider,
                    "payout reservation reversed after provider refusal"
                );
                Err(err.into())
            }
        }
    }

    // -------------------------------------------------------------------------
    // Deposits
    // -------------------------------------------------------------------------

    /// Open a deposit with the chosen provider.
    ///
    /// Nothing is credited here; the balance moves only when a definitive
    /// success is confirmed later.
    pub async fn create_deposit(
        &self,
        instruction: DepositInstruction,
    ) -> Result<StoredPaymentRequest, EngineError> {
        validate_amount(instruction.amount, instruction.currency)?;
        let gateway = self.gateway(instruction.provider)?;
        if !gateway.supports_currency(instruction.currency) {
            return Err(EngineError::UnsupportedCurrency {
                provider: instruction.provider,
                currency: instruction.currency,
            });
        }
        // Refuse before contacting the provider when the account is unknown.
        self.store.get_account(&instruction.account_id)?;

        let mut request = StoredPaymentRequest::new_deposit(
            instruction.account_id,
            instruction.provider,
            instruction.amount,
            instruction.currency,
            instruction.description.clone(),
        );

        let order = DepositOrder {
            request_id: &request.request_id,
            amount: request.amount,
            currency: request.currency,
            description: instruction.description.as_deref(),
        };
        let initiated = gateway.initiate_deposit(&order).await?;
        request.authority = Some(initiated.authority);
        request.action_url = initiated.action_url;
        self.store.insert_deposit(&request)?;
        info!(
            request_id = %request.request_id,
            account_id = %request.account_id,
            provider = %request.provider,
            amount = %request.amount,
            currency = %request.currency,
            "opened deposit"
        );

        if initiated.outcome.is_definitive() {
            return Ok(self
                .store
                .finalize(&request.request_id, &initiated.outcome)?
                .into_request());
        }
        Ok(request)
    }

    /// Check a deposit with its provider at the user's request.
    ///
    /// Unlike the callback and webhook paths this surfaces provider
    /// unavailability, so the caller can ask the user to try again.
    pub async fn confirm_deposit(
        &self,
        request_id: &str,
    ) -> Result<StoredPaymentRequest, EngineError> {
        let request = self.store.get_request(request_id)?;
        if request.direction != PaymentDirection::Deposit {
            return Err(EngineError::InvalidRequest(format!(
                "request {request_id} is not a deposit"
            )));
        }
        if request.status.is_terminal() {
            return Ok(request);
        }
        let gateway = self.gateway(request.provider)?;
        let Some(handle) = request.provider_handle() else {
            return Err(EngineError::InvalidRequest(format!(
                "request {request_id} has no provider authority"
            )));
        };
        let outcome = gateway.verify(&handle).await?;
        self.apply_outcome(&request.request_id, &outcome)
    }

    // -------------------------------------------------------------------------
    // Finalization Triggers
    // -------------------------------------------------------------------------

    /// Finalize a request after the user returned from a provider redirect.
    ///
    /// The redirect's own status parameter is only a hint; settlement is
    /// decided by the provider's verify endpoint. Returns `None` when the
    /// authority is unknown.
    pub async fn verify_by_authority(
        &self,
        authority: &str,
        callback_status: Option<&str>,
    ) -> Result<Option<StoredPaymentRequest>, EngineError> {
        if let Some(status) = callback_status {
            info!(authority, callback_status = status, "processing provider callback");
        }
        self.resolve_by_authority(authority).await
    }

    /// Apply an out-of-band provider notification.
    ///
    /// Deliveries are at-least-once and possibly duplicated, so the carried
    /// status is treated as a hint and re-verified with the provider.
    pub async fn apply_webhook(
        &self,
        authority: &str,
        status_hint: Option<&str>,
    ) -> Result<Option<StoredPaymentRequest>, EngineError> {
        info!(authority, status_hint = ?status_hint, "processing provider webhook");
        self.resolve_by_authority(authority).await
    }

    async fn resolve_by_authority(
        &self,
        authority: &str,
    ) -> Result<Option<StoredPaymentRequest>, EngineError> {
        let Some(request) = self.store.find_by_authority(authority)? else {
            return Ok(None);
        };
        // Terminal requests short-circuit before any provider call; this is
        // what makes duplicate notifications cheap no-ops.
        if request.status.is_terminal() {
            return Ok(Some(request));
        }
        let gateway = self.gateway(request.provider)?;
        let Some(handle) = request.provider_handle() else {
            return Ok(Some(request));
        };
        match gateway.verify(&handle).await {
            Ok(outcome) => Ok(Some(self.apply_outcome(&request.request_id, &outcome)?)),
            Err(err) => {
                warn!(
                    request_id = %request.request_id,
                    provider = %request.provider,
                    error = %err,
                    "verification did not complete; sweep will retry"
                );
                self.store.mark_synced(&request.request_id, Utc::now())?;
                Ok(Some(self.store.get_request(&request.request_id)?))
            }
        }
    }

    fn apply_outcome(
        &self,
        request_id: &str,
        outcome: &ProviderOutcome,
    ) -> Result<StoredPaymentRequest, EngineError> {
        if outcome.is_definitive() {
            let finalized = self.store.finalize(request_id, outcome)?;
            if finalized.was_applied() {
                info!(
                    request_id,
                    status = %finalized.request().status,
                    raw_status = %outcome.raw_status,
                    "request finalized"
                );
            }
            Ok(finalized.into_request())
        } else {
            self.store.mark_synced(request_id, Utc::now())?;
            Ok(self.store.get_request(request_id)?)
        }
    }

    // -------------------------------------------------------------------------
    // Sweep
    // -------------------------------------------------------------------------

    /// Poll every pending request that has not been consulted recently.
    ///
    /// Only one sweep runs at a time; a tick that arrives while another is
    /// in flight returns immediately with `ran: false`.
    pub async fn sweep_pending(&self) -> Result<SweepReport, EngineError> {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            info!("previous sweep still in flight; skipping this tick");
            return Ok(SweepReport::skipped());
        };

        let now = Utc::now();
        let pending = self.store.list_pending(Some(now - self.min_resync))?;

        let mut report = SweepReport {
            ran: true,
            ..SweepReport::default()
        };
        for request in pending {
            if let Some(synced) = request.last_synced_at {
                if now - synced < self.min_resync {
                    continue;
                }
            }
            report.checked += 1;
            match self.sync_pending_request(&request).await {
                Ok(SweepAction::Approved) => report.approved += 1,
                Ok(SweepAction::Rejected) => report.rejected += 1,
                Ok(SweepAction::Reinitiated) => report.retried_initiate += 1,
                Ok(SweepAction::StillPending) => {}
                Ok(SweepAction::Failed) => report.errors += 1,
                Err(err) => {
                    report.errors += 1;
                    warn!(
                        request_id = %request.request_id,
                        provider = %request.provider,
                        error = %err,
                        "sweep could not sync request"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn sync_pending_request(
        &self,
        request: &StoredPaymentRequest,
    ) -> Result<SweepAction, EngineError> {
        let gateway = self.gateway(request.provider)?;

        let Some(handle) = request.provider_handle() else {
            return self.reinitiate_payout(gateway, request).await;
        };

        match gateway.poll(&handle).await {
            Ok(outcome) if outcome.is_definitive() => {
                let finalized = self.store.finalize(&request.request_id, &outcome)?;
                info!(
                    request_id = %request.request_id,
                    status = %finalized.request().status,
                    raw_status = %outcome.raw_status,
                    applied = finalized.was_applied(),
                    "sweep finalized request"
                );
                Ok(match finalized.request().status {
                    RequestStatus::Rejected => SweepAction::Rejected,
                    _ => SweepAction::Approved,
                })
            }
            Ok(_) => {
                self.store.mark_synced(&request.request_id, Utc::now())?;
                Ok(SweepAction::StillPending)
            }
            Err(err) => {
                warn!(
                    request_id = %request.request_id,
                    provider = %request.provider,
                    error = %err,
                    "sweep poll did not complete"
                );
                self.store.mark_synced(&request.request_id, Utc::now())?;
                Ok(SweepAction::Failed)
            }
        }
    }

    /// Drive a payout whose initiation never completed.
    ///
    /// The original request id is reused as the idempotency key, so a
    /// provider that did record the first attempt returns the same payment
    /// instead of creating another. Errors here never reverse the
    /// reservation: a rejection may only be a duplicate-submission artifact
    /// of the earlier ambiguous attempt, and reversal is reserved for
    /// definitive verify and poll outcomes.
    async fn reinitiate_payout(
        &self,
        gateway: &ProviderGateway,
        request: &StoredPaymentRequest,
    ) -> Result<SweepAction, EngineError> {
        if request.direction != PaymentDirection::Payout {
            self.store.mark_synced(&request.request_id, Utc::now())?;
            return Ok(SweepAction::Failed);
        }
        let Some(recipient) = request.recipient.as_ref() else {
            return Err(EngineError::InvalidRequest(format!(
                "payout {} has no recipient",
                request.request_id
            )));
        };

        let order = PayoutOrder {
            request_id: &request.request_id,
            amount: request.amount,
            currency: request.currency,
            recipient,
            description: request.description.as_deref(),
        };
        match gateway.initiate_payout(&order).await {
            Ok(initiated) => {
                self.store.attach_authority(
                    &request.request_id,
                    &initiated.authority,
                    initiated.action_url.as_deref(),
                )?;
                if initiated.outcome.is_definitive() {
                    let finalized = self.store.finalize(&request.request_id, &initiated.outcome)?;
                    return Ok(match finalized.request().status {
                        RequestStatus::Rejected => SweepAction::Rejected,
                        _ => SweepAction::Approved,
                    });
                }
                info!(
                    request_id = %request.request_id,
                    authority = %initiated.authority,
                    "payout initiation retried"
                );
                Ok(SweepAction::Reinitiated)
            }
            Err(err) => {
                warn!(
                    request_id = %request.request_id,
                    provider = %request.provider,
                    error = %err,
                    "payout initiation retry did not complete"
                );
                self.store.mark_synced(&request.request_id, Utc::now())?;
                Ok(SweepAction::Failed)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Conversion and Transfer
    // -------------------------------------------------------------------------

    /// Convert between two balances of one account at the current rate.
    pub async fn convert(
        &self,
        account_id: &str,
        from: Currency,
        to: Currency,
        amount: Decimal,
    ) -> Result<ConversionReceipt, EngineError> {
        validate_amount(amount, from)?;
        if from == to {
            return Err(EngineError::InvalidConversion(
                "source and destination currencies are the same".to_string(),
            ));
        }
        let rates = self.rates.as_ref().ok_or(EngineError::ConversionDisabled)?;
        let rate = rates.quote(from, to).await?;
        let credited = convert_amount(amount, rate, to);
        if credited <= Decimal::ZERO {
            return Err(EngineError::InvalidConversion(format!(
                "converting {amount} {from} at rate {rate} yields nothing in {to}"
            )));
        }

        let receipt = self.store.convert(account_id, from, to, amount, credited, rate)?;
        info!(
            account_id,
            from = %from,
            to = %to,
            debited = %amount,
            credited = %credited,
            rate = %rate,
            "converted currency"
        );
        Ok(receipt)
    }

    /// Move funds between two local accounts.
    pub fn transfer(
        &self,
        sender_account_id: &str,
        receiver_account_number: &str,
        currency: Currency,
        amount: Decimal,
    ) -> Result<TransferReceipt, EngineError> {
        validate_amount(amount, currency)?;
        let receipt = self.store.transfer(
            sender_account_id,
            receiver_account_number,
            currency,
            amount,
        )?;
        info!(
            sender_account_id,
            receiver_account_number,
            currency = %currency,
            amount = %amount,
            "transferred funds"
        );
        Ok(receipt)
    }
}

fn validate_amount(amount: Decimal, currency: Currency) -> Result<(), EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if !valid_scale(amount, currency) {
        return Err(EngineError::InvalidAmount(format!(
            "amount {amount} has more decimal places than {currency} allows"
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
