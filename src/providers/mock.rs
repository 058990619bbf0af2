// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Scriptable in-memory gateway for tests and dev builds.
//!
//! Each call pops the next scripted result from its queue; an empty queue
//! yields a benign default (a fresh pending authority for initiate, a
//! pending outcome for verify and poll). An optional delay simulates a slow
//! provider for overlap tests. Clones share the same script and counters.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{InitiateResult, ProviderError, ProviderHandle, ProviderId, ProviderOutcome};

#[derive(Clone)]
pub struct MockGateway {
    inner: Arc<MockInner>,
}

struct MockInner {
    id: ProviderId,
    initiate_queue: Mutex<VecDeque<Result<InitiateResult, ProviderError>>>,
    verify_queue: Mutex<VecDeque<Result<ProviderOutcome, ProviderError>>>,
    poll_queue: Mutex<VecDeque<Result<ProviderOutcome, ProviderError>>>,
    initiate_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockGateway {
    pub fn new(id: ProviderId) -> Self {
        Self {
            inner: Arc::new(MockInner {
                id,
                initiate_queue: Mutex::new(VecDeque::new()),
                verify_queue: Mutex::new(VecDeque::new()),
                poll_queue: Mutex::new(VecDeque::new()),
                initiate_calls: AtomicUsize::new(0),
                verify_calls: AtomicUsize::new(0),
                poll_calls: AtomicUsize::new(0),
                delay: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ProviderId {
        self.inner.id
    }

    pub fn push_initiate(&self, result: Result<InitiateResult, ProviderError>) {
        self.inner.initiate_queue.lock().unwrap().push_back(result);
    }

    pub fn push_verify(&self, result: Result<ProviderOutcome, ProviderError>) {
        self.inner.verify_queue.lock().unwrap().push_back(result);
    }

    pub fn push_poll(&self, result: Result<ProviderOutcome, ProviderError>) {
        self.inner.poll_queue.lock().unwrap().push_back(result);
    }

    /// Make every subsequent call pause first, as a slow provider would.
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock().unwrap() = Some(delay);
    }

    pub fn initiate_calls(&self) -> usize {
        self.inner.initiate_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.inner.verify_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.inner.poll_calls.load(Ordering::SeqCst)
    }

    pub async fn initiate(&self, _request_id: &str) -> Result<InitiateResult, ProviderError> {
        let call = self.inner.initiate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.apply_delay().await;
        let scripted = self.inner.initiate_queue.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(InitiateResult {
                authority: format!("mock-{call}"),
                action_url: None,
                outcome: ProviderOutcome::pending("mock_pending"),
            })
        })
    }

    pub async fn verify(&self, _handle: &ProviderHandle) -> Result<ProviderOutcome, ProviderError> {
        self.inner.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_delay().await;
        let scripted = self.inner.verify_queue.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(ProviderOutcome::pending("mock_pending")))
    }

    pub async fn poll(&self, _handle: &ProviderHandle) -> Result<ProviderOutcome, ProviderError> {
        self.inner.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_delay().await;
        let scripted = self.inner.poll_queue.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(ProviderOutcome::pending("mock_pending")))
    }

    async fn apply_delay(&self) {
        let delay = *self.inner.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::SettlementStatus;

    #[tokio::test]
    async fn scripted_results_pop_in_order_then_default() {
        let mock = MockGateway::new(ProviderId::Stripe);
        mock.push_verify(Ok(ProviderOutcome::approved("paid", Some("txn_1".into()))));
        mock.push_verify(Err(ProviderError::Unavailable("down".into())));

        let handle = ProviderHandle {
            authority: "po_1".to_string(),
            amount: rust_decimal_macros::dec!(10.00),
            currency: crate::ledger::Currency::USD,
            direction: crate::registry::PaymentDirection::Payout,
        };

        let first = mock.verify(&handle).await.unwrap();
        assert_eq!(first.status, SettlementStatus::Approved);

        let second = mock.verify(&handle).await.unwrap_err();
        assert!(second.is_retryable());

        let third = mock.verify(&handle).await.unwrap();
        assert!(!third.is_definitive());
        assert_eq!(mock.verify_calls(), 3);
    }

    #[tokio::test]
    async fn default_initiate_mints_distinct_authorities() {
        let mock = MockGateway::new(ProviderId::Paypal);
        let a = mock.initiate("req-1").await.unwrap();
        let b = mock.initiate("req-2").await.unwrap();
        assert_ne!(a.authority, b.authority);
        assert!(!a.outcome.is_definitive());
    }
}
