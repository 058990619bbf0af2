// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! # Pending Request Sweeper
//!
//! Background task that periodically reconciles pending payment requests
//! with their providers. This keeps payouts and deposits moving server-side
//! even when no callback arrives and no user is polling.
//!
//! ## Strategy
//!
//! Every `interval` (default 30 minutes) the sweeper calls
//! [`ReconciliationEngine::sweep_pending`], which:
//! 1. Lists pending requests old enough to be worth consulting.
//! 2. Polls each one's provider and finalizes definitive outcomes.
//! 3. Re-drives payouts whose initiation never completed.
//!
//! The engine holds a try-lock around the pass, so a tick that fires while
//! a previous pass is still in flight is skipped rather than run alongside
//! it. Manual sweeps triggered over the API share the same lock.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ReconciliationEngine;
use crate::config::env_u64_or;

/// Default interval between sweep passes.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1800);

/// Background sweeper that reconciles pending requests with providers.
pub struct PendingSweeper {
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
}

impl PendingSweeper {
    /// Create a sweeper for the given engine, with the interval taken from
    /// `SWEEP_INTERVAL_SECS` when set.
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        let interval = Duration::from_secs(env_u64_or(
            "SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL.as_secs(),
        ));
        Self { engine, interval }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "pending request sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("pending request sweeper shutting down");
                return;
            }

            match self.engine.sweep_pending().await {
                Ok(report) if report.ran && report.checked > 0 => {
                    info!(
                        checked = report.checked,
                        approved = report.approved,
                        rejected = report.rejected,
                        retried_initiate = report.retried_initiate,
                        errors = report.errors,
                        "sweep pass finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "sweep pass failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("pending request sweeper shutting down");
                    return;
                }
            }
        }
    }
}
