// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

use std::sync::Arc;

use crate::reconcile::ReconciliationEngine;
use crate::storage::WalletStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<WalletStore>,
    pub engine: Arc<ReconciliationEngine>,
}

impl AppState {
    pub fn new(store: Arc<WalletStore>, engine: Arc<ReconciliationEngine>) -> Self {
        Self { store, engine }
    }
}
