// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! # Persistent Storage Module
//!
//! One embedded redb database holds the accounts, the balance history, and
//! the payment request registry. Keeping all three in the same database is
//! deliberate: a payout reservation is a balance debit, a history entry, and
//! a registry record, and they must commit or abort together.

pub mod database;

pub use database::{
    ConversionReceipt, FinalizeOutcome, StoreError, StoreResult, TransferReceipt, WalletStore,
};
