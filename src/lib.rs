// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Payvault - Multi-Currency Wallet Service
//!
//! This crate provides a custodial multi-currency wallet backed by an
//! embedded ACID store, paying out through external payment providers and
//! reconciling settlement state asynchronously.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `ledger` - currencies, account balances, history entries
//! - `registry` - payment request records and their lifecycle
//! - `providers` - provider gateway adapters (Zarinpal, Stripe, PayPal)
//! - `rates` - exchange-rate quoting for currency conversion
//! - `reconcile` - the reconciliation engine and the periodic sweep
//! - `storage` - embedded redb wallet store

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod providers;
pub mod rates;
pub mod reconcile;
pub mod registry;
pub mod state;
pub mod storage;
