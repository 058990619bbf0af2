// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Embedded wallet store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `accounts`: account_id → serialized AccountRecord
//! - `account_numbers`: account_number → account_id
//! - `history`: composite key (account_id|!seq) → serialized HistoryEntry
//! - `payment_requests`: request_id → serialized StoredPaymentRequest
//! - `authority_index`: provider authority → request_id
//!
//! Every balance mutation commits in one write transaction together with its
//! history entry and any registry transition, so a crash can never leave a
//! debit without its paired entry. redb serializes write transactions, which
//! is what makes concurrent mutations of one account safe: the losing writer
//! simply re-reads committed state.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::ledger::account::{generate_account_number, AccountRecord};
use crate::ledger::history::{EntryKind, EntryStatus, HistoryEntry};
use crate::ledger::Currency;
use crate::providers::{ProviderOutcome, SettlementStatus};
use crate::registry::{PaymentDirection, StoredPaymentRequest};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: account_id → serialized AccountRecord (JSON bytes).
const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");

/// Index: short account number → account_id.
const ACCOUNT_NUMBERS: TableDefinition<&str, &str> = TableDefinition::new("account_numbers");

/// History: composite key → serialized HistoryEntry (JSON bytes).
/// Key format: `account_id|!seq_be` for newest-first range scans.
const HISTORY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("history");

/// Payment requests: request_id → serialized StoredPaymentRequest.
const PAYMENT_REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("payment_requests");

/// Index: provider authority → request_id, for callback and webhook lookups.
const AUTHORITY_INDEX: TableDefinition<&str, &str> = TableDefinition::new("authority_index");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("payment request not found: {0}")]
    RequestNotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("insufficient {currency} balance: available {available}, requested {requested}")]
    InsufficientFunds {
        currency: Currency,
        available: Decimal,
        requested: Decimal,
    },

    #[error("sender and receiver accounts are the same")]
    SelfTransfer,

    #[error("ledger inconsistency: {0}")]
    Inconsistent(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// History Key Helpers
// =============================================================================

/// Build a composite key for the history table.
///
/// Format: `account_id | inverted_seq_be_bytes`
///
/// The inverted sequence ensures newest-first ordering when scanning forward.
fn history_key(account_id: &str, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(account_id.len() + 1 + 8);
    key.extend_from_slice(account_id.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!seq).to_be_bytes());
    key
}

/// Build a prefix key for range scanning all history of an account.
fn history_prefix(account_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(account_id.len() + 1);
    prefix.extend_from_slice(account_id.as_bytes());
    prefix.push(b'|');
    prefix
}

/// Build the upper bound for a range scan (prefix with all 0xFF bytes appended).
fn history_prefix_end(account_id: &str) -> Vec<u8> {
    let mut end = Vec::with_capacity(account_id.len() + 1 + 9);
    end.extend_from_slice(account_id.as_bytes());
    end.push(b'|');
    end.extend_from_slice(&[0xFF; 9]);
    end
}

// =============================================================================
// Record Helpers
// =============================================================================

fn load_account(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    account_id: &str,
) -> StoreResult<AccountRecord> {
    let bytes = {
        let guard = table
            .get(account_id)?
            .ok_or_else(|| StoreError::AccountNotFound(account_id.to_string()))?;
        guard.value().to_vec()
    };
    Ok(serde_json::from_slice(&bytes)?)
}

fn load_request(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    request_id: &str,
) -> StoreResult<StoredPaymentRequest> {
    let bytes = {
        let guard = table
            .get(request_id)?
            .ok_or_else(|| StoreError::RequestNotFound(request_id.to_string()))?;
        guard.value().to_vec()
    };
    Ok(serde_json::from_slice(&bytes)?)
}

fn load_history_entry(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    account_id: &str,
    seq: u64,
) -> StoreResult<HistoryEntry> {
    let key = history_key(account_id, seq);
    let bytes = {
        let guard = table.get(key.as_slice())?.ok_or_else(|| {
            StoreError::Inconsistent(format!(
                "history entry {seq} missing for account {account_id}"
            ))
        })?;
        guard.value().to_vec()
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// Refuse to commit a history entry whose balance snapshots disagree with
/// its amount and direction.
fn guard_conservation(entry: &HistoryEntry) -> StoreResult<()> {
    if entry.conserves_balance() {
        Ok(())
    } else {
        Err(StoreError::Inconsistent(format!(
            "history entry {} does not conserve balance",
            entry.entry_id
        )))
    }
}

// =============================================================================
// Result Types
// =============================================================================

/// Outcome of a finalization attempt.
#[derive(Debug)]
pub enum FinalizeOutcome {
    /// The definitive status was applied by this call.
    Applied(StoredPaymentRequest),
    /// The request was already terminal; nothing was written.
    AlreadyFinal(StoredPaymentRequest),
}

impl FinalizeOutcome {
    pub fn request(&self) -> &StoredPaymentRequest {
        match self {
            FinalizeOutcome::Applied(request) | FinalizeOutcome::AlreadyFinal(request) => request,
        }
    }

    pub fn into_request(self) -> StoredPaymentRequest {
        match self {
            FinalizeOutcome::Applied(request) | FinalizeOutcome::AlreadyFinal(request) => request,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, FinalizeOutcome::Applied(_))
    }
}

/// Receipt for a committed currency conversion.
#[derive(Debug, Clone)]
pub struct ConversionReceipt {
    pub account_id: String,
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub debited: Decimal,
    pub credited: Decimal,
    pub rate: Decimal,
    pub from_balance: Decimal,
    pub to_balance: Decimal,
}

/// Receipt for a committed internal transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub sender_account_id: String,
    pub receiver_account_id: String,
    pub receiver_account_number: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub sender_balance: Decimal,
}

// =============================================================================
// WalletStore
// =============================================================================

/// Embedded ACID wallet store.
pub struct WalletStore {
    db: Database,
}

impl WalletStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS)?;
            let _ = write_txn.open_table(ACCOUNT_NUMBERS)?;
            let _ = write_txn.open_table(HISTORY)?;
            let _ = write_txn.open_table(PAYMENT_REQUESTS)?;
            let _ = write_txn.open_table(AUTHORITY_INDEX)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Create a new account with zero balances in every currency.
    pub fn create_account(&self) -> StoreResult<AccountRecord> {
        let write_txn = self.db.begin_write()?;
        let record = {
            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            let mut numbers = write_txn.open_table(ACCOUNT_NUMBERS)?;

            // Re-roll the short number on the rare index collision.
            let mut number = generate_account_number();
            loop {
                let taken = numbers.get(number.as_str())?.is_some();
                if !taken {
                    break;
                }
                number = generate_account_number();
            }

            let record = AccountRecord::new(Uuid::new_v4().to_string(), number);
            accounts.insert(
                record.account_id.as_str(),
                serde_json::to_vec(&record)?.as_slice(),
            )?;
            numbers.insert(record.account_number.as_str(), record.account_id.as_str())?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    pub fn get_account(&self, account_id: &str) -> StoreResult<AccountRecord> {
        let read_txn = self.db.begin_read()?;
        let accounts = read_txn.open_table(ACCOUNTS)?;
        load_account(&accounts, account_id)
    }

    pub fn find_account_by_number(&self, account_number: &str) -> StoreResult<Option<AccountRecord>> {
        let read_txn = self.db.begin_read()?;
        let numbers = read_txn.open_table(ACCOUNT_NUMBERS)?;
        let account_id = match numbers.get(account_number)? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        let accounts = read_txn.open_table(ACCOUNTS)?;
        Ok(Some(load_account(&accounts, &account_id)?))
    }

    /// Newest-first history listing for an account.
    pub fn list_history(&self, account_id: &str, limit: usize) -> StoreResult<Vec<HistoryEntry>> {
        let read_txn = self.db.begin_read()?;
        let accounts = read_txn.open_table(ACCOUNTS)?;
        // Distinguishes "no such account" from "no history yet".
        let _ = load_account(&accounts, account_id)?;

        let history = read_txn.open_table(HISTORY)?;
        let start = history_prefix(account_id);
        let end = history_prefix_end(account_id);

        let mut entries = Vec::new();
        for item in history.range(start.as_slice()..end.as_slice())? {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(value.value())?);
            if entries.len() >= limit {
                break;
            }
        }
        Ok(entries)
    }

    // =========================================================================
    // Payout Reservation
    // =========================================================================

    /// Atomically debit the payout amount and record the pending request.
    ///
    /// The debit, its pending history entry, and the registry record commit
    /// together, all before any provider contact. On success the request's
    /// `reservation_seq` points at the entry that must be corrected when the
    /// provider settles.
    pub fn reserve_payout(&self, request: &mut StoredPaymentRequest) -> StoreResult<HistoryEntry> {
        if request.direction != PaymentDirection::Payout {
            return Err(StoreError::Inconsistent(
                "reservation requires a payout request".to_string(),
            ));
        }
        if request.status.is_terminal() || request.reservation_seq.is_some() {
            return Err(StoreError::Inconsistent(format!(
                "request {} is already reserved",
                request.request_id
            )));
        }
        let recipient = request.recipient.clone().ok_or_else(|| {
            StoreError::Inconsistent(format!("payout {} has no recipient", request.request_id))
        })?;

        let write_txn = self.db.begin_write()?;
        let entry = {
            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            let mut history = write_txn.open_table(HISTORY)?;
            let mut requests = write_txn.open_table(PAYMENT_REQUESTS)?;

            {
                if requests.get(request.request_id.as_str())?.is_some() {
                    return Err(StoreError::AlreadyExists(format!(
                        "payment request {}",
                        request.request_id
                    )));
                }
            }

            let mut account = load_account(&accounts, &request.account_id)?;
            let available = account.balance(request.currency);
            let change = account
                .try_debit(request.currency, request.amount)
                .ok_or(StoreError::InsufficientFunds {
                    currency: request.currency,
                    available,
                    requested: request.amount,
                })?;
            let seq = account.next_seq();

            let mut entry = HistoryEntry::new(
                &request.account_id,
                seq,
                EntryKind::Withdrawal,
                request.amount,
                request.currency,
                change,
                EntryStatus::Pending,
            )
            .with_provider(request.provider)
            .with_reference(recipient.reference());
            if let Some(description) = &request.description {
                entry = entry.with_description(description.clone());
            }
            guard_conservation(&entry)?;

            request.reservation_seq = Some(seq);
            request.updated_at = Utc::now();

            accounts.insert(
                account.account_id.as_str(),
                serde_json::to_vec(&account)?.as_slice(),
            )?;
            history.insert(
                history_key(&request.account_id, seq).as_slice(),
                serde_json::to_vec(&entry)?.as_slice(),
            )?;
            requests.insert(
                request.request_id.as_str(),
                serde_json::to_vec(&*request)?.as_slice(),
            )?;
            entry
        };
        write_txn.commit()?;
        Ok(entry)
    }

    /// Attach the provider-issued authority to a request and index it for
    /// callback lookups. Idempotent for the same authority; a conflicting
    /// authority is a hard error.
    pub fn attach_authority(
        &self,
        request_id: &str,
        authority: &str,
        action_url: Option<&str>,
    ) -> StoreResult<StoredPaymentRequest> {
        let write_txn = self.db.begin_write()?;
        let request = {
            let mut requests = write_txn.open_table(PAYMENT_REQUESTS)?;
            let mut authorities = write_txn.open_table(AUTHORITY_INDEX)?;

            let mut request = load_request(&requests, request_id)?;
            if let Some(previous) = &request.authority {
                if previous != authority {
                    return Err(StoreError::Inconsistent(format!(
                        "request {request_id} already carries authority {previous}"
                    )));
                }
            }
            {
                if let Some(existing) = authorities.get(authority)? {
                    if existing.value() != request_id {
                        return Err(StoreError::Inconsistent(format!(
                            "authority {authority} is already mapped to request {}",
                            existing.value()
                        )));
                    }
                }
            }

            request.authority = Some(authority.to_string());
            if action_url.is_some() {
                request.action_url = action_url.map(String::from);
            }
            request.touch_synced(Utc::now());

            authorities.insert(authority, request_id)?;
            requests.insert(request_id, serde_json::to_vec(&request)?.as_slice())?;
            request
        };
        write_txn.commit()?;
        Ok(request)
    }

    // =========================================================================
    // Deposits
    // =========================================================================

    /// Record a deposit request after a successful provider initiate.
    ///
    /// Deposits never touch the balance here; the credit happens in
    /// [`WalletStore::finalize`] once the provider confirms settlement.
    pub fn insert_deposit(&self, request: &StoredPaymentRequest) -> StoreResult<()> {
        if request.direction != PaymentDirection::Deposit {
            return Err(StoreError::Inconsistent(
                "deposit insert requires a deposit request".to_string(),
            ));
        }
        let write_txn = self.db.begin_write()?;
        {
            let accounts = write_txn.open_table(ACCOUNTS)?;
            let _ = load_account(&accounts, &request.account_id)?;

            let mut requests = write_txn.open_table(PAYMENT_REQUESTS)?;
            {
                if requests.get(request.request_id.as_str())?.is_some() {
                    return Err(StoreError::AlreadyExists(format!(
                        "payment request {}",
                        request.request_id
                    )));
                }
            }
            requests.insert(
                request.request_id.as_str(),
                serde_json::to_vec(request)?.as_slice(),
            )?;

            if let Some(authority) = &request.authority {
                let mut authorities = write_txn.open_table(AUTHORITY_INDEX)?;
                {
                    if let Some(existing) = authorities.get(authority.as_str())? {
                        if existing.value() != request.request_id {
                            return Err(StoreError::Inconsistent(format!(
                                "authority {authority} is already mapped to request {}",
                                existing.value()
                            )));
                        }
                    }
                }
                authorities.insert(authority.as_str(), request.request_id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // Request Lookups
    // =========================================================================

    pub fn get_request(&self, request_id: &str) -> StoreResult<StoredPaymentRequest> {
        let read_txn = self.db.begin_read()?;
        let requests = read_txn.open_table(PAYMENT_REQUESTS)?;
        load_request(&requests, request_id)
    }

    pub fn find_by_authority(&self, authority: &str) -> StoreResult<Option<StoredPaymentRequest>> {
        let read_txn = self.db.begin_read()?;
        let authorities = read_txn.open_table(AUTHORITY_INDEX)?;
        let request_id = match authorities.get(authority)? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        let requests = read_txn.open_table(PAYMENT_REQUESTS)?;
        Ok(Some(load_request(&requests, &request_id)?))
    }

    /// All requests of an account, newest first.
    pub fn list_requests_for_account(
        &self,
        account_id: &str,
    ) -> StoreResult<Vec<StoredPaymentRequest>> {
        let read_txn = self.db.begin_read()?;
        let requests = read_txn.open_table(PAYMENT_REQUESTS)?;
        let mut records = Vec::new();
        for item in requests.iter()? {
            let (_, value) = item?;
            let record: StoredPaymentRequest = serde_json::from_slice(value.value())?;
            if record.account_id == account_id {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Pending requests created at or before `created_before`, oldest first.
    /// `None` lists every pending request.
    pub fn list_pending(
        &self,
        created_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<StoredPaymentRequest>> {
        let read_txn = self.db.begin_read()?;
        let requests = read_txn.open_table(PAYMENT_REQUESTS)?;
        let mut records = Vec::new();
        for item in requests.iter()? {
            let (_, value) = item?;
            let record: StoredPaymentRequest = serde_json::from_slice(value.value())?;
            if record.status.is_terminal() {
                continue;
            }
            if let Some(cutoff) = created_before {
                if record.created_at > cutoff {
                    continue;
                }
            }
            records.push(record);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Record that a provider was consulted about a still-pending request.
    pub fn mark_synced(&self, request_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut requests = write_txn.open_table(PAYMENT_REQUESTS)?;
            let mut request = load_request(&requests, request_id)?;
            request.touch_synced(at);
            requests.insert(request_id, serde_json::to_vec(&request)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Apply a definitive provider outcome to a pending request.
    ///
    /// All ledger effects commit atomically with the status transition:
    /// an approved payout keeps its reservation and flips the entry to
    /// approved; a rejected payout credits the amount back and flips the
    /// entry to rejected; an approved deposit credits the account with a new
    /// entry; a rejected deposit touches no balance. Requests that are
    /// already terminal come back as [`FinalizeOutcome::AlreadyFinal`] with
    /// nothing written, which is what makes duplicate webhooks, racing
    /// callbacks, and sweep overlap harmless.
    pub fn finalize(
        &self,
        request_id: &str,
        outcome: &ProviderOutcome,
    ) -> StoreResult<FinalizeOutcome> {
        if !outcome.is_definitive() {
            return Err(StoreError::Inconsistent(
                "finalization requires a definitive outcome".to_string(),
            ));
        }

        let write_txn = self.db.begin_write()?;
        let result = {
            let mut requests = write_txn.open_table(PAYMENT_REQUESTS)?;
            let mut request = load_request(&requests, request_id)?;
            if request.status.is_terminal() {
                return Ok(FinalizeOutcome::AlreadyFinal(request));
            }

            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            let mut history = write_txn.open_table(HISTORY)?;

            match (request.direction, outcome.status) {
                (PaymentDirection::Payout, SettlementStatus::Approved) => {
                    let seq = request.reservation_seq.ok_or_else(|| {
                        StoreError::Inconsistent(format!(
                            "payout {request_id} has no reservation entry"
                        ))
                    })?;
                    let mut entry = load_history_entry(&history, &request.account_id, seq)?;
                    entry.mark_approved();
                    if let Some(authority) = &request.authority {
                        entry.authority = Some(authority.clone());
                    }
                    history.insert(
                        history_key(&request.account_id, seq).as_slice(),
                        serde_json::to_vec(&entry)?.as_slice(),
                    )?;
                    request.mark_approved(outcome.reference.clone());
                }
                (PaymentDirection::Payout, SettlementStatus::Rejected) => {
                    let seq = request.reservation_seq.ok_or_else(|| {
                        StoreError::Inconsistent(format!(
                            "payout {request_id} has no reservation entry"
                        ))
                    })?;
                    let mut entry = load_history_entry(&history, &request.account_id, seq)?;
                    let mut account = load_account(&accounts, &request.account_id)?;
                    account.credit(request.currency, request.amount);
                    entry.mark_rejected();

                    accounts.insert(
                        account.account_id.as_str(),
                        serde_json::to_vec(&account)?.as_slice(),
                    )?;
                    history.insert(
                        history_key(&request.account_id, seq).as_slice(),
                        serde_json::to_vec(&entry)?.as_slice(),
                    )?;
                    request.mark_rejected(outcome.failure_reason.clone());
                }
                (PaymentDirection::Deposit, SettlementStatus::Approved) => {
                    let mut account = load_account(&accounts, &request.account_id)?;
                    let change = account.credit(request.currency, request.amount);
                    let seq = account.next_seq();

                    let mut entry = HistoryEntry::new(
                        &request.account_id,
                        seq,
                        EntryKind::Deposit,
                        request.amount,
                        request.currency,
                        change,
                        EntryStatus::Approved,
                    )
                    .with_provider(request.provider);
                    if let Some(authority) = &request.authority {
                        entry = entry.with_authority(authority.clone());
                    }
                    if let Some(reference) = &outcome.reference {
                        entry = entry.with_reference(reference.clone());
                    }
                    if let Some(description) = &request.description {
                        entry = entry.with_description(description.clone());
                    }
                    guard_conservation(&entry)?;

                    accounts.insert(
                        account.account_id.as_str(),
                        serde_json::to_vec(&account)?.as_slice(),
                    )?;
                    history.insert(
                        history_key(&request.account_id, seq).as_slice(),
                        serde_json::to_vec(&entry)?.as_slice(),
                    )?;
                    request.mark_approved(outcome.reference.clone());
                }
                (PaymentDirection::Deposit, SettlementStatus::Rejected) => {
                    request.mark_rejected(outcome.failure_reason.clone());
                }
                (_, SettlementStatus::Pending) => {
                    return Err(StoreError::Inconsistent(
                        "finalization requires a definitive outcome".to_string(),
                    ));
                }
            }

            request.touch_synced(Utc::now());
            requests.insert(request_id, serde_json::to_vec(&request)?.as_slice())?;
            FinalizeOutcome::Applied(request)
        };
        write_txn.commit()?;
        Ok(result)
    }

    // =========================================================================
    // Conversion and Transfer
    // =========================================================================

    /// Move value between two currency balances of one account.
    ///
    /// Both legs commit atomically: the debit of `debited` from `from` and
    /// the credit of `credited` to `to`, each with its own approved history
    /// entry. The caller fixes `credited` (rate application and rounding
    /// happen before the store is involved).
    pub fn convert(
        &self,
        account_id: &str,
        from: Currency,
        to: Currency,
        debited: Decimal,
        credited: Decimal,
        rate: Decimal,
    ) -> StoreResult<ConversionReceipt> {
        if from == to {
            return Err(StoreError::Inconsistent(
                "conversion requires two distinct currencies".to_string(),
            ));
        }

        let write_txn = self.db.begin_write()?;
        let receipt = {
            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            let mut history = write_txn.open_table(HISTORY)?;

            let mut account = load_account(&accounts, account_id)?;
            let available = account.balance(from);
            let out_change =
                account
                    .try_debit(from, debited)
                    .ok_or(StoreError::InsufficientFunds {
                        currency: from,
                        available,
                        requested: debited,
                    })?;
            let in_change = account.credit(to, credited);
            let out_seq = account.next_seq();
            let in_seq = account.next_seq();

            let out_entry = HistoryEntry::new(
                account_id,
                out_seq,
                EntryKind::ConversionOut,
                debited,
                from,
                out_change,
                EntryStatus::Approved,
            )
            .with_description(format!("Converted to {credited} {to} at rate {rate}"));
            let in_entry = HistoryEntry::new(
                account_id,
                in_seq,
                EntryKind::ConversionIn,
                credited,
                to,
                in_change,
                EntryStatus::Approved,
            )
            .with_description(format!("Converted from {debited} {from} at rate {rate}"));
            guard_conservation(&out_entry)?;
            guard_conservation(&in_entry)?;

            accounts.insert(
                account.account_id.as_str(),
                serde_json::to_vec(&account)?.as_slice(),
            )?;
            history.insert(
                history_key(account_id, out_seq).as_slice(),
                serde_json::to_vec(&out_entry)?.as_slice(),
            )?;
            history.insert(
                history_key(account_id, in_seq).as_slice(),
                serde_json::to_vec(&in_entry)?.as_slice(),
            )?;

            ConversionReceipt {
                account_id: account_id.to_string(),
                from_currency: from,
                to_currency: to,
                debited,
                credited,
                rate,
                from_balance: out_change.new,
                to_balance: in_change.new,
            }
        };
        write_txn.commit()?;
        Ok(receipt)
    }

    /// Move value between two accounts in one currency.
    ///
    /// The receiver is addressed by account number. Both account mutations
    /// and both history entries commit in a single transaction.
    pub fn transfer(
        &self,
        sender_account_id: &str,
        receiver_account_number: &str,
        currency: Currency,
        amount: Decimal,
    ) -> StoreResult<TransferReceipt> {
        let write_txn = self.db.begin_write()?;
        let receipt = {
            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            let mut history = write_txn.open_table(HISTORY)?;
            let numbers = write_txn.open_table(ACCOUNT_NUMBERS)?;

            let receiver_id = {
                let guard = numbers.get(receiver_account_number)?.ok_or_else(|| {
                    StoreError::AccountNotFound(format!(
                        "account number {receiver_account_number}"
                    ))
                })?;
                guard.value().to_string()
            };
            if receiver_id == sender_account_id {
                return Err(StoreError::SelfTransfer);
            }

            let mut sender = load_account(&accounts, sender_account_id)?;
            let mut receiver = load_account(&accounts, &receiver_id)?;
            let available = sender.balance(currency);
            let out_change =
                sender
                    .try_debit(currency, amount)
                    .ok_or(StoreError::InsufficientFunds {
                        currency,
                        available,
                        requested: amount,
                    })?;
            let in_change = receiver.credit(currency, amount);
            let out_seq = sender.next_seq();
            let in_seq = receiver.next_seq();

            let out_entry = HistoryEntry::new(
                sender_account_id,
                out_seq,
                EntryKind::TransferOut,
                amount,
                currency,
                out_change,
                EntryStatus::Approved,
            )
            .with_reference(receiver.account_number.clone())
            .with_description(format!("Transfer to {}", receiver.account_number));
            let in_entry = HistoryEntry::new(
                &receiver_id,
                in_seq,
                EntryKind::TransferIn,
                amount,
                currency,
                in_change,
                EntryStatus::Approved,
            )
            .with_reference(sender.account_number.clone())
            .with_description(format!("Transfer from {}", sender.account_number));
            guard_conservation(&out_entry)?;
            guard_conservation(&in_entry)?;

            accounts.insert(
                sender.account_id.as_str(),
                serde_json::to_vec(&sender)?.as_slice(),
            )?;
            accounts.insert(
                receiver.account_id.as_str(),
                serde_json::to_vec(&receiver)?.as_slice(),
            )?;
            history.insert(
                history_key(sender_account_id, out_seq).as_slice(),
                serde_json::to_vec(&out_entry)?.as_slice(),
            )?;
            history.insert(
                history_key(&receiver_id, in_seq).as_slice(),
                serde_json::to_vec(&in_entry)?.as_slice(),
            )?;

            TransferReceipt {
                sender_account_id: sender_account_id.to_string(),
                receiver_account_id: receiver_id,
                receiver_account_number: receiver_account_number.to_string(),
                currency,
                amount,
                sender_balance: out_change.new,
            }
        };
        write_txn.commit()?;
        Ok(receipt)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{PayoutRecipient, ProviderId};
    use rust_decimal_macros::dec;

    fn temp_store() -> (WalletStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::open(&dir.path().join("test.redb")).unwrap();
        (store, dir)
    }

    fn bank_recipient() -> PayoutRecipient {
        PayoutRecipient::BankAccount {
            iban: "IR060120000000001234567891".to_string(),
            holder_name: "Alice".to_string(),
        }
    }

    /// Fund an account through the regular deposit settlement path.
    fn seed_balance(store: &WalletStore, account_id: &str, currency: Currency, amount: Decimal) {
        let mut request = StoredPaymentRequest::new_deposit(
            account_id.to_string(),
            ProviderId::Stripe,
            amount,
            currency,
            None,
        );
        request.authority = Some(format!("seed-{}", request.request_id));
        store.insert_deposit(&request).unwrap();
        store
            .finalize(&request.request_id, &ProviderOutcome::approved("seed", None))
            .unwrap();
    }

    fn pending_payout(account_id: &str, amount: Decimal, currency: Currency) -> StoredPaymentRequest {
        StoredPaymentRequest::new_payout(
            account_id.to_string(),
            ProviderId::Zarinpal,
            amount,
            currency,
            bank_recipient(),
            Some("rent".to_string()),
        )
    }

    #[test]
    fn create_and_find_account() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        assert_eq!(account.balance(Currency::IRR), Decimal::ZERO);

        let loaded = store.get_account(&account.account_id).unwrap();
        assert_eq!(loaded.account_number, account.account_number);

        let by_number = store
            .find_account_by_number(&account.account_number)
            .unwrap()
            .unwrap();
        assert_eq!(by_number.account_id, account.account_id);
        assert!(store.find_account_by_number("0000000000").unwrap().is_none());

        assert!(matches!(
            store.get_account("missing"),
            Err(StoreError::AccountNotFound(_))
        ));
    }

    #[test]
    fn deposit_settlement_credits_exactly_once() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();

        let mut request = StoredPaymentRequest::new_deposit(
            account.account_id.clone(),
            ProviderId::Stripe,
            dec!(25.50),
            Currency::USD,
            None,
        );
        request.authority = Some("pi_123".to_string());
        store.insert_deposit(&request).unwrap();

        // No credit before settlement.
        assert_eq!(
            store.get_account(&account.account_id).unwrap().balance(Currency::USD),
            Decimal::ZERO
        );

        let outcome = ProviderOutcome::approved("succeeded", Some("pi_123".to_string()));
        let first = store.finalize(&request.request_id, &outcome).unwrap();
        assert!(first.was_applied());

        // Replay is a no-op.
        let second = store.finalize(&request.request_id, &outcome).unwrap();
        assert!(!second.was_applied());

        let balance = store.get_account(&account.account_id).unwrap().balance(Currency::USD);
        assert_eq!(balance, dec!(25.50));

        let history = store.list_history(&account.account_id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, EntryKind::Deposit);
        assert_eq!(history[0].status, EntryStatus::Approved);
    }

    #[test]
    fn approved_payout_keeps_funds_reserved() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        seed_balance(&store, &account.account_id, Currency::IRR, dec!(100000));

        let mut request = pending_payout(&account.account_id, dec!(30000), Currency::IRR);
        let entry = store.reserve_payout(&mut request).unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.previous_balance, dec!(100000));
        assert_eq!(entry.new_balance, dec!(70000));
        assert_eq!(request.reservation_seq, Some(entry.seq));

        let balance = store.get_account(&account.account_id).unwrap().balance(Currency::IRR);
        assert_eq!(balance, dec!(70000));

        let outcome = ProviderOutcome::approved("100", Some("ref-991".to_string()));
        let finalized = store.finalize(&request.request_id, &outcome).unwrap();
        assert!(finalized.was_applied());
        assert_eq!(finalized.request().provider_ref.as_deref(), Some("ref-991"));

        // Balance still excludes the payout; the reservation entry flipped.
        let balance = store.get_account(&account.account_id).unwrap().balance(Currency::IRR);
        assert_eq!(balance, dec!(70000));
        let history = store.list_history(&account.account_id, 10).unwrap();
        let withdrawal = history.iter().find(|e| e.kind == EntryKind::Withdrawal).unwrap();
        assert_eq!(withdrawal.status, EntryStatus::Approved);
    }

    #[test]
    fn rejected_payout_restores_balance_in_place() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        seed_balance(&store, &account.account_id, Currency::IRR, dec!(100000));

        let mut request = pending_payout(&account.account_id, dec!(30000), Currency::IRR);
        store.reserve_payout(&mut request).unwrap();

        let outcome = ProviderOutcome::rejected("NOK", "payment was not completed");
        store.finalize(&request.request_id, &outcome).unwrap();

        let balance = store.get_account(&account.account_id).unwrap().balance(Currency::IRR);
        assert_eq!(balance, dec!(100000));

        // The reservation entry was corrected, not paired with a reversal entry.
        let history = store.list_history(&account.account_id, 10).unwrap();
        assert_eq!(history.len(), 2);
        let withdrawal = history.iter().find(|e| e.kind == EntryKind::Withdrawal).unwrap();
        assert_eq!(withdrawal.status, EntryStatus::Rejected);

        let stored = store.get_request(&request.request_id).unwrap();
        assert_eq!(
            stored.failure_reason.as_deref(),
            Some("payment was not completed")
        );
    }

    #[test]
    fn conflicting_finalizations_keep_first_result() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        seed_balance(&store, &account.account_id, Currency::IRR, dec!(100000));

        let mut request = pending_payout(&account.account_id, dec!(30000), Currency::IRR);
        store.reserve_payout(&mut request).unwrap();

        store
            .finalize(&request.request_id, &ProviderOutcome::approved("100", None))
            .unwrap();
        // A late rejection (stale webhook) must not reverse the settled payout.
        let late = store
            .finalize(
                &request.request_id,
                &ProviderOutcome::rejected("failed", "stale"),
            )
            .unwrap();
        assert!(!late.was_applied());

        let balance = store.get_account(&account.account_id).unwrap().balance(Currency::IRR);
        assert_eq!(balance, dec!(70000));
        assert_eq!(
            store.get_request(&request.request_id).unwrap().status,
            crate::registry::RequestStatus::Approved
        );
    }

    #[test]
    fn insufficient_funds_leaves_no_trace() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        seed_balance(&store, &account.account_id, Currency::IRR, dec!(10000));

        let mut request = pending_payout(&account.account_id, dec!(30000), Currency::IRR);
        let err = store.reserve_payout(&mut request).unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds { .. }));

        // Neither a request record nor a history entry was committed.
        assert!(matches!(
            store.get_request(&request.request_id),
            Err(StoreError::RequestNotFound(_))
        ));
        let history = store.list_history(&account.account_id, 10).unwrap();
        assert_eq!(history.len(), 1);
        let balance = store.get_account(&account.account_id).unwrap().balance(Currency::IRR);
        assert_eq!(balance, dec!(10000));
    }

    #[test]
    fn reservations_block_double_spending() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        seed_balance(&store, &account.account_id, Currency::IRR, dec!(50000));

        let mut first = pending_payout(&account.account_id, dec!(30000), Currency::IRR);
        store.reserve_payout(&mut first).unwrap();

        let mut second = pending_payout(&account.account_id, dec!(30000), Currency::IRR);
        let err = store.reserve_payout(&mut second).unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds { .. }));
    }

    #[test]
    fn authority_index_resolves_and_rejects_conflicts() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        seed_balance(&store, &account.account_id, Currency::IRR, dec!(100000));

        let mut request = pending_payout(&account.account_id, dec!(30000), Currency::IRR);
        store.reserve_payout(&mut request).unwrap();

        let attached = store
            .attach_authority(&request.request_id, "A0000012345", Some("https://gateway/start"))
            .unwrap();
        assert_eq!(attached.authority.as_deref(), Some("A0000012345"));
        assert!(attached.last_synced_at.is_some());

        let found = store.find_by_authority("A0000012345").unwrap().unwrap();
        assert_eq!(found.request_id, request.request_id);
        assert!(store.find_by_authority("A0000099999").unwrap().is_none());

        // Re-attaching the same authority is idempotent.
        store
            .attach_authority(&request.request_id, "A0000012345", None)
            .unwrap();

        // A different request cannot claim the same authority.
        let mut other = pending_payout(&account.account_id, dec!(10000), Currency::IRR);
        store.reserve_payout(&mut other).unwrap();
        let err = store
            .attach_authority(&other.request_id, "A0000012345", None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Inconsistent(_)));
    }

    #[test]
    fn rejected_deposit_credits_nothing() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();

        let mut request = StoredPaymentRequest::new_deposit(
            account.account_id.clone(),
            ProviderId::Paypal,
            dec!(40.00),
            Currency::EUR,
            None,
        );
        request.authority = Some("batch-77".to_string());
        store.insert_deposit(&request).unwrap();
        store
            .finalize(
                &request.request_id,
                &ProviderOutcome::rejected("DENIED", "order voided"),
            )
            .unwrap();

        let account = store.get_account(&account.account_id).unwrap();
        assert_eq!(account.balance(Currency::EUR), Decimal::ZERO);
        assert!(store.list_history(&account.account_id, 10).unwrap().is_empty());
    }

    #[test]
    fn conversion_commits_both_legs_or_neither() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        seed_balance(&store, &account.account_id, Currency::USD, dec!(100.00));

        let receipt = store
            .convert(
                &account.account_id,
                Currency::USD,
                Currency::EUR,
                dec!(25.50),
                dec!(23.35),
                dec!(0.9155),
            )
            .unwrap();
        assert_eq!(receipt.from_balance, dec!(74.50));
        assert_eq!(receipt.to_balance, dec!(23.35));

        let loaded = store.get_account(&account.account_id).unwrap();
        assert_eq!(loaded.balance(Currency::USD), dec!(74.50));
        assert_eq!(loaded.balance(Currency::EUR), dec!(23.35));

        let history = store.list_history(&account.account_id, 10).unwrap();
        assert_eq!(history.len(), 3);

        // An unfundable conversion leaves both balances untouched.
        let err = store
            .convert(
                &account.account_id,
                Currency::USD,
                Currency::EUR,
                dec!(500.00),
                dec!(457.75),
                dec!(0.9155),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds { .. }));
        let loaded = store.get_account(&account.account_id).unwrap();
        assert_eq!(loaded.balance(Currency::USD), dec!(74.50));
        assert_eq!(loaded.balance(Currency::EUR), dec!(23.35));
    }

    #[test]
    fn transfer_moves_funds_between_accounts() {
        let (store, _dir) = temp_store();
        let sender = store.create_account().unwrap();
        let receiver = store.create_account().unwrap();
        seed_balance(&store, &sender.account_id, Currency::GBP, dec!(80.00));

        let receipt = store
            .transfer(
                &sender.account_id,
                &receiver.account_number,
                Currency::GBP,
                dec!(15.25),
            )
            .unwrap();
        assert_eq!(receipt.sender_balance, dec!(64.75));
        assert_eq!(receipt.receiver_account_id, receiver.account_id);

        let receiver_balance = store
            .get_account(&receiver.account_id)
            .unwrap()
            .balance(Currency::GBP);
        assert_eq!(receiver_balance, dec!(15.25));

        let receiver_history = store.list_history(&receiver.account_id, 10).unwrap();
        assert_eq!(receiver_history.len(), 1);
        assert_eq!(receiver_history[0].kind, EntryKind::TransferIn);
        assert_eq!(
            receiver_history[0].reference.as_deref(),
            Some(sender.account_number.as_str())
        );
    }

    #[test]
    fn transfer_rejects_self_and_unknown_receiver() {
        let (store, _dir) = temp_store();
        let sender = store.create_account().unwrap();
        seed_balance(&store, &sender.account_id, Currency::GBP, dec!(80.00));

        let err = store
            .transfer(&sender.account_id, &sender.account_number, Currency::GBP, dec!(1.00))
            .unwrap_err();
        assert!(matches!(err, StoreError::SelfTransfer));

        let err = store
            .transfer(&sender.account_id, "9999999999", Currency::GBP, dec!(1.00))
            .unwrap_err();
        assert!(matches!(err, StoreError::AccountNotFound(_)));

        let balance = store.get_account(&sender.account_id).unwrap().balance(Currency::GBP);
        assert_eq!(balance, dec!(80.00));
    }

    #[test]
    fn pending_listing_filters_by_age_and_state() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        seed_balance(&store, &account.account_id, Currency::IRR, dec!(100000));

        let mut open = pending_payout(&account.account_id, dec!(10000), Currency::IRR);
        store.reserve_payout(&mut open).unwrap();

        let mut settled = pending_payout(&account.account_id, dec!(10000), Currency::IRR);
        store.reserve_payout(&mut settled).unwrap();
        store
            .finalize(&settled.request_id, &ProviderOutcome::approved("100", None))
            .unwrap();

        let all = store.list_pending(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].request_id, open.request_id);

        let recent_excluded = store
            .list_pending(Some(Utc::now() - chrono::Duration::minutes(1)))
            .unwrap();
        assert!(recent_excluded.is_empty());
    }

    #[test]
    fn history_scans_newest_first() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        seed_balance(&store, &account.account_id, Currency::IRR, dec!(100000));

        let mut request = pending_payout(&account.account_id, dec!(30000), Currency::IRR);
        store.reserve_payout(&mut request).unwrap();

        let history = store.list_history(&account.account_id, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, EntryKind::Withdrawal);
        assert_eq!(history[1].kind, EntryKind::Deposit);
        assert!(history[0].seq > history[1].seq);

        let limited = store.list_history(&account.account_id, 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn finalize_refuses_pending_outcomes() {
        let (store, _dir) = temp_store();
        let account = store.create_account().unwrap();
        seed_balance(&store, &account.account_id, Currency::IRR, dec!(100000));

        let mut request = pending_payout(&account.account_id, dec!(30000), Currency::IRR);
        store.reserve_payout(&mut request).unwrap();

        let err = store
            .finalize(&request.request_id, &ProviderOutcome::pending("in_transit"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Inconsistent(_)));
    }

    #[test]
    fn history_key_ordering() {
        // Higher sequence numbers should produce smaller composite keys
        let key_old = history_key("acct", 1);
        let key_new = history_key("acct", 2);
        assert!(key_new < key_old, "Newer entries should sort first");
    }
}
