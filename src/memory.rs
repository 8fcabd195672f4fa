// In-process implementation of every storage seam.
//
// Backs `STORAGE_BACKEND=memory` for local runs and is the fake store used by
// the test suite. Writes follow the same contracts as the PostgreSQL
// repositories: version-checked account transitions, per-account uniqueness of
// credit references and accrual ride ids, status compare-and-set for rides.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::error::{AppError, AppResult, LedgerError};
use crate::ledger::models::{Account, AccountTransition, EntryKind, LedgerEntry};
use crate::ledger::store::LedgerStore;
use crate::pricing::models::RateConfig;
use crate::pricing::store::RateConfigSource;
use crate::rides::models::{CancelledBy, RideChange, RideRequest, RideStatus, RideUpdate};
use crate::rides::store::{RideChangeStream, RideStore};

const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    entries: Vec<LedgerEntry>,
    rides: HashMap<String, RideRequest>,
    rider_rides: HashMap<String, i64>,
    rate_config: Option<RateConfig>,
}

/// Test hooks for forcing failures at specific points of a write
#[derive(Default)]
struct Faults {
    conflicts: AtomicU32,
    fail_entry_append: AtomicBool,
    fail_rider_updates: AtomicBool,
    fail_rate_config: AtomicBool,
}

pub struct InMemoryStore {
    state: Mutex<State>,
    changes: broadcast::Sender<RideChange>,
    faults: Faults,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            changes,
            faults: Faults::default(),
        }
    }

    fn publish(&self, change: RideChange) {
        // No subscribers is fine; the feed is fire-and-forget like NOTIFY.
        let _ = self.changes.send(change);
    }

    fn duplicate_of(state: &State, entry: &LedgerEntry) -> Option<String> {
        let key = match entry.kind {
            EntryKind::Credit => entry.external_reference.as_ref(),
            EntryKind::CommissionAccrual => entry.related_ride_id.as_ref(),
            _ => None,
        }?;

        state
            .entries
            .iter()
            .any(|existing| {
                existing.account_id == entry.account_id
                    && existing.kind == entry.kind
                    && match entry.kind {
                        EntryKind::Credit => existing.external_reference.as_ref() == Some(key),
                        _ => existing.related_ride_id.as_ref() == Some(key),
                    }
            })
            .then(|| key.clone())
    }
}

#[cfg(test)]
impl InMemoryStore {
    /// Make the next `n` account commits fail as concurrent-write conflicts
    pub fn inject_conflicts(&self, n: u32) {
        self.faults.conflicts.store(n, Ordering::SeqCst);
    }

    /// Fail the next commit after the account update is staged, before the entry lands
    pub fn fail_next_entry_append(&self) {
        self.faults.fail_entry_append.store(true, Ordering::SeqCst);
    }

    pub fn fail_rider_updates(&self, fail: bool) {
        self.faults.fail_rider_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rate_config(&self, fail: bool) {
        self.faults.fail_rate_config.store(fail, Ordering::SeqCst);
    }

    pub fn set_rate_config(&self, config: Option<RateConfig>) {
        self.state.lock().rate_config = config;
    }

    pub fn rider_rides(&self, user_id: &str) -> i64 {
        self.state.lock().rider_rides.get(user_id).copied().unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn open_account(&self, account_id: &str) -> AppResult<Account> {
        let mut state = self.state.lock();
        let account = state
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| Account::new(account_id, Utc::now()));
        Ok(account.clone())
    }

    async fn load_account(&self, account_id: &str) -> AppResult<Option<Account>> {
        Ok(self.state.lock().accounts.get(account_id).cloned())
    }

    async fn commit_transition(&self, transition: AccountTransition) -> AppResult<LedgerEntry> {
        let mut state = self.state.lock();

        let pending_conflicts = self.faults.conflicts.load(Ordering::SeqCst);
        if pending_conflicts > 0 {
            self.faults.conflicts.store(pending_conflicts - 1, Ordering::SeqCst);
            return Err(LedgerError::TransactionConflict {
                account_id: transition.account_id,
                attempts: 1,
            }
            .into());
        }

        let current = state
            .accounts
            .get(&transition.account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(transition.account_id.clone()))?;

        if current.version != transition.expected_version {
            return Err(LedgerError::TransactionConflict {
                account_id: transition.account_id,
                attempts: 1,
            }
            .into());
        }

        if let Some(reference) = Self::duplicate_of(&state, &transition.entry) {
            return Err(LedgerError::DuplicateReference {
                account_id: transition.account_id,
                reference,
            }
            .into());
        }

        // Stage the account row; it is only written back together with the entry.
        let mut staged = current.clone();
        staged.balance = transition.new_balance;
        staged.accrued_commission = transition.new_accrued_commission;
        if transition.balance_updated_at.is_some() {
            staged.last_balance_update = transition.balance_updated_at;
        }
        if transition.settled_at.is_some() {
            staged.last_settlement = transition.settled_at;
        }
        staged.version += 1;

        if self.faults.fail_entry_append.swap(false, Ordering::SeqCst) {
            return Err(AppError::Internal("ledger entry append failed".into()));
        }

        state.accounts.insert(staged.account_id.clone(), staged);
        state.entries.push(transition.entry.clone());
        Ok(transition.entry)
    }

    async fn find_credit_by_reference(
        &self,
        account_id: &str,
        external_reference: &str,
    ) -> AppResult<Option<LedgerEntry>> {
        let state = self.state.lock();
        Ok(state
            .entries
            .iter()
            .find(|e| {
                e.account_id == account_id
                    && e.kind == EntryKind::Credit
                    && e.external_reference.as_deref() == Some(external_reference)
            })
            .cloned())
    }

    async fn find_accrual_for_ride(
        &self,
        account_id: &str,
        ride_id: &str,
    ) -> AppResult<Option<LedgerEntry>> {
        let state = self.state.lock();
        Ok(state
            .entries
            .iter()
            .find(|e| {
                e.account_id == account_id
                    && e.kind == EntryKind::CommissionAccrual
                    && e.related_ride_id.as_deref() == Some(ride_id)
            })
            .cloned())
    }

    async fn list_entries(&self, account_id: &str, limit: i64) -> AppResult<Vec<LedgerEntry>> {
        let state = self.state.lock();
        Ok(state
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn accounts_with_accrued_commission(&self) -> AppResult<Vec<String>> {
        let state = self.state.lock();
        let mut ids: Vec<String> = state
            .accounts
            .values()
            .filter(|a| a.has_commission_due())
            .map(|a| a.account_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl RideStore for InMemoryStore {
    async fn insert_ride(&self, ride: &RideRequest) -> AppResult<()> {
        let mut state = self.state.lock();
        if state.rides.contains_key(&ride.ride_id) {
            return Err(AppError::Conflict(format!("Ride {} already exists", ride.ride_id)));
        }
        state.rides.insert(ride.ride_id.clone(), ride.clone());
        Ok(())
    }

    async fn get_ride(&self, ride_id: &str) -> AppResult<Option<RideRequest>> {
        Ok(self.state.lock().rides.get(ride_id).cloned())
    }

    async fn transition_ride(
        &self,
        ride_id: &str,
        expected: RideStatus,
        update: RideUpdate,
    ) -> AppResult<Option<RideRequest>> {
        let change = {
            let mut state = self.state.lock();
            let Some(ride) = state.rides.get_mut(ride_id) else {
                return Ok(None);
            };
            if ride.status != expected {
                return Ok(None);
            }

            ride.status = update.to;
            ride.updated_at = update.at;
            if let Some(driver_id) = update.driver_id {
                ride.driver_id = Some(driver_id);
            }
            if let Some(by) = update.cancelled_by {
                ride.cancelled_by = Some(by.as_str().to_string());
            }
            if let Some(reason) = update.cancel_reason {
                ride.cancel_reason = Some(reason);
            }
            (RideChange::from_transition(expected, ride), ride.clone())
        };

        self.publish(change.0);
        Ok(Some(change.1))
    }

    async fn find_stale_searching(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<RideRequest>> {
        let state = self.state.lock();
        let mut stale: Vec<RideRequest> = state
            .rides
            .values()
            .filter(|r| r.status == RideStatus::Searching && r.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn cancel_if_searching(
        &self,
        ride_ids: &[String],
        reason: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<String>> {
        let mut changes = Vec::new();
        {
            let mut state = self.state.lock();
            for ride_id in ride_ids {
                let Some(ride) = state.rides.get_mut(ride_id) else {
                    continue;
                };
                if ride.status != RideStatus::Searching {
                    continue;
                }
                ride.status = RideStatus::Cancelled;
                ride.cancelled_by = Some(CancelledBy::System.as_str().to_string());
                ride.cancel_reason = Some(reason.to_string());
                ride.updated_at = at;
                changes.push(RideChange::from_transition(RideStatus::Searching, ride));
            }
        }

        let cancelled = changes.iter().map(|c| c.ride_id.clone()).collect();
        for change in changes {
            self.publish(change);
        }
        Ok(cancelled)
    }

    async fn increment_rider_rides(&self, user_id: &str) -> AppResult<()> {
        if self.faults.fail_rider_updates.load(Ordering::SeqCst) {
            return Err(AppError::Internal("rider counter update failed".into()));
        }
        *self
            .state
            .lock()
            .rider_rides
            .entry(user_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn subscribe_changes(&self) -> AppResult<RideChangeStream> {
        let stream = BroadcastStream::new(self.changes.subscribe()).filter_map(|item| async move {
            match item {
                Ok(change) => Some(change),
                Err(e) => {
                    warn!(error = %e, "Ride change feed lagged; events were dropped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[async_trait]
impl RateConfigSource for InMemoryStore {
    async fn load_rate_config(&self) -> AppResult<Option<RateConfig>> {
        if self.faults.fail_rate_config.load(Ordering::SeqCst) {
            return Err(AppError::Internal("rate config unavailable".into()));
        }
        Ok(self.state.lock().rate_config.clone())
    }
}
