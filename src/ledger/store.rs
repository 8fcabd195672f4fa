use async_trait::async_trait;

use super::models::{Account, AccountTransition, LedgerEntry};
use crate::error::AppResult;

/// Storage seam for accounts and their append-only history.
///
/// `commit_transition` is the only write path for existing accounts. It must
/// apply the account update and the entry append together or not at all, and
/// must fail with:
/// - `LedgerError::AccountNotFound` when the account row is missing,
/// - `LedgerError::TransactionConflict` when `expected_version` is stale,
/// - `LedgerError::DuplicateReference` when the entry violates the per-account
///   uniqueness of credit references or accrual ride ids.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create a zero account if missing; returns the current row either way.
    async fn open_account(&self, account_id: &str) -> AppResult<Account>;

    async fn load_account(&self, account_id: &str) -> AppResult<Option<Account>>;

    async fn commit_transition(&self, transition: AccountTransition) -> AppResult<LedgerEntry>;

    async fn find_credit_by_reference(
        &self,
        account_id: &str,
        external_reference: &str,
    ) -> AppResult<Option<LedgerEntry>>;

    async fn find_accrual_for_ride(
        &self,
        account_id: &str,
        ride_id: &str,
    ) -> AppResult<Option<LedgerEntry>>;

    /// Entries in creation order, oldest first
    async fn list_entries(&self, account_id: &str, limit: i64) -> AppResult<Vec<LedgerEntry>>;

    /// Ids of accounts whose accrued commission is positive
    async fn accounts_with_accrued_commission(&self) -> AppResult<Vec<String>>;
}
