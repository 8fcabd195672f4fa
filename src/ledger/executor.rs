use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{
    Account, AccountTransition, LedgerEntry, LedgerOperation, LedgerOutcome, LedgerReceipt,
};
use super::store::LedgerStore;
use crate::error::{AppError, AppResult, LedgerError};

/// Bounded retry with exponential backoff for optimistic-concurrency conflicts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// The single write path for account balances and history.
///
/// Each call reads an account snapshot, computes the next state and commits the
/// account update together with exactly one ledger entry. A stale snapshot is
/// detected by the store through the account version and retried here.
pub struct LedgerTransactionExecutor {
    store: Arc<dyn LedgerStore>,
    policy: RetryPolicy,
}

impl LedgerTransactionExecutor {
    pub fn new(store: Arc<dyn LedgerStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn apply(&self, account_id: &str, op: LedgerOperation) -> AppResult<LedgerOutcome> {
        let op = normalize(op)?;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.try_apply(account_id, &op).await {
                Err(AppError::Ledger(LedgerError::TransactionConflict { .. })) if attempt < max_attempts => {
                    warn!(
                        account_id,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        kind = %op.kind(),
                        "Ledger write conflict, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                }
                Err(AppError::Ledger(LedgerError::TransactionConflict { .. })) => {
                    warn!(account_id, attempts = attempt, kind = %op.kind(), "Ledger write conflict, giving up");
                    return Err(LedgerError::TransactionConflict {
                        account_id: account_id.to_string(),
                        attempts: attempt,
                    }
                    .into());
                }
                other => return other,
            }
        }
    }

    async fn try_apply(&self, account_id: &str, op: &LedgerOperation) -> AppResult<LedgerOutcome> {
        let account = self
            .store
            .load_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

        let Some(transition) = plan_transition(&account, op, Utc::now()) else {
            debug!(account_id, kind = %op.kind(), "Nothing to apply");
            return Ok(LedgerOutcome::NoOp);
        };

        let entry = self.store.commit_transition(transition).await?;

        info!(
            account_id,
            entry_id = %entry.entry_id,
            kind = %entry.kind,
            amount = %entry.amount,
            balance = %entry.resulting_balance,
            accrued_commission = %entry.resulting_accrued_commission,
            "Ledger entry committed"
        );

        Ok(LedgerOutcome::Applied(LedgerReceipt {
            entry_id: entry.entry_id,
            kind: entry.kind,
            amount: entry.amount,
            balance: entry.resulting_balance,
            accrued_commission: entry.resulting_accrued_commission,
        }))
    }
}

/// Amounts are kept at two decimal places and must be positive
fn normalize(op: LedgerOperation) -> AppResult<LedgerOperation> {
    fn positive(amount: Decimal) -> AppResult<Decimal> {
        let amount = amount.round_dp(2);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!("amount must be positive, got {}", amount)).into());
        }
        Ok(amount)
    }

    Ok(match op {
        LedgerOperation::Credit { amount, external_ref, description } => {
            if external_ref.trim().is_empty() {
                return Err(AppError::InvalidInput("credit requires an external reference".into()));
            }
            LedgerOperation::Credit { amount: positive(amount)?, external_ref, description }
        }
        LedgerOperation::Debit { amount, description } => {
            LedgerOperation::Debit { amount: positive(amount)?, description }
        }
        LedgerOperation::AccrueCommission { amount, ride_id } => {
            LedgerOperation::AccrueCommission { amount: positive(amount)?, ride_id }
        }
        settle @ LedgerOperation::SettleAccrued { .. } => settle,
    })
}

/// Compute the account transition for `op` against a snapshot.
/// `None` means the operation has no effect (nothing accrued to settle).
pub fn plan_transition(
    account: &Account,
    op: &LedgerOperation,
    now: DateTime<Utc>,
) -> Option<AccountTransition> {
    let mut balance = account.balance;
    let mut accrued = account.accrued_commission;
    let mut external_reference = None;
    let mut related_ride_id = None;
    let mut settled_at = None;

    let (amount, description) = match op {
        LedgerOperation::Credit { amount, external_ref, description } => {
            balance += *amount;
            external_reference = Some(external_ref.clone());
            (*amount, description.clone())
        }
        LedgerOperation::Debit { amount, description } => {
            balance -= *amount;
            (*amount, description.clone())
        }
        LedgerOperation::AccrueCommission { amount, ride_id } => {
            accrued += *amount;
            related_ride_id = Some(ride_id.clone());
            (*amount, format!("Commission accrued for ride {}", ride_id))
        }
        LedgerOperation::SettleAccrued { description } => {
            if accrued <= Decimal::ZERO {
                return None;
            }
            let due = accrued;
            balance -= due;
            accrued = Decimal::ZERO;
            settled_at = Some(now);
            (due, description.clone())
        }
    };

    let kind = op.kind();
    Some(AccountTransition {
        account_id: account.account_id.clone(),
        expected_version: account.version,
        new_balance: balance,
        new_accrued_commission: accrued,
        balance_updated_at: kind.affects_balance().then_some(now),
        settled_at,
        entry: LedgerEntry {
            entry_id: Uuid::new_v4(),
            account_id: account.account_id.clone(),
            amount,
            kind,
            resulting_balance: balance,
            resulting_accrued_commission: accrued,
            external_reference,
            related_ride_id,
            description,
            created_at: now,
        },
    })
}
