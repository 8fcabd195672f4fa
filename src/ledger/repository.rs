use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::models::*;
use super::store::LedgerStore;
use crate::error::{AppError, AppResult, LedgerError};

const ENTRY_COLUMNS: &str = "entry_id, account_id, amount, kind, resulting_balance, \
    resulting_accrued_commission, external_reference, related_ride_id, description, created_at";

/// PostgreSQL ledger - THE source of truth for balances and history
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn account_exists(&self, account_id: &str) -> AppResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE account_id = $1)")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

/// Translate constraint and serialization failures into ledger errors
fn map_write_error(err: sqlx::Error, transition: &AccountTransition) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let reference = transition
                .entry
                .external_reference
                .clone()
                .or_else(|| transition.entry.related_ride_id.clone())
                .unwrap_or_default();
            return LedgerError::DuplicateReference {
                account_id: transition.account_id.clone(),
                reference,
            }
            .into();
        }
        // serialization_failure / deadlock_detected
        if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
            return LedgerError::TransactionConflict {
                account_id: transition.account_id.clone(),
                attempts: 1,
            }
            .into();
        }
    }
    AppError::Database(err)
}

#[async_trait]
impl LedgerStore for LedgerRepository {
    async fn open_account(&self, account_id: &str) -> AppResult<Account> {
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id)
            VALUES ($1)
            ON CONFLICT (account_id) DO NOTHING
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        self.load_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()).into())
    }

    async fn load_account(&self, account_id: &str) -> AppResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, balance, accrued_commission, last_balance_update,
                   last_settlement, version, created_at
            FROM accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn commit_transition(&self, transition: AccountTransition) -> AppResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $3,
                accrued_commission = $4,
                last_balance_update = COALESCE($5, last_balance_update),
                last_settlement = COALESCE($6, last_settlement),
                version = version + 1
            WHERE account_id = $1 AND version = $2
            "#,
        )
        .bind(&transition.account_id)
        .bind(transition.expected_version)
        .bind(transition.new_balance)
        .bind(transition.new_accrued_commission)
        .bind(transition.balance_updated_at)
        .bind(transition.settled_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, &transition))?;

        if updated.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            drop(tx);
            if !self.account_exists(&transition.account_id).await? {
                return Err(LedgerError::AccountNotFound(transition.account_id).into());
            }
            debug!(
                account_id = %transition.account_id,
                expected_version = transition.expected_version,
                "Stale account version"
            );
            return Err(LedgerError::TransactionConflict {
                account_id: transition.account_id,
                attempts: 1,
            }
            .into());
        }

        let entry = &transition.entry;
        let inserted = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            INSERT INTO ledger_entries ({ENTRY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry.entry_id)
        .bind(&entry.account_id)
        .bind(entry.amount)
        .bind(entry.kind)
        .bind(entry.resulting_balance)
        .bind(entry.resulting_accrued_commission)
        .bind(&entry.external_reference)
        .bind(&entry.related_ride_id)
        .bind(&entry.description)
        .bind(entry.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, &transition))?;

        tx.commit().await.map_err(|e| map_write_error(e, &transition))?;

        Ok(inserted)
    }

    async fn find_credit_by_reference(
        &self,
        account_id: &str,
        external_reference: &str,
    ) -> AppResult<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE account_id = $1 AND kind = 'credit' AND external_reference = $2
            "#
        ))
        .bind(account_id)
        .bind(external_reference)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn find_accrual_for_ride(
        &self,
        account_id: &str,
        ride_id: &str,
    ) -> AppResult<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE account_id = $1 AND kind = 'commission_accrual' AND related_ride_id = $2
            "#
        ))
        .bind(account_id)
        .bind(ride_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn list_entries(&self, account_id: &str, limit: i64) -> AppResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY seq ASC
            LIMIT $2
            "#
        ))
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn accounts_with_accrued_commission(&self) -> AppResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT account_id
            FROM accounts
            WHERE accrued_commission > 0
            ORDER BY account_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
