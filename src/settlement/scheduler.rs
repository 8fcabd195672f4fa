// Settlement Scheduler - realizes accrued commission as balance debits
//
// Daily strategy:
// - Executes at the configured local time in the operating timezone (23:59 IST)
// - Enumerates accounts with commission due
// - One ledger transaction per account, bounded fan-out
// - Safe to re-run: settled accounts have nothing accrued

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::ledger::models::{LedgerOperation, LedgerOutcome};
use crate::ledger::LedgerTransactionExecutor;

/// Settlement schedule configuration
#[derive(Debug, Clone)]
pub struct SettlementScheduleConfig {
    /// Local hour to execute settlement (0-23)
    pub execution_hour: u32,
    pub execution_minute: u32,
    /// Operating timezone the execution time is expressed in
    pub offset: FixedOffset,
    /// Accounts settled in parallel
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

impl RunTrigger {
    fn description(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "Daily commission settlement",
            RunTrigger::Manual => "Manual commission settlement",
        }
    }
}

/// Settlement run result
#[derive(Debug, Clone, Serialize)]
pub struct SettlementRunReport {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub considered: usize,
    pub settled: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_settled: Decimal,
}

/// Settlement scheduler - coordinates the daily commission settlement
pub struct SettlementScheduler {
    config: SettlementScheduleConfig,
    executor: Arc<LedgerTransactionExecutor>,
}

impl SettlementScheduler {
    pub fn new(config: SettlementScheduleConfig, executor: Arc<LedgerTransactionExecutor>) -> Self {
        Self { config, executor }
    }

    /// Settle every account with commission due
    pub async fn run_once(&self, trigger: RunTrigger) -> AppResult<SettlementRunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, ?trigger, "🔄 Starting commission settlement run");

        let account_ids = self
            .executor
            .store()
            .accounts_with_accrued_commission()
            .await
            .map_err(|e| {
                error!(%run_id, error = %e, "❌ Could not enumerate accounts for settlement");
                e
            })?;

        let considered = account_ids.len();
        let description = trigger.description();

        let results: Vec<(String, AppResult<LedgerOutcome>)> = stream::iter(account_ids)
            .map(|account_id| {
                let executor = self.executor.clone();
                async move {
                    let op = LedgerOperation::SettleAccrued {
                        description: description.to_string(),
                    };
                    let result = executor.apply(&account_id, op).await;
                    (account_id, result)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut settled = 0;
        let mut skipped = 0;
        let mut failed = 0;
        let mut total_settled = Decimal::ZERO;
        for (account_id, result) in results {
            match result {
                Ok(LedgerOutcome::Applied(receipt)) => {
                    settled += 1;
                    total_settled += receipt.amount;
                    info!(%run_id, %account_id, amount = %receipt.amount, balance = %receipt.balance, "Settled account");
                }
                Ok(LedgerOutcome::NoOp) => {
                    skipped += 1;
                    info!(%run_id, %account_id, "No commission due (already settled)");
                }
                Err(e) => {
                    failed += 1;
                    error!(%run_id, %account_id, error = %e, "❌ Settlement failed for account");
                }
            }
        }

        let report = SettlementRunReport {
            run_id,
            trigger,
            started_at,
            finished_at: Utc::now(),
            considered,
            settled,
            skipped,
            failed,
            total_settled,
        };
        info!(
            %run_id,
            considered,
            settled,
            skipped,
            failed,
            total_settled = %total_settled,
            "✓ Settlement run completed"
        );
        Ok(report)
    }

    /// Start the daily settlement loop (runs in background)
    pub fn start(self: Arc<Self>) -> AppResult<JoinHandle<()>> {
        let at = NaiveTime::from_hms_opt(self.config.execution_hour, self.config.execution_minute, 0)
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Invalid settlement time {:02}:{:02}",
                    self.config.execution_hour, self.config.execution_minute
                ))
            })?;

        Ok(tokio::spawn(async move { self.run_daily_scheduler(at).await }))
    }

    async fn run_daily_scheduler(&self, at: NaiveTime) {
        loop {
            let now = Utc::now();
            let next_execution = calculate_next_daily_execution(now, at, self.config.offset);
            let duration_until_execution = next_execution.signed_duration_since(now);

            if let Ok(wait) = duration_until_execution.to_std() {
                info!(
                    "⏰ Next settlement scheduled for: {} ({})",
                    next_execution.with_timezone(&self.config.offset).format("%Y-%m-%d %H:%M:%S"),
                    self.config.offset
                );
                tokio::time::sleep(wait).await;
            }

            if let Err(e) = self.run_once(RunTrigger::Scheduled).await {
                warn!(error = %e, "Scheduled settlement run aborted; next run tomorrow");
            }
        }
    }
}

/// Next occurrence of local time `at` in `offset`, strictly after `now`
pub fn calculate_next_daily_execution(
    now: DateTime<Utc>,
    at: NaiveTime,
    offset: FixedOffset,
) -> DateTime<Utc> {
    let local_now = now.with_timezone(&offset).naive_local();
    let mut next = local_now.date().and_time(at);

    // If execution time has passed today, schedule for tomorrow
    if next <= local_now {
        next += chrono::Duration::days(1);
    }

    let utc = next - chrono::Duration::seconds(offset.local_minus_utc() as i64);
    Utc.from_utc_datetime(&utc)
}
