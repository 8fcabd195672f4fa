use futures::StreamExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult, LedgerError};
use crate::ledger::models::LedgerOperation;
use crate::ledger::LedgerTransactionExecutor;
use crate::pricing::store::RateConfigSource;
use crate::rides::models::RideChange;
use crate::rides::store::{RideChangeStream, RideStore};

#[derive(Debug, Clone)]
pub struct CommissionConfig {
    /// Used when the rate document carries no commission percent
    pub default_percent: Decimal,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            default_percent: dec!(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingDriver,
    ZeroCommission,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccrualOutcome {
    /// The change was not a transition into `completed`
    NotCompletion,
    Skipped(SkipReason),
    AlreadyAccrued,
    Accrued { driver_id: String, commission: Decimal },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuxiliaryOutcome {
    NotRun,
    Updated,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccrualReport {
    pub primary: AccrualOutcome,
    pub auxiliary: AuxiliaryOutcome,
}

impl AccrualReport {
    fn primary_only(primary: AccrualOutcome) -> Self {
        Self {
            primary,
            auxiliary: AuxiliaryOutcome::NotRun,
        }
    }
}

pub fn commission_for(fare: Decimal, percent: Decimal) -> Decimal {
    (fare * percent / dec!(100)).round_dp(2)
}

/// Accrues platform commission when a ride completes
pub struct CommissionAccrualTrigger {
    executor: Arc<LedgerTransactionExecutor>,
    rides: Arc<dyn RideStore>,
    rates: Arc<dyn RateConfigSource>,
    config: CommissionConfig,
}

impl CommissionAccrualTrigger {
    pub fn new(
        executor: Arc<LedgerTransactionExecutor>,
        rides: Arc<dyn RideStore>,
        rates: Arc<dyn RateConfigSource>,
        config: CommissionConfig,
    ) -> Self {
        Self {
            executor,
            rides,
            rates,
            config,
        }
    }

    /// The default applies only when no percent is configured; read failures propagate
    async fn commission_percent(&self) -> AppResult<Decimal> {
        let config = self.rates.load_rate_config().await?;
        Ok(config
            .and_then(|config| config.commission_percent)
            .unwrap_or(self.config.default_percent))
    }

    pub async fn on_ride_change(&self, change: &RideChange) -> AppResult<AccrualReport> {
        if !change.is_completion() {
            return Ok(AccrualReport::primary_only(AccrualOutcome::NotCompletion));
        }

        let Some(driver_id) = change.driver_id.as_deref().filter(|d| !d.is_empty()) else {
            error!(ride_id = %change.ride_id, "Ride completed without a driver");
            return Ok(AccrualReport::primary_only(AccrualOutcome::Skipped(
                SkipReason::MissingDriver,
            )));
        };

        let fare = change.billable_fare();
        let percent = self.commission_percent().await?;
        let commission = commission_for(fare, percent);
        if commission <= Decimal::ZERO {
            info!(ride_id = %change.ride_id, %fare, "No commission due for ride");
            return Ok(AccrualReport::primary_only(AccrualOutcome::Skipped(
                SkipReason::ZeroCommission,
            )));
        }

        if self
            .executor
            .store()
            .find_accrual_for_ride(driver_id, &change.ride_id)
            .await?
            .is_some()
        {
            debug!(ride_id = %change.ride_id, driver_id, "Commission already accrued");
            return Ok(AccrualReport::primary_only(AccrualOutcome::AlreadyAccrued));
        }

        let op = LedgerOperation::AccrueCommission {
            amount: commission,
            ride_id: change.ride_id.clone(),
        };
        match self.executor.apply(driver_id, op).await {
            Ok(_) => {}
            Err(AppError::Ledger(LedgerError::DuplicateReference { .. })) => {
                debug!(ride_id = %change.ride_id, driver_id, "Concurrent delivery already accrued");
                return Ok(AccrualReport::primary_only(AccrualOutcome::AlreadyAccrued));
            }
            Err(e) => return Err(e),
        }

        info!(
            ride_id = %change.ride_id,
            driver_id,
            %fare,
            %percent,
            %commission,
            "Commission accrued"
        );

        let auxiliary = match change.user_id.as_deref() {
            None => AuxiliaryOutcome::NotRun,
            Some(user_id) => match self.rides.increment_rider_rides(user_id).await {
                Ok(()) => AuxiliaryOutcome::Updated,
                Err(e) => {
                    warn!(ride_id = %change.ride_id, user_id, error = %e, "Failed to update rider ride count");
                    AuxiliaryOutcome::Failed(e.to_string())
                }
            },
        };

        Ok(AccrualReport {
            primary: AccrualOutcome::Accrued {
                driver_id: driver_id.to_string(),
                commission,
            },
            auxiliary,
        })
    }

    /// Consume the ride change feed until it ends
    pub async fn run(self: Arc<Self>, mut feed: RideChangeStream) {
        info!("Commission accrual trigger listening for ride completions");
        while let Some(change) = feed.next().await {
            if let Err(e) = self.on_ride_change(&change).await {
                error!(ride_id = %change.ride_id, error = %e, "Commission accrual failed");
            }
        }
        warn!("Ride change feed ended; commission accrual stopped");
    }

    pub fn start(self: Arc<Self>, feed: RideChangeStream) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(feed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerStore, RetryPolicy};
    use crate::memory::InMemoryStore;
    use crate::pricing::models::RateConfig;
    use crate::rides::models::RideStatus;
    use std::time::Duration;

    fn setup() -> (Arc<InMemoryStore>, Arc<CommissionAccrualTrigger>) {
        let store = Arc::new(InMemoryStore::new());
        let policy = RetryPolicy {
            max_attempts: 50,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        };
        let executor = Arc::new(LedgerTransactionExecutor::new(store.clone(), policy));
        let trigger = Arc::new(CommissionAccrualTrigger::new(
            executor,
            store.clone(),
            store.clone(),
            CommissionConfig::default(),
        ));
        (store, trigger)
    }

    fn completion(ride_id: &str, driver: Option<&str>, fare: Decimal) -> RideChange {
        RideChange {
            ride_id: ride_id.to_string(),
            before: Some(RideStatus::Matched),
            after: RideStatus::Completed,
            driver_id: driver.map(String::from),
            user_id: Some("rider-1".to_string()),
            final_fare: Some(fare),
            fare: None,
        }
    }

    #[test]
    fn test_commission_rounding() {
        assert_eq!(commission_for(dec!(350), dec!(20)), dec!(70));
        assert_eq!(commission_for(dec!(123.45), dec!(20)), dec!(24.69));
        assert_eq!(commission_for(dec!(10.03), dec!(15)), dec!(1.50));
    }

    #[tokio::test]
    async fn test_completion_accrues_commission() {
        let (store, trigger) = setup();
        store.open_account("d1").await.unwrap();

        let report = trigger.on_ride_change(&completion("r1", Some("d1"), dec!(350))).await.unwrap();
        assert_eq!(
            report.primary,
            AccrualOutcome::Accrued { driver_id: "d1".into(), commission: dec!(70) }
        );
        assert_eq!(report.auxiliary, AuxiliaryOutcome::Updated);

        let account = store.load_account("d1").await.unwrap().unwrap();
        assert_eq!(account.accrued_commission, dec!(70));
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(store.rider_rides("rider-1"), 1);
    }

    #[tokio::test]
    async fn test_repeated_completion_accrues_once() {
        let (store, trigger) = setup();
        store.open_account("d1").await.unwrap();
        let change = completion("r1", Some("d1"), dec!(350));

        trigger.on_ride_change(&change).await.unwrap();
        let report = trigger.on_ride_change(&change).await.unwrap();
        assert_eq!(report.primary, AccrualOutcome::AlreadyAccrued);
        assert_eq!(report.auxiliary, AuxiliaryOutcome::NotRun);

        assert_eq!(store.load_account("d1").await.unwrap().unwrap().accrued_commission, dec!(70));
        assert_eq!(store.rider_rides("rider-1"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_accrue_once() {
        let (store, trigger) = setup();
        store.open_account("d1").await.unwrap();
        let change = completion("r1", Some("d1"), dec!(200));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let trigger = trigger.clone();
                let change = change.clone();
                tokio::spawn(async move { trigger.on_ride_change(&change).await.unwrap() })
            })
            .collect();
        let mut accrued = 0;
        for handle in handles {
            if matches!(handle.await.unwrap().primary, AccrualOutcome::Accrued { .. }) {
                accrued += 1;
            }
        }

        assert_eq!(accrued, 1);
        assert_eq!(store.load_account("d1").await.unwrap().unwrap().accrued_commission, dec!(40));
    }

    #[tokio::test]
    async fn test_non_completions_are_ignored() {
        let (store, trigger) = setup();
        store.open_account("d1").await.unwrap();

        let mut change = completion("r1", Some("d1"), dec!(350));
        change.before = Some(RideStatus::Completed);
        let report = trigger.on_ride_change(&change).await.unwrap();
        assert_eq!(report.primary, AccrualOutcome::NotCompletion);

        change.before = Some(RideStatus::Searching);
        change.after = RideStatus::Matched;
        let report = trigger.on_ride_change(&change).await.unwrap();
        assert_eq!(report.primary, AccrualOutcome::NotCompletion);

        assert!(store.list_entries("d1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skips_without_driver_or_fare() {
        let (store, trigger) = setup();
        store.open_account("d1").await.unwrap();

        let report = trigger.on_ride_change(&completion("r1", None, dec!(350))).await.unwrap();
        assert_eq!(report.primary, AccrualOutcome::Skipped(SkipReason::MissingDriver));

        let mut no_fare = completion("r2", Some("d1"), dec!(0));
        no_fare.final_fare = None;
        let report = trigger.on_ride_change(&no_fare).await.unwrap();
        assert_eq!(report.primary, AccrualOutcome::Skipped(SkipReason::ZeroCommission));

        assert!(store.list_entries("d1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_fare_and_configured_percent() {
        let (store, trigger) = setup();
        store.open_account("d1").await.unwrap();
        store.set_rate_config(Some(RateConfig {
            commission_percent: Some(dec!(10)),
            ..RateConfig::default()
        }));

        let mut change = completion("r1", Some("d1"), dec!(0));
        change.final_fare = None;
        change.fare = Some(dec!(400));
        let report = trigger.on_ride_change(&change).await.unwrap();
        assert_eq!(
            report.primary,
            AccrualOutcome::Accrued { driver_id: "d1".into(), commission: dec!(40) }
        );
    }

    #[tokio::test]
    async fn test_rider_update_failure_keeps_accrual() {
        let (store, trigger) = setup();
        store.open_account("d1").await.unwrap();
        store.fail_rider_updates(true);

        let report = trigger.on_ride_change(&completion("r1", Some("d1"), dec!(350))).await.unwrap();
        assert!(matches!(report.primary, AccrualOutcome::Accrued { .. }));
        assert!(matches!(report.auxiliary, AuxiliaryOutcome::Failed(_)));
        assert_eq!(store.load_account("d1").await.unwrap().unwrap().accrued_commission, dec!(70));
    }

    #[tokio::test]
    async fn test_rate_config_failure_writes_nothing() {
        let (store, trigger) = setup();
        store.open_account("d1").await.unwrap();
        store.set_rate_config(Some(RateConfig {
            commission_percent: Some(dec!(10)),
            ..RateConfig::default()
        }));
        store.fail_rate_config(true);

        let change = completion("r1", Some("d1"), dec!(350));
        assert!(trigger.on_ride_change(&change).await.is_err());
        assert!(store.list_entries("d1", 10).await.unwrap().is_empty());
        assert_eq!(store.rider_rides("rider-1"), 0);

        store.fail_rate_config(false);
        let report = trigger.on_ride_change(&change).await.unwrap();
        assert_eq!(
            report.primary,
            AccrualOutcome::Accrued { driver_id: "d1".into(), commission: dec!(35) }
        );
    }

    #[tokio::test]
    async fn test_unknown_driver_is_an_error() {
        let (_, trigger) = setup();
        let err = trigger.on_ride_change(&completion("r1", Some("ghost"), dec!(350))).await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(LedgerError::AccountNotFound(_))));
    }
}
