use chrono::FixedOffset;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::commission::trigger::CommissionConfig;
use crate::error::{AppError, AppResult};
use crate::ledger::executor::RetryPolicy;
use crate::pricing::fare::FareConfig;
use crate::rides::reaper::ReaperConfig;
use crate::settlement::scheduler::SettlementScheduleConfig;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub storage_backend: StorageBackend,
    /// Shared secret for payment webhook signatures. Absence fails each webhook call.
    pub webhook_secret: Option<String>,
    pub jwt_secret: String,
    pub settlement_hour: u32,
    pub settlement_minute: u32,
    pub settlement_utc_offset_minutes: i32,
    pub settlement_concurrency: usize,
    pub reaper_interval_secs: u64,
    pub reaper_timeout_secs: i64,
    pub reaper_batch_limit: i64,
    pub default_commission_percent: Decimal,
    pub default_vehicle_key: String,
    pub ledger_max_attempts: u32,
    pub ledger_backoff_ms: u64,
    pub rate_limit_per_minute: u32,
    pub cors_allowed_origins: String,
}

impl Config {
    /// Layer built-in defaults under environment variables (`.env` is loaded by main).
    pub fn from_env() -> AppResult<Self> {
        let settings = config::Config::builder()
            .set_default("database_url", "postgresql://localhost/driver_ledger")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("storage_backend", "postgres")?
            .set_default("settlement_hour", 23)?
            .set_default("settlement_minute", 59)?
            .set_default("settlement_utc_offset_minutes", 330)?
            .set_default("settlement_concurrency", 16)?
            .set_default("reaper_interval_secs", 300)?
            .set_default("reaper_timeout_secs", 300)?
            .set_default("reaper_batch_limit", 500)?
            .set_default("default_commission_percent", "20")?
            .set_default("default_vehicle_key", "car")?
            .set_default("ledger_max_attempts", 5)?
            .set_default("ledger_backoff_ms", 25)?
            .set_default("rate_limit_per_minute", 600)?
            .set_default("cors_allowed_origins", "http://localhost:3000")?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.jwt_secret.trim().is_empty() {
            return Err(AppError::Config("JWT_SECRET must not be empty".into()));
        }
        if self.settlement_hour > 23 || self.settlement_minute > 59 {
            return Err(AppError::Config(format!(
                "Invalid settlement time {:02}:{:02}",
                self.settlement_hour, self.settlement_minute
            )));
        }
        if self.ledger_max_attempts == 0 {
            return Err(AppError::Config("LEDGER_MAX_ATTEMPTS must be at least 1".into()));
        }
        self.operating_offset()?;
        Ok(())
    }

    /// Fixed UTC offset of the platform's operating timezone
    pub fn operating_offset(&self) -> AppResult<FixedOffset> {
        FixedOffset::east_opt(self.settlement_utc_offset_minutes * 60).ok_or_else(|| {
            AppError::Config(format!(
                "Invalid UTC offset: {} minutes",
                self.settlement_utc_offset_minutes
            ))
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.ledger_max_attempts,
            initial_backoff: Duration::from_millis(self.ledger_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn settlement_schedule(&self) -> AppResult<SettlementScheduleConfig> {
        Ok(SettlementScheduleConfig {
            execution_hour: self.settlement_hour,
            execution_minute: self.settlement_minute,
            offset: self.operating_offset()?,
            concurrency: self.settlement_concurrency.max(1),
        })
    }

    pub fn reaper(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_secs(self.reaper_interval_secs),
            timeout: chrono::Duration::seconds(self.reaper_timeout_secs),
            batch_limit: self.reaper_batch_limit,
        }
    }

    pub fn fare(&self) -> AppResult<FareConfig> {
        Ok(FareConfig {
            offset: self.operating_offset()?,
            default_vehicle_key: self.default_vehicle_key.clone(),
        })
    }

    pub fn commission(&self) -> CommissionConfig {
        CommissionConfig {
            default_percent: self.default_commission_percent,
        }
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect()
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            bind_address: "127.0.0.1:0".into(),
            storage_backend: StorageBackend::Memory,
            webhook_secret: Some("whsec_test".into()),
            jwt_secret: "jwt-test-secret".into(),
            settlement_hour: 23,
            settlement_minute: 59,
            settlement_utc_offset_minutes: 330,
            settlement_concurrency: 4,
            reaper_interval_secs: 300,
            reaper_timeout_secs: 300,
            reaper_batch_limit: 500,
            default_commission_percent: Decimal::from(20),
            default_vehicle_key: "car".into(),
            ledger_max_attempts: 20,
            ledger_backoff_ms: 1,
            rate_limit_per_minute: 10_000,
            cors_allowed_origins: "http://localhost:3000".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_settings() {
        let config = Config::for_tests();
        assert_eq!(config.operating_offset().unwrap().local_minus_utc(), 330 * 60);
        assert_eq!(config.retry_policy().max_attempts, 20);
        assert_eq!(config.reaper().timeout, chrono::Duration::minutes(5));
        assert_eq!(config.allowed_origins(), vec!["http://localhost:3000".to_string()]);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::for_tests();
        config.settlement_hour = 24;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = Config::for_tests();
        config.jwt_secret = " ".into();
        assert!(config.validate().is_err());

        let mut config = Config::for_tests();
        config.settlement_utc_offset_minutes = 24 * 60;
        assert!(config.validate().is_err());
    }
}
