use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

use super::models::RideRequest;
use super::store::RideStore;
use crate::error::AppResult;

pub const TIMEOUT_REASON: &str = "No driver accepted the request in time";

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    /// Age after which a `searching` ride is abandoned
    pub timeout: chrono::Duration,
    pub batch_limit: i64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            timeout: chrono::Duration::minutes(5),
            batch_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub examined: usize,
    pub cancelled: usize,
    /// Candidates that left `searching` between selection and cancellation
    pub raced: usize,
}

/// Cancels ride requests no driver accepted in time
pub struct StaleRequestReaper {
    rides: Arc<dyn RideStore>,
    config: ReaperConfig,
}

impl StaleRequestReaper {
    pub fn new(rides: Arc<dyn RideStore>, config: ReaperConfig) -> Self {
        Self { rides, config }
    }

    pub async fn reap_once(&self, now: DateTime<Utc>) -> AppResult<ReapReport> {
        let cutoff = now - self.config.timeout;
        let candidates = self
            .rides
            .find_stale_searching(cutoff, self.config.batch_limit)
            .await?;

        if candidates.is_empty() {
            return Ok(ReapReport::default());
        }

        self.cancel_batch(candidates, now).await
    }

    pub(crate) async fn cancel_batch(
        &self,
        candidates: Vec<RideRequest>,
        now: DateTime<Utc>,
    ) -> AppResult<ReapReport> {
        let ids: Vec<String> = candidates.into_iter().map(|r| r.ride_id).collect();
        let cancelled = self.rides.cancel_if_searching(&ids, TIMEOUT_REASON, now).await?;

        let report = ReapReport {
            examined: ids.len(),
            cancelled: cancelled.len(),
            raced: ids.len() - cancelled.len(),
        };
        info!(
            examined = report.examined,
            cancelled = report.cancelled,
            raced = report.raced,
            "🗑️  Expired stale ride requests"
        );
        Ok(report)
    }

    /// Start the reaper loop (runs in background)
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.reap_once(Utc::now()).await {
                    error!(error = %e, "Failed to expire stale ride requests");
                }
            }
        })
    }
}
