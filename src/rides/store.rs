use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use super::models::{RideChange, RideRequest, RideStatus, RideUpdate};
use crate::error::AppResult;

/// Stream of ride status changes from the store's change-notification channel
pub type RideChangeStream = BoxStream<'static, RideChange>;

#[async_trait]
pub trait RideStore: Send + Sync {
    async fn insert_ride(&self, ride: &RideRequest) -> AppResult<()>;

    async fn get_ride(&self, ride_id: &str) -> AppResult<Option<RideRequest>>;

    /// Apply `update` only if the ride is still in `expected`.
    /// Returns `None` when the ride moved on (or does not exist).
    async fn transition_ride(
        &self,
        ride_id: &str,
        expected: RideStatus,
        update: RideUpdate,
    ) -> AppResult<Option<RideRequest>>;

    /// `searching` rides created strictly before `cutoff`, oldest first
    async fn find_stale_searching(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<RideRequest>>;

    /// Batched system cancellation, conditioned per ride on status still being
    /// `searching`. Returns the ids that were actually cancelled.
    async fn cancel_if_searching(
        &self,
        ride_ids: &[String],
        reason: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<String>>;

    /// Bump the rider's completed-ride counter, creating the rider row if needed
    async fn increment_rider_rides(&self, user_id: &str) -> AppResult<()>;

    async fn subscribe_changes(&self) -> AppResult<RideChangeStream>;
}
