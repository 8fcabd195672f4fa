use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::{error, info, warn};

use super::models::{CancelledBy, RideChange, RideRequest, RideStatus, RideUpdate};
use super::store::{RideChangeStream, RideStore};
use crate::error::{AppError, AppResult};

/// NOTIFY channel fed by the `ride_status_changed` trigger
pub const RIDE_CHANGE_CHANNEL: &str = "ride_status_changed";

const RIDE_COLUMNS: &str = "ride_id, status, driver_id, user_id, vehicle_key, distance_km, \
    final_fare, created_at, updated_at, cancelled_by, cancel_reason";

pub struct RideRepository {
    pool: PgPool,
}

impl RideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RideStore for RideRepository {
    async fn insert_ride(&self, ride: &RideRequest) -> AppResult<()> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO ride_requests ({RIDE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#
        ))
        .bind(&ride.ride_id)
        .bind(ride.status)
        .bind(&ride.driver_id)
        .bind(&ride.user_id)
        .bind(&ride.vehicle_key)
        .bind(ride.distance_km)
        .bind(ride.final_fare)
        .bind(ride.created_at)
        .bind(ride.updated_at)
        .bind(&ride.cancelled_by)
        .bind(&ride.cancel_reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(AppError::Conflict(
                format!("Ride {} already exists", ride.ride_id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_ride(&self, ride_id: &str) -> AppResult<Option<RideRequest>> {
        let ride = sqlx::query_as::<_, RideRequest>(&format!(
            "SELECT {RIDE_COLUMNS} FROM ride_requests WHERE ride_id = $1"
        ))
        .bind(ride_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ride)
    }

    async fn transition_ride(
        &self,
        ride_id: &str,
        expected: RideStatus,
        update: RideUpdate,
    ) -> AppResult<Option<RideRequest>> {
        let ride = sqlx::query_as::<_, RideRequest>(&format!(
            r#"
            UPDATE ride_requests
            SET status = $3,
                driver_id = COALESCE($4, driver_id),
                cancelled_by = COALESCE($5, cancelled_by),
                cancel_reason = COALESCE($6, cancel_reason),
                updated_at = $7
            WHERE ride_id = $1 AND status = $2
            RETURNING {RIDE_COLUMNS}
            "#
        ))
        .bind(ride_id)
        .bind(expected)
        .bind(update.to)
        .bind(update.driver_id)
        .bind(update.cancelled_by.map(|by| by.as_str()))
        .bind(update.cancel_reason)
        .bind(update.at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ride)
    }

    async fn find_stale_searching(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<RideRequest>> {
        let rides = sqlx::query_as::<_, RideRequest>(&format!(
            r#"
            SELECT {RIDE_COLUMNS}
            FROM ride_requests
            WHERE status = 'searching' AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rides)
    }

    async fn cancel_if_searching(
        &self,
        ride_ids: &[String],
        reason: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<String>> {
        let cancelled: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE ride_requests
            SET status = 'cancelled',
                cancelled_by = $2,
                cancel_reason = $3,
                updated_at = $4
            WHERE ride_id = ANY($1) AND status = 'searching'
            RETURNING ride_id
            "#,
        )
        .bind(ride_ids)
        .bind(CancelledBy::System.as_str())
        .bind(reason)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        Ok(cancelled)
    }

    async fn increment_rider_rides(&self, user_id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO riders (user_id, total_rides, updated_at)
            VALUES ($1, 1, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET total_rides = riders.total_rides + 1, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn subscribe_changes(&self) -> AppResult<RideChangeStream> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(RIDE_CHANGE_CHANNEL).await?;
        info!(channel = RIDE_CHANGE_CHANNEL, "Listening for ride status changes");

        let stream = listener.into_stream().filter_map(|notification| async move {
            match notification {
                Ok(notification) => match serde_json::from_str::<RideChange>(notification.payload()) {
                    Ok(change) => Some(change),
                    Err(e) => {
                        warn!(error = %e, payload = notification.payload(), "Dropping malformed ride change event");
                        None
                    }
                },
                Err(e) => {
                    error!(error = %e, "Ride change listener error");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}
