use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::models::{CancelledBy, RideRequest, RideStatus, RideUpdate};
use super::store::RideStore;
use crate::auth::{CallerIdentity, Role};
use crate::error::{AppError, AppResult};
use crate::pricing::FareCalculator;

/// Ride lifecycle. Every transition is a compare-and-set on the prior status.
pub struct RideService {
    rides: Arc<dyn RideStore>,
    fares: Arc<FareCalculator>,
}

impl RideService {
    pub fn new(rides: Arc<dyn RideStore>, fares: Arc<FareCalculator>) -> Self {
        Self { rides, fares }
    }

    async fn load(&self, ride_id: &str) -> AppResult<RideRequest> {
        self.rides
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ride {} not found", ride_id)))
    }

    async fn transition(
        &self,
        ride: &RideRequest,
        update: RideUpdate,
    ) -> AppResult<RideRequest> {
        if ride.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Ride {} is already {}",
                ride.ride_id, ride.status
            )));
        }
        if !ride.status.can_transition_to(update.to) {
            return Err(AppError::Conflict(format!(
                "Ride {} cannot move from {} to {}",
                ride.ride_id, ride.status, update.to
            )));
        }

        let to = update.to;
        let updated = self
            .rides
            .transition_ride(&ride.ride_id, ride.status, update)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("Ride {} changed concurrently", ride.ride_id))
            })?;

        info!(ride_id = %ride.ride_id, from = %ride.status, %to, "Ride status changed");
        Ok(updated)
    }

    /// Price the trip server-side and open a `searching` request
    pub async fn create(
        &self,
        caller: &CallerIdentity,
        vehicle_key: Option<&str>,
        distance_km: Option<Decimal>,
    ) -> AppResult<RideRequest> {
        if caller.role != Role::Rider {
            return Err(AppError::Forbidden("Only riders can request rides".into()));
        }

        let quote = self.fares.compute_fare(Some(caller), vehicle_key, distance_km).await?;
        let now = Utc::now();
        let ride = RideRequest {
            ride_id: Uuid::new_v4().to_string(),
            status: RideStatus::Searching,
            driver_id: None,
            user_id: caller.subject.clone(),
            vehicle_key: quote.vehicle_key,
            distance_km: quote.distance_km,
            final_fare: quote.fare,
            created_at: now,
            updated_at: now,
            cancelled_by: None,
            cancel_reason: None,
        };

        self.rides.insert_ride(&ride).await?;
        info!(ride_id = %ride.ride_id, user_id = %ride.user_id, fare = %ride.final_fare, "Ride requested");
        Ok(ride)
    }

    pub async fn get(&self, caller: &CallerIdentity, ride_id: &str) -> AppResult<RideRequest> {
        let ride = self.load(ride_id).await?;
        let involved = ride.user_id == caller.subject
            || ride.driver_id.as_deref() == Some(caller.subject.as_str());
        if !involved && !caller.is_admin() {
            return Err(AppError::Forbidden("Not a party to this ride".into()));
        }
        Ok(ride)
    }

    pub async fn accept(&self, caller: &CallerIdentity, ride_id: &str) -> AppResult<RideRequest> {
        if caller.role != Role::Driver {
            return Err(AppError::Forbidden("Only drivers can accept rides".into()));
        }
        let ride = self.load(ride_id).await?;
        self.transition(&ride, RideUpdate::matched(caller.subject.clone(), Utc::now()))
            .await
    }

    pub async fn complete(&self, caller: &CallerIdentity, ride_id: &str) -> AppResult<RideRequest> {
        let ride = self.load(ride_id).await?;
        if ride.driver_id.as_deref() != Some(caller.subject.as_str()) {
            return Err(AppError::Forbidden("Only the matched driver can complete a ride".into()));
        }
        self.transition(&ride, RideUpdate::completed(Utc::now())).await
    }

    pub async fn cancel(
        &self,
        caller: &CallerIdentity,
        ride_id: &str,
        reason: Option<String>,
    ) -> AppResult<RideRequest> {
        let ride = self.load(ride_id).await?;
        let by = if ride.user_id == caller.subject {
            CancelledBy::Rider
        } else if ride.driver_id.as_deref() == Some(caller.subject.as_str()) {
            CancelledBy::Driver
        } else {
            return Err(AppError::Forbidden("Not a party to this ride".into()));
        };

        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("Cancelled by {}", by.as_str()));
        self.transition(&ride, RideUpdate::cancelled(by, reason, Utc::now()))
            .await
    }
}
