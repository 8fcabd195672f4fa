use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::models::{default_rate, RateConfig, VehicleRate};
use super::store::RateConfigSource;
use crate::auth::CallerIdentity;
use crate::error::{AppResult, FareError};

/// Night surcharge applies from 22:00 (inclusive) to 05:00 (exclusive), local time
const NIGHT_START_HOUR: u32 = 22;
const NIGHT_END_HOUR: u32 = 5;

#[derive(Debug, Clone)]
pub struct FareConfig {
    pub offset: FixedOffset,
    /// Vehicle class used when the requested one has no rate anywhere
    pub default_vehicle_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FareQuote {
    pub fare: Decimal,
    pub vehicle_key: String,
    pub distance_km: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Authoritative, server-side fare computation
pub struct FareCalculator {
    rates: Arc<dyn RateConfigSource>,
    config: FareConfig,
}

impl FareCalculator {
    pub fn new(rates: Arc<dyn RateConfigSource>, config: FareConfig) -> Self {
        Self { rates, config }
    }

    pub async fn compute_fare(
        &self,
        caller: Option<&CallerIdentity>,
        vehicle_key: Option<&str>,
        distance_km: Option<Decimal>,
    ) -> AppResult<FareQuote> {
        self.compute_fare_at(caller, vehicle_key, distance_km, Utc::now()).await
    }

    pub async fn compute_fare_at(
        &self,
        caller: Option<&CallerIdentity>,
        vehicle_key: Option<&str>,
        distance_km: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> AppResult<FareQuote> {
        if caller.is_none() {
            return Err(FareError::Unauthenticated.into());
        }

        let vehicle_key = vehicle_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| FareError::InvalidArgument("vehicleKey is required".into()))?;
        let distance_km = distance_km
            .ok_or_else(|| FareError::InvalidArgument("distanceKm is required".into()))?;
        if distance_km < Decimal::ZERO {
            return Err(FareError::InvalidArgument("distanceKm must not be negative".into()).into());
        }

        let snapshot = match self.rates.load_rate_config().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Rate config unavailable, using built-in rates");
                None
            }
        };

        let rate = self.resolve_rate(snapshot.as_ref(), vehicle_key).ok_or_else(|| {
            FareError::InvalidArgument(format!("No rate configured for vehicle class {}", vehicle_key))
        })?;

        let local_hour = now.with_timezone(&self.config.offset).hour();
        let fare = fare_for(&rate, distance_km, is_night(local_hour)).ok_or_else(|| {
            FareError::InvalidArgument(format!("distanceKm {} is out of range", distance_km))
        })?;

        debug!(vehicle_key, %distance_km, local_hour, %fare, "Fare computed");

        Ok(FareQuote {
            fare,
            vehicle_key: vehicle_key.to_string(),
            distance_km,
            timestamp: now,
        })
    }

    fn resolve_rate(&self, snapshot: Option<&RateConfig>, vehicle_key: &str) -> Option<VehicleRate> {
        let lookup = |key: &str| {
            snapshot
                .and_then(|config| config.vehicles.get(key).cloned())
                .or_else(|| default_rate(key))
        };
        lookup(vehicle_key).or_else(|| {
            debug!(vehicle_key, fallback = %self.config.default_vehicle_key, "Unknown vehicle class");
            lookup(&self.config.default_vehicle_key)
        })
    }
}

pub fn is_night(local_hour: u32) -> bool {
    local_hour >= NIGHT_START_HOUR || local_hour < NIGHT_END_HOUR
}

/// Base fare covers the included distance; per-km beyond it; whole-unit rounding.
/// `None` when the distance is too large to price.
pub fn fare_for(rate: &VehicleRate, distance_km: Decimal, night: bool) -> Option<Decimal> {
    let included = rate.included_km();
    let mut fare = rate.base_fare;
    if distance_km > included {
        let metered = (distance_km - included).checked_mul(rate.per_km_rate)?;
        fare = fare.checked_add(metered)?;
    }
    if night {
        fare = fare.checked_add(rate.night_surcharge)?;
    }
    Some(fare.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::error::AppError;
    use crate::memory::InMemoryStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    fn setup() -> (Arc<InMemoryStore>, FareCalculator) {
        let store = Arc::new(InMemoryStore::new());
        let calculator = FareCalculator::new(
            store.clone(),
            FareConfig {
                offset: ist(),
                default_vehicle_key: "car".into(),
            },
        );
        (store, calculator)
    }

    fn rider() -> CallerIdentity {
        CallerIdentity::new("rider-1", Role::Rider)
    }

    /// 12:00 IST
    fn midday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap()
    }

    /// 23:00 IST
    fn late_evening() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 17, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_daytime_car_fare() {
        let (_, calculator) = setup();
        let quote = calculator
            .compute_fare_at(Some(&rider()), Some("car"), Some(dec!(10)), midday())
            .await
            .unwrap();
        assert_eq!(quote.fare, dec!(350));
        assert_eq!(quote.vehicle_key, "car");
        assert_eq!(quote.timestamp, midday());
    }

    #[tokio::test]
    async fn test_night_surcharge_uses_operating_timezone() {
        let (_, calculator) = setup();
        let quote = calculator
            .compute_fare_at(Some(&rider()), Some("car"), Some(dec!(10)), late_evening())
            .await
            .unwrap();
        assert_eq!(quote.fare, dec!(390));
    }

    #[test]
    fn test_night_window_bounds() {
        assert!(is_night(22));
        assert!(is_night(0));
        assert!(is_night(4));
        assert!(!is_night(5));
        assert!(!is_night(21));
    }

    #[tokio::test]
    async fn test_short_trip_pays_base_fare() {
        let (_, calculator) = setup();
        let quote = calculator
            .compute_fare_at(Some(&rider()), Some("bike"), Some(dec!(1.5)), midday())
            .await
            .unwrap();
        assert_eq!(quote.fare, dec!(50));
    }

    #[test]
    fn test_fare_rounds_half_away_from_zero() {
        let rate = VehicleRate::new(dec!(80), dec!(15), dec!(30));
        // 80 + 0.1 * 15 = 81.5
        assert_eq!(fare_for(&rate, dec!(2.1), false), Some(dec!(82)));
        // 80 + 0.13 * 15 = 81.95
        assert_eq!(fare_for(&rate, dec!(2.13), false), Some(dec!(82)));
        // 80 + 0.02 * 15 = 80.3
        assert_eq!(fare_for(&rate, dec!(2.02), false), Some(dec!(80)));
    }

    #[tokio::test]
    async fn test_rate_document_overrides_defaults() {
        let (store, calculator) = setup();
        let mut vehicles = HashMap::new();
        vehicles.insert("car".to_string(), VehicleRate::new(dec!(100), dec!(20), dec!(10)));
        vehicles.insert("suv".to_string(), VehicleRate::new(dec!(200), dec!(30), dec!(50)));
        store.set_rate_config(Some(RateConfig { vehicles, commission_percent: None }));

        let car = calculator
            .compute_fare_at(Some(&rider()), Some("car"), Some(dec!(4)), midday())
            .await
            .unwrap();
        assert_eq!(car.fare, dec!(140));

        let suv = calculator
            .compute_fare_at(Some(&rider()), Some("suv"), Some(dec!(2)), midday())
            .await
            .unwrap();
        assert_eq!(suv.fare, dec!(200));
    }

    #[tokio::test]
    async fn test_unknown_class_falls_back_to_default_class() {
        let (_, calculator) = setup();
        let quote = calculator
            .compute_fare_at(Some(&rider()), Some("hovercraft"), Some(dec!(10)), midday())
            .await
            .unwrap();
        assert_eq!(quote.fare, dec!(350));
        assert_eq!(quote.vehicle_key, "hovercraft");
    }

    #[tokio::test]
    async fn test_rate_config_failure_uses_builtin_table() {
        let (store, calculator) = setup();
        store.fail_rate_config(true);
        let quote = calculator
            .compute_fare_at(Some(&rider()), Some("auto"), Some(dec!(4)), midday())
            .await
            .unwrap();
        assert_eq!(quote.fare, dec!(110));
    }

    #[tokio::test]
    async fn test_huge_distance_is_invalid_argument() {
        let (_, calculator) = setup();
        let request: crate::api::models::FareRequest =
            serde_json::from_str(r#"{"vehicleKey":"car","distanceKm":1e28}"#).unwrap();
        assert!(request.distance_km.is_some());

        let err = calculator
            .compute_fare_at(
                Some(&rider()),
                request.vehicle_key.as_deref(),
                request.distance_km,
                late_evening(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fare(FareError::InvalidArgument(_))));
    }

    #[test]
    fn test_fare_overflow_is_none() {
        let rate = VehicleRate::new(dec!(150), dec!(25), dec!(40));
        assert_eq!(fare_for(&rate, Decimal::MAX, false), None);
    }

    #[tokio::test]
    async fn test_unauthenticated_caller() {
        let (_, calculator) = setup();
        let err = calculator
            .compute_fare_at(None, Some("car"), Some(dec!(10)), midday())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fare(FareError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (_, calculator) = setup();
        let caller = rider();

        for (key, distance) in [
            (None, Some(dec!(3))),
            (Some(""), Some(dec!(3))),
            (Some("car"), None),
            (Some("car"), Some(dec!(-1))),
        ] {
            let err = calculator
                .compute_fare_at(Some(&caller), key, distance, midday())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Fare(FareError::InvalidArgument(_))));
        }
    }
}
