use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;

/// Ride request lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "ride_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Searching,
    Matched,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Searching => "searching",
            RideStatus::Matched => "matched",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Valid transitions:
    /// - Searching → Matched, Cancelled
    /// - Matched → Completed, Cancelled
    /// - Terminal states → none
    pub fn can_transition_to(&self, to: RideStatus) -> bool {
        matches!(
            (self, to),
            (RideStatus::Searching, RideStatus::Matched)
                | (RideStatus::Searching, RideStatus::Cancelled)
                | (RideStatus::Matched, RideStatus::Completed)
                | (RideStatus::Matched, RideStatus::Cancelled)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    System,
    Rider,
    Driver,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelledBy::System => "system",
            CancelledBy::Rider => "rider",
            CancelledBy::Driver => "driver",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RideRequest {
    pub ride_id: String,
    pub status: RideStatus,
    pub driver_id: Option<String>,
    pub user_id: String,
    pub vehicle_key: String,
    pub distance_km: Decimal,
    /// Server-computed fare, the only amount commission is derived from
    pub final_fare: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_by: Option<String>,
    pub cancel_reason: Option<String>,
}

/// Status change applied with a compare-and-set on the prior status
#[derive(Debug, Clone)]
pub struct RideUpdate {
    pub to: RideStatus,
    pub driver_id: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancel_reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl RideUpdate {
    pub fn matched(driver_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            to: RideStatus::Matched,
            driver_id: Some(driver_id.into()),
            cancelled_by: None,
            cancel_reason: None,
            at,
        }
    }

    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            to: RideStatus::Completed,
            driver_id: None,
            cancelled_by: None,
            cancel_reason: None,
            at,
        }
    }

    pub fn cancelled(by: CancelledBy, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            to: RideStatus::Cancelled,
            driver_id: None,
            cancelled_by: Some(by),
            cancel_reason: Some(reason.into()),
            at,
        }
    }
}

/// Ride change-feed event. Parsed strictly at the boundary; events that do not
/// match this shape are dropped before reaching the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideChange {
    pub ride_id: String,
    pub before: Option<RideStatus>,
    pub after: RideStatus,
    #[serde(default)]
    pub driver_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub final_fare: Option<Decimal>,
    /// Older producers only send `fare`
    #[serde(default)]
    pub fare: Option<Decimal>,
}

impl RideChange {
    pub fn from_transition(before: RideStatus, ride: &RideRequest) -> Self {
        Self {
            ride_id: ride.ride_id.clone(),
            before: Some(before),
            after: ride.status,
            driver_id: ride.driver_id.clone(),
            user_id: Some(ride.user_id.clone()),
            final_fare: Some(ride.final_fare),
            fare: None,
        }
    }

    /// Transition from any other state into `completed`
    pub fn is_completion(&self) -> bool {
        self.after == RideStatus::Completed && self.before != Some(RideStatus::Completed)
    }

    pub fn billable_fare(&self) -> Decimal {
        self.final_fare.or(self.fare).unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ride_state_machine() {
        assert!(RideStatus::Searching.can_transition_to(RideStatus::Matched));
        assert!(RideStatus::Searching.can_transition_to(RideStatus::Cancelled));
        assert!(RideStatus::Matched.can_transition_to(RideStatus::Completed));
        assert!(!RideStatus::Searching.can_transition_to(RideStatus::Completed));
        assert!(!RideStatus::Completed.can_transition_to(RideStatus::Cancelled));
        assert!(!RideStatus::Cancelled.can_transition_to(RideStatus::Matched));
    }

    #[test]
    fn test_change_event_parsing() {
        let raw = r#"{"ride_id":"r1","before":"matched","after":"completed","driver_id":"d1","user_id":"u1","final_fare":350}"#;
        let change: RideChange = serde_json::from_str(raw).unwrap();
        assert!(change.is_completion());
        assert_eq!(change.billable_fare(), dec!(350));

        let repeat = RideChange { before: Some(RideStatus::Completed), ..change.clone() };
        assert!(!repeat.is_completion());

        let legacy = r#"{"ride_id":"r2","before":"matched","after":"completed","fare":120.5}"#;
        let change: RideChange = serde_json::from_str(legacy).unwrap();
        assert_eq!(change.billable_fare(), dec!(120.5));

        assert!(serde_json::from_str::<RideChange>(r#"{"after":"completed"}"#).is_err());
        assert!(serde_json::from_str::<RideChange>(r#"{"ride_id":"r3","before":null,"after":"flying"}"#).is_err());
    }
}
