use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free distance allowance when a rate does not specify one
pub const DEFAULT_INCLUDED_KM: Decimal = dec!(2);

/// Per vehicle-class pricing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRate {
    pub base_fare: Decimal,
    pub per_km_rate: Decimal,
    #[serde(default)]
    pub night_surcharge: Decimal,
    #[serde(default)]
    pub included_km: Option<Decimal>,
}

impl VehicleRate {
    pub const fn new(base_fare: Decimal, per_km_rate: Decimal, night_surcharge: Decimal) -> Self {
        Self {
            base_fare,
            per_km_rate,
            night_surcharge,
            included_km: None,
        }
    }

    pub fn included_km(&self) -> Decimal {
        self.included_km.unwrap_or(DEFAULT_INCLUDED_KM)
    }
}

/// Externally managed rate document. Read as a point-in-time snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateConfig {
    #[serde(default)]
    pub vehicles: HashMap<String, VehicleRate>,
    #[serde(default)]
    pub commission_percent: Option<Decimal>,
}

/// Built-in rates used when the shared document has no entry for a class
pub fn default_rate(vehicle_key: &str) -> Option<VehicleRate> {
    match vehicle_key {
        "bike" => Some(VehicleRate::new(dec!(50), dec!(10), dec!(20))),
        "auto" => Some(VehicleRate::new(dec!(80), dec!(15), dec!(30))),
        "car" => Some(VehicleRate::new(dec!(150), dec!(25), dec!(40))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_document_shape() {
        let raw = r#"{
            "vehicles": {
                "car": {"baseFare": 160, "perKmRate": 26, "nightSurcharge": 45},
                "suv": {"baseFare": 220, "perKmRate": 32, "includedKm": 3}
            },
            "commissionPercent": 15
        }"#;
        let config: RateConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.commission_percent, Some(dec!(15)));
        assert_eq!(config.vehicles["car"].base_fare, dec!(160));
        assert_eq!(config.vehicles["car"].included_km(), DEFAULT_INCLUDED_KM);
        assert_eq!(config.vehicles["suv"].night_surcharge, Decimal::ZERO);
        assert_eq!(config.vehicles["suv"].included_km(), dec!(3));
    }

    #[test]
    fn test_default_table() {
        assert_eq!(default_rate("car").unwrap().per_km_rate, dec!(25));
        assert!(default_rate("bike").is_some());
        assert!(default_rate("hovercraft").is_none());
    }
}
