use rust_decimal::Decimal;
use serde::Deserialize;

/// The only gateway event that moves money
pub const PAYMENT_CAPTURED: &str = "payment.captured";

/// Outer webhook envelope
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WebhookEnvelope {
    /// The payment object, either gateway-native (`payload.payment.entity`)
    /// or the flat `payload` form.
    pub fn payment_value(&self) -> &serde_json::Value {
        self.payload
            .pointer("/payment/entity")
            .unwrap_or(&self.payload)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentNotes {
    #[serde(rename = "driverId", default)]
    pub driver_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    /// Minor currency units (paise)
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub notes: Option<PaymentNotes>,
}

/// A captured payment with every required field present
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPayment {
    pub payment_id: String,
    pub order_id: String,
    pub account_id: String,
    pub amount_minor: i64,
}

impl CapturedPayment {
    /// Amount in major units (rupees)
    pub fn amount(&self) -> Decimal {
        Decimal::new(self.amount_minor, 2)
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl PaymentEntity {
    /// `None` when a required field is missing or blank
    pub fn into_captured(self) -> Option<CapturedPayment> {
        Some(CapturedPayment {
            account_id: present(self.notes.and_then(|n| n.driver_id))?,
            payment_id: present(self.id)?,
            order_id: present(self.order_id)?,
            amount_minor: self.amount?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_native_and_flat_shapes() {
        let native: WebhookEnvelope = serde_json::from_str(
            r#"{"event":"payment.captured","payload":{"payment":{"entity":
                {"id":"pay_1","order_id":"order_1","amount":50000,"notes":{"driverId":"d1"}}}}}"#,
        )
        .unwrap();
        let flat: WebhookEnvelope = serde_json::from_str(
            r#"{"event":"payment.captured","payload":
                {"id":"pay_1","order_id":"order_1","amount":50000,"notes":{"driverId":"d1"}}}"#,
        )
        .unwrap();

        for envelope in [native, flat] {
            let entity: PaymentEntity =
                serde_json::from_value(envelope.payment_value().clone()).unwrap();
            let payment = entity.into_captured().unwrap();
            assert_eq!(payment.payment_id, "pay_1");
            assert_eq!(payment.account_id, "d1");
            assert_eq!(payment.amount(), dec!(500.00));
        }
    }

    #[test]
    fn test_blank_driver_is_missing() {
        let entity: PaymentEntity = serde_json::from_str(
            r#"{"id":"pay_1","order_id":"o","amount":100,"notes":{"driverId":"  "}}"#,
        )
        .unwrap();
        assert!(entity.into_captured().is_none());
    }
}
