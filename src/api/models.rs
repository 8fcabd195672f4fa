use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ledger::models::{Account, LedgerEntry};
use crate::payments::WebhookOutcome;

// ========== REQUEST MODELS ==========

/// Fare RPC body. Presence is checked by the fare calculator.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareRequest {
    pub vehicle_key: Option<String>,
    pub distance_km: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    #[validate(length(min = 1, max = 32))]
    pub vehicle_key: Option<String>,
    pub distance_km: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelRideRequest {
    #[validate(length(max = 280))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountRequest {
    #[validate(length(min = 1, max = 128))]
    pub account_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl From<&WebhookOutcome> for WebhookResponse {
    fn from(outcome: &WebhookOutcome) -> Self {
        match outcome {
            WebhookOutcome::Rejected(reason) => Self {
                status: "rejected",
                outcome: outcome.as_str(),
                reason: Some(reason.as_str()),
            },
            _ => Self {
                status: "ok",
                outcome: outcome.as_str(),
                reason: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub account_id: String,
    pub balance: Decimal,
    pub accrued_commission: Decimal,
    pub last_balance_update: Option<DateTime<Utc>>,
    pub last_settlement: Option<DateTime<Utc>>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            account_id: account.account_id,
            balance: account.balance,
            accrued_commission: account.accrued_commission,
            last_balance_update: account.last_balance_update,
            last_settlement: account.last_settlement,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub account_id: String,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub storage: String,
}
