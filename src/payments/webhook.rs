use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::models::{CapturedPayment, PaymentEntity, WebhookEnvelope, PAYMENT_CAPTURED};
use super::signature::verify_signature;
use crate::error::{AppError, AppResult, LedgerError};
use crate::ledger::models::LedgerOperation;
use crate::ledger::LedgerTransactionExecutor;

/// Why a webhook delivery was refused. Rejections are final for the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    BadSignature,
    MalformedPayload,
    MissingField,
    InvalidAmount,
    AccountNotFound,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::BadSignature => "bad_signature",
            RejectReason::MalformedPayload => "malformed_payload",
            RejectReason::MissingField => "missing_field",
            RejectReason::InvalidAmount => "invalid_amount",
            RejectReason::AccountNotFound => "account_not_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Accepted {
        payment_id: String,
        account_id: String,
        amount: Decimal,
    },
    /// The payment was already credited (redelivery)
    AlreadyProcessed { payment_id: String },
    /// Not a `payment.captured` event
    Ignored { event: String },
    Rejected(RejectReason),
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Accepted { .. } => "accepted",
            WebhookOutcome::AlreadyProcessed { .. } => "already_processed",
            WebhookOutcome::Ignored { .. } => "ignored",
            WebhookOutcome::Rejected(_) => "rejected",
        }
    }
}

/// Verifies, deduplicates and applies payment gateway credits
pub struct PaymentWebhookIngestor {
    executor: Arc<LedgerTransactionExecutor>,
    secret: Option<String>,
}

impl PaymentWebhookIngestor {
    pub fn new(executor: Arc<LedgerTransactionExecutor>, secret: Option<String>) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        if secret.is_none() {
            warn!("WEBHOOK_SECRET not set - payment webhooks will fail until it is configured");
        }
        Self { executor, secret }
    }

    pub async fn ingest(&self, raw_payload: &[u8], signature: Option<&str>) -> AppResult<WebhookOutcome> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| AppError::Config("Webhook secret is not configured".into()))?;

        let signature_ok = signature
            .map(|sig| verify_signature(secret.as_bytes(), raw_payload, sig))
            .unwrap_or(false);
        if !signature_ok {
            warn!(has_signature = signature.is_some(), "Webhook signature verification failed");
            return Ok(WebhookOutcome::Rejected(RejectReason::BadSignature));
        }

        let envelope: WebhookEnvelope = match serde_json::from_slice(raw_payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Malformed webhook payload");
                return Ok(WebhookOutcome::Rejected(RejectReason::MalformedPayload));
            }
        };

        if envelope.event != PAYMENT_CAPTURED {
            info!(event = %envelope.event, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored { event: envelope.event });
        }

        let entity: PaymentEntity = match serde_json::from_value(envelope.payment_value().clone()) {
            Ok(entity) => entity,
            Err(e) => {
                warn!(error = %e, "Malformed payment entity");
                return Ok(WebhookOutcome::Rejected(RejectReason::MalformedPayload));
            }
        };

        let Some(payment) = entity.into_captured() else {
            warn!("Captured payment is missing driverId, id, order_id or amount");
            return Ok(WebhookOutcome::Rejected(RejectReason::MissingField));
        };

        if payment.amount_minor <= 0 {
            warn!(payment_id = %payment.payment_id, amount = payment.amount_minor, "Non-positive payment amount");
            return Ok(WebhookOutcome::Rejected(RejectReason::InvalidAmount));
        }

        self.credit(payment).await
    }

    async fn credit(&self, payment: CapturedPayment) -> AppResult<WebhookOutcome> {
        let store = self.executor.store();
        if store
            .find_credit_by_reference(&payment.account_id, &payment.payment_id)
            .await?
            .is_some()
        {
            info!(payment_id = %payment.payment_id, account_id = %payment.account_id, "Payment already processed");
            return Ok(WebhookOutcome::AlreadyProcessed { payment_id: payment.payment_id });
        }

        let amount = payment.amount();
        let op = LedgerOperation::Credit {
            amount,
            external_ref: payment.payment_id.clone(),
            description: format!("payment recharge (order {})", payment.order_id),
        };

        match self.executor.apply(&payment.account_id, op).await {
            Ok(_) => {
                info!(
                    payment_id = %payment.payment_id,
                    order_id = %payment.order_id,
                    account_id = %payment.account_id,
                    amount = %amount,
                    "Payment credited"
                );
                Ok(WebhookOutcome::Accepted {
                    payment_id: payment.payment_id,
                    account_id: payment.account_id,
                    amount,
                })
            }
            Err(AppError::Ledger(LedgerError::DuplicateReference { .. })) => {
                info!(payment_id = %payment.payment_id, "Concurrent redelivery already credited");
                Ok(WebhookOutcome::AlreadyProcessed { payment_id: payment.payment_id })
            }
            Err(AppError::Ledger(LedgerError::AccountNotFound(account_id))) => {
                warn!(payment_id = %payment.payment_id, %account_id, "Payment for unknown account");
                Ok(WebhookOutcome::Rejected(RejectReason::AccountNotFound))
            }
            Err(e) => {
                error!(payment_id = %payment.payment_id, error = %e, "Failed to credit payment");
                Err(e)
            }
        }
    }
}
