pub mod models;
pub mod signature;
pub mod webhook;

pub use webhook::{PaymentWebhookIngestor, RejectReason, WebhookOutcome};
