use async_trait::async_trait;

use super::models::RateConfig;
use crate::error::AppResult;

/// Read-only access to the shared rate document
#[async_trait]
pub trait RateConfigSource: Send + Sync {
    /// `None` when the document has never been written
    async fn load_rate_config(&self) -> AppResult<Option<RateConfig>>;
}
