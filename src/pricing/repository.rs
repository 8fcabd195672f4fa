use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use super::models::RateConfig;
use super::store::RateConfigSource;
use crate::error::AppResult;

/// Reads the single shared rate document
pub struct RateConfigRepository {
    pool: PgPool,
}

impl RateConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateConfigSource for RateConfigRepository {
    async fn load_rate_config(&self) -> AppResult<Option<RateConfig>> {
        let document: Option<Json<RateConfig>> =
            sqlx::query_scalar("SELECT document FROM rate_config WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(document.map(|Json(config)| config))
    }
}
