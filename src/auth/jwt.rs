//! JWT Token Handler

use jsonwebtoken::{decode, DecodingKey, Validation};
use tracing::debug;

use super::models::Claims;
use crate::error::{AppError, AppResult};

/// Validates HS256 bearer tokens issued with the shared secret
pub struct JwtHandler {
    decoding_key: DecodingKey,
    #[cfg(test)]
    secret: String,
}

impl JwtHandler {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            #[cfg(test)]
            secret: secret.to_string(),
        }
    }

    /// Validate a JWT token and extract claims
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let decoded = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| {
                debug!(error = %e, "Rejected bearer token");
                AppError::Unauthenticated
            })?;

        Ok(decoded.claims)
    }
}

#[cfg(test)]
impl JwtHandler {
    pub fn generate_token(&self, subject: &str, role: super::models::Role) -> String {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let claims = Claims {
            sub: subject.to_string(),
            role,
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .expect("token encodes")
    }
}
