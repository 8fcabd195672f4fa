use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Rider,
    Admin,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

/// Authenticated caller, attached to the request by the auth middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub subject: String,
    pub role: Role,
}

impl CallerIdentity {
    pub fn new(subject: impl Into<String>, role: Role) -> Self {
        Self {
            subject: subject.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin role required".into()))
        }
    }

    /// The caller owns `account_id` or is an admin
    pub fn require_owner_or_admin(&self, account_id: &str) -> AppResult<()> {
        if self.is_admin() || self.subject == account_id {
            Ok(())
        } else {
            Err(AppError::Forbidden("Not allowed to access this account".into()))
        }
    }
}

impl From<Claims> for CallerIdentity {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            role: claims.role,
        }
    }
}

/// Handlers receive the caller as an optional extension
pub fn require_caller(caller: Option<CallerIdentity>) -> AppResult<CallerIdentity> {
    caller.ok_or(AppError::Unauthenticated)
}
