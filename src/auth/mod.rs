// Caller identity from bearer tokens
pub mod jwt;
pub mod middleware;
pub mod models;

pub use jwt::JwtHandler;
pub use models::{CallerIdentity, Role};
