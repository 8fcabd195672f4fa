pub mod fare;
pub mod models;
pub mod repository;
pub mod store;

pub use fare::{FareCalculator, FareConfig, FareQuote};
pub use repository::RateConfigRepository;
pub use store::RateConfigSource;
