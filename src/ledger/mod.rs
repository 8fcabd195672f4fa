pub mod executor;
pub mod models;
pub mod repository;
pub mod store;

pub use executor::{LedgerTransactionExecutor, RetryPolicy};
pub use repository::LedgerRepository;
pub use store::LedgerStore;
