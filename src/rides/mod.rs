pub mod models;
pub mod reaper;
pub mod repository;
pub mod service;
pub mod store;

pub use reaper::{ReapReport, ReaperConfig, StaleRequestReaper};
pub use repository::RideRepository;
pub use service::RideService;
pub use store::RideStore;
