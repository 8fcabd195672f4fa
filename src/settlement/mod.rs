// Commission settlement
pub mod scheduler;

pub use scheduler::{RunTrigger, SettlementRunReport, SettlementScheduleConfig, SettlementScheduler};
