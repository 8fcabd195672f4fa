pub mod trigger;

pub use trigger::{CommissionAccrualTrigger, CommissionConfig};
