pub mod manager;
pub mod models;
pub mod pricing;
#[cfg(test)]
mod tests;

pub use manager::RiskManager;
pub use models::*;
pub use pricing::{entry_price, exit_price, profit_loss_percent};
