pub mod analysis;
pub mod portfolio;
pub mod trade_order;
pub mod user_policy;
