pub mod analysis_store;
pub mod brokerage_client;
pub mod completion_client;
