pub mod alpaca_client;
pub mod client_factory;
pub mod completion_client;
