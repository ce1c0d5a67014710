pub mod api_settings;
pub mod decision_line;
pub mod intent;
pub mod position_sizing;
pub mod proximity;
