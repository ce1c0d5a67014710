pub mod cash_constraint;
pub mod decision_engine;
pub mod intent_normalizer;
pub mod near_limit;
pub mod position_sizer;
pub mod trade_order_builder;
