//! TradePilot decision engine library
//!
//! Turns risk assessments into cash-bounded trade orders and coordinates the
//! analysis workflow that produces and executes them.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod secrets;
pub mod task_runner;
