pub mod actors;
pub mod handlers;
pub mod workflow;
