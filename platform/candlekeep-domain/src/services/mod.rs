pub mod batching;
pub mod cost_model;
pub mod range_planner;
