pub mod commands;
pub mod obs;
pub mod progress;
