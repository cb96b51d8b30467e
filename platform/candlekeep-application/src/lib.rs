pub mod budget;
pub mod config;
pub mod ingest;
pub mod scheduler;
