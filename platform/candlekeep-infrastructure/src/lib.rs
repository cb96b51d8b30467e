pub mod persistence;
pub mod provider;
