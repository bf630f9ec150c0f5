pub mod config;
pub mod error;
pub mod runner;
pub mod store_factory;
pub mod telemetry;
