mod config;
mod migrations;
mod repository;

pub use config::PostgresConfig;
pub use migrations::run_migrations;
pub use repository::PostgresAccountRepository;
