use std::sync::Arc;

use lapse_store::AccountRepository;
use lapse_store_memory::MemoryAccountRepository;
#[cfg(feature = "postgres")]
use lapse_store_postgres::{PostgresAccountRepository, PostgresConfig};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::DaemonError;

/// Create the account repository described by `config`.
///
/// Database backends run their migrations while connecting.
pub async fn create_repository(
    config: &StoreConfig,
) -> Result<Arc<dyn AccountRepository>, DaemonError> {
    let repository: Arc<dyn AccountRepository> = match config.backend.as_str() {
        "memory" => Arc::new(create_memory(config).await?),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = config.url.as_deref().ok_or_else(|| {
                DaemonError::Config("postgres backend requires [store] url".into())
            })?;

            let pg_config = PostgresConfig {
                url: url.to_owned(),
                pool_size: config.pool_size,
                schema: config.schema.clone(),
                table_prefix: config.table_prefix.clone(),
                ssl_mode: config.ssl_mode.clone(),
                ssl_root_cert: config.ssl_root_cert.clone(),
            };

            Arc::new(PostgresAccountRepository::new(pg_config).await?)
        }
        other => {
            return Err(DaemonError::Config(format!(
                "unsupported store backend: {other} (is the matching feature enabled?)"
            )));
        }
    };

    info!(backend = %config.backend, "account repository initialized");
    Ok(repository)
}

async fn create_memory(config: &StoreConfig) -> Result<MemoryAccountRepository, DaemonError> {
    let Some(ref path) = config.seed_path else {
        return Ok(MemoryAccountRepository::new());
    };

    let contents = tokio::fs::read_to_string(path).await?;
    let repository = MemoryAccountRepository::from_json(&contents)?;
    info!(path = %path, accounts = repository.len(), "memory repository seeded");
    Ok(repository)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use lapse_core::{Account, AccountId};

    use super::*;

    #[tokio::test]
    async fn memory_backend_starts_empty() {
        let repo = create_repository(&StoreConfig::default()).await.unwrap();
        assert!(repo.get(&AccountId::from("anyone")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_backend_seeds_from_file() {
        let now = Utc::now();
        let accounts = vec![
            Account::new("p-1", "provider", now - Duration::days(90)),
            Account::new("p-2", "provider", now),
        ];
        let path =
            std::env::temp_dir().join(format!("lapse-seed-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, serde_json::to_string(&accounts).unwrap()).unwrap();

        let config = StoreConfig {
            seed_path: Some(path.to_string_lossy().into_owned()),
            ..StoreConfig::default()
        };
        let repo = create_repository(&config).await;
        std::fs::remove_file(&path).unwrap();

        let repo = repo.unwrap();
        let seeded = repo.get(&AccountId::from("p-1")).await.unwrap().unwrap();
        assert_eq!(seeded, accounts[0]);
    }

    #[tokio::test]
    async fn missing_seed_file_is_an_io_error() {
        let config = StoreConfig {
            seed_path: Some("/nonexistent/lapse/seed.json".into()),
            ..StoreConfig::default()
        };
        assert!(matches!(
            create_repository(&config).await,
            Err(DaemonError::Io(_))
        ));
    }

    #[tokio::test]
    async fn unknown_backend_rejected() {
        let config = StoreConfig {
            backend: "cassandra".into(),
            ..StoreConfig::default()
        };
        let Err(err) = create_repository(&config).await else {
            panic!("expected an error for an unknown backend");
        };
        assert!(err.to_string().contains("unsupported store backend: cassandra"));
    }
}
