use crate::cache::TtlCache;
use crate::cache::memory::MemoryCache;
use crate::cache::redis_store::RedisCache;
use crate::config::{CacheConfig, CacheBackend, DatabaseConfig, StorageBackend, StorageConfig};
use crate::database::memory::InMemoryRepository;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::session::SessionRepository;
use rocket::fairing::AdHoc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

pub async fn init_pool(db_config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.acquire_timeout))
        .idle_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_config.url)
        .await
}

async fn init_postgres_store(db_config: &DatabaseConfig) -> Result<PostgresRepository, String> {
    let pool = init_pool(db_config)
        .await
        .map_err(|e| format!("Failed to initialize database pool: {e}"))?;

    if db_config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| format!("Failed to run migrations: {e}"))?;
        tracing::info!("Database migrations applied");
    }

    Ok(PostgresRepository { pool })
}

/// Puts an `Arc<dyn SessionRepository>` into managed state.
pub fn stage_store(storage: StorageConfig) -> AdHoc {
    AdHoc::try_on_ignite("Session store", move |rocket| async move {
        let repository: Arc<dyn SessionRepository> = match storage.backend {
            StorageBackend::Memory => {
                tracing::info!("Using in-memory session store");
                Arc::new(InMemoryRepository::new())
            }
            StorageBackend::Postgres => match init_postgres_store(&storage.database).await {
                Ok(repository) => {
                    tracing::info!("Database pool initialized successfully");
                    Arc::new(repository)
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    return Err(rocket);
                }
            },
        };

        Ok(rocket.manage(repository))
    })
}

/// Puts an `Arc<dyn TtlCache>` into managed state.
pub fn stage_cache(cache: CacheConfig) -> AdHoc {
    AdHoc::try_on_ignite("TTL cache", move |rocket| async move {
        let ttl_cache: Arc<dyn TtlCache> = match cache.backend {
            CacheBackend::Memory => {
                let memory = Arc::new(MemoryCache::new());
                memory.clone().spawn_cleanup_task(Duration::from_secs(cache.cleanup_interval_seconds));
                tracing::info!("Using in-memory TTL cache");
                memory
            }
            CacheBackend::Redis => match RedisCache::connect(&cache.redis_url).await {
                Ok(redis) => {
                    tracing::info!("Redis connection established");
                    Arc::new(redis)
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to connect to Redis");
                    return Err(rocket);
                }
            },
        };

        Ok(rocket.manage(ttl_cache))
    })
}
