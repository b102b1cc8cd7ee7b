use crate::Config;
use crate::config::StorageBackend;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::session::SessionRepository;
use crate::db::init_pool;
use chrono::Utc;

#[derive(Debug, Clone, Copy)]
pub struct ExpireSessionsResult {
    pub sessions_expired: u64,
}

/// Marks every created/active session older than the configured TTL as expired.
pub async fn expire_sessions(config: &Config) -> Result<ExpireSessionsResult, String> {
    if config.storage.backend != StorageBackend::Postgres {
        return Err("expire-sessions needs storage.backend = \"postgres\"; the in-memory store lives inside the server process".to_string());
    }

    let pool = init_pool(&config.storage.database)
        .await
        .map_err(|err| format!("Failed to initialize database pool: {err}"))?;

    let repo = PostgresRepository { pool: pool.clone() };
    let cutoff = Utc::now() - chrono::Duration::milliseconds(config.session.ttl_ms.min(i64::MAX as u64) as i64);
    let result = repo
        .expire_stale_sessions(cutoff)
        .await
        .map_err(|err| format!("Failed to expire sessions: {err:?}"));

    pool.close().await;

    Ok(ExpireSessionsResult { sessions_expired: result? })
}
