use crate::cache::{TtlCache, WindowCount};
use crate::error::app_error::AppError;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;

// Starts the expiry only on the first increment so the window stays fixed.
const INCR_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Redis-backed cache so several server instances share counters and dedupe keys.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    incr_script: Script,
    prefix: String,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager,
            incr_script: Script::new(INCR_WINDOW_SCRIPT),
            prefix: "leadbooth:".to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().clamp(1, u64::MAX as u128) as u64
}

#[async_trait::async_trait]
impl TtlCache for RedisCache {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, AppError> {
        let mut conn = self.manager.clone();
        let (count, ttl_ms): (u64, i64) = self
            .incr_script
            .key(self.key(key))
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowCount {
            count,
            expires_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn insert_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let stored: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(stored.is_some())
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("DEL").arg(self.key(key)).query_async(&mut conn).await?;
        Ok(())
    }
}
