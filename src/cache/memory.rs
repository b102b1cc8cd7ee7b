use crate::cache::{TtlCache, WindowCount};
use crate::error::app_error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Entry {
    count: u64,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn_cleanup_task(self: Arc<Self>, cleanup_interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                self.purge_expired().await;
            }
        });
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[async_trait::async_trait]
impl TtlCache for MemoryCache {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, AppError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            count: 0,
            expires_at: now + window,
        });

        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + window;
        }

        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            expires_in: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn insert_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(false),
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        count: 1,
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
