use crate::database::session::SessionRepository;
use crate::error::app_error::AppError;
use crate::models::session::{NewSession, Session, SessionStatus, SessionUpdate};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    claims: HashMap<String, Instant>,
}

/// Process-local session store. Sessions are never evicted; use the Postgres store
/// for anything longer-lived than a demo.
#[derive(Default)]
pub struct InMemoryRepository {
    inner: Mutex<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemoryRepository {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(id).cloned())
    }

    async fn get_session_by_conversation_id(&self, conversation_id: &str) -> Result<Option<Session>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .values()
            .filter(|session| session.conversation_id.as_deref() == Some(conversation_id))
            .max_by_key(|session| session.created_at)
            .cloned())
    }

    async fn create_session(&self, id: &str, fields: NewSession) -> Result<Session, AppError> {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(id) {
            return Err(AppError::Conflict(format!("Session {id} already exists")));
        }

        let session = Session {
            id: id.to_string(),
            conversation_id: fields.conversation_id,
            conversation_url: fields.conversation_url,
            status: fields.status,
            source: fields.source,
            attendee_name: fields.attendee_name,
            created_at: fields.created_at,
            updated_at: Utc::now(),
        };
        inner.sessions.insert(id.to_string(), session.clone());
        Ok(session)
    }

    async fn update_session(&self, id: &str, changes: SessionUpdate) -> Result<Option<Session>, AppError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.sessions.get_mut(id).map(|session| {
            changes.apply(session, Utc::now());
            session.clone()
        }))
    }

    async fn try_claim(&self, id: &str, lease: Duration) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        match inner.claims.get(id) {
            Some(claimed_at) if now.duration_since(*claimed_at) < lease => Ok(false),
            _ => {
                inner.claims.insert(id.to_string(), now);
                Ok(true)
            }
        }
    }

    async fn release_claim(&self, id: &str) -> Result<(), AppError> {
        self.inner.lock().await.claims.remove(id);
        Ok(())
    }

    async fn expire_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut expired = 0;
        for session in inner.sessions.values_mut() {
            if session.status.is_live() && session.created_at < cutoff {
                SessionUpdate::status(SessionStatus::Expired).apply(session, now);
                expired += 1;
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::Source;
    use chrono::Duration as ChronoDuration;

    fn new_session(conversation_id: &str, created_at: DateTime<Utc>) -> NewSession {
        NewSession {
            conversation_id: Some(conversation_id.to_string()),
            conversation_url: Some(format!("https://tavus.daily.co/{conversation_id}")),
            status: SessionStatus::Created,
            source: Some(Source::Nfc),
            attendee_name: None,
            created_at,
        }
    }

    #[rocket::async_test]
    async fn create_then_get() {
        let repo = InMemoryRepository::new();
        let created = repo.create_session("abc-123", new_session("c-1", Utc::now())).await.unwrap();
        assert_eq!(created.id, "abc-123");

        let fetched = repo.get_session("abc-123").await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(repo.get_session("missing").await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn create_rejects_duplicate_id() {
        let repo = InMemoryRepository::new();
        repo.create_session("abc", new_session("c-1", Utc::now())).await.unwrap();
        let err = repo.create_session("abc", new_session("c-2", Utc::now())).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[rocket::async_test]
    async fn update_missing_session_is_none() {
        let repo = InMemoryRepository::new();
        let result = repo.update_session("missing", SessionUpdate::status(SessionStatus::Ended)).await.unwrap();
        assert!(result.is_none());
    }

    #[rocket::async_test]
    async fn lookup_by_conversation_id() {
        let repo = InMemoryRepository::new();
        repo.create_session("a", new_session("c-a", Utc::now())).await.unwrap();
        repo.create_session("b", new_session("c-b", Utc::now())).await.unwrap();

        let found = repo.get_session_by_conversation_id("c-b").await.unwrap().unwrap();
        assert_eq!(found.id, "b");
        assert!(repo.get_session_by_conversation_id("c-z").await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn claim_is_exclusive_until_released_or_lapsed() {
        let repo = InMemoryRepository::new();
        let lease = Duration::from_secs(30);
        assert!(repo.try_claim("abc", lease).await.unwrap());
        assert!(!repo.try_claim("abc", lease).await.unwrap());
        assert!(repo.try_claim("other", lease).await.unwrap());

        repo.release_claim("abc").await.unwrap();
        assert!(repo.try_claim("abc", lease).await.unwrap());

        assert!(repo.try_claim("short", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(repo.try_claim("short", Duration::from_millis(10)).await.unwrap());
    }

    #[rocket::async_test]
    async fn expire_stale_only_touches_live_sessions() {
        let repo = InMemoryRepository::new();
        let old = Utc::now() - ChronoDuration::hours(2);
        repo.create_session("old", new_session("c-old", old)).await.unwrap();
        repo.create_session("fresh", new_session("c-fresh", Utc::now())).await.unwrap();
        repo.create_session("done", new_session("c-done", old)).await.unwrap();
        repo.update_session("done", SessionUpdate::status(SessionStatus::Ended)).await.unwrap();

        let count = repo.expire_stale_sessions(Utc::now() - ChronoDuration::hours(1)).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(repo.get_session("old").await.unwrap().unwrap().status, SessionStatus::Expired);
        assert_eq!(repo.get_session("fresh").await.unwrap().unwrap().status, SessionStatus::Created);
        assert_eq!(repo.get_session("done").await.unwrap().unwrap().status, SessionStatus::Ended);
    }
}
