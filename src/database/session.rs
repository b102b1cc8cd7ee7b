use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::session::{NewSession, Session, SessionStatus, SessionUpdate, Source};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Storage for visitor sessions. Implemented by the in-memory map used for demos and
/// tests and by Postgres for deployments.
#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, AppError>;
    async fn get_session_by_conversation_id(&self, conversation_id: &str) -> Result<Option<Session>, AppError>;
    /// Fails with [`AppError::Conflict`] if the id is already taken.
    async fn create_session(&self, id: &str, fields: NewSession) -> Result<Session, AppError>;
    /// Returns `None` when no session has this id.
    async fn update_session(&self, id: &str, changes: SessionUpdate) -> Result<Option<Session>, AppError>;
    /// Atomically reserves `id` for vendor creation. Returns false while another
    /// holder's lease is still running.
    async fn try_claim(&self, id: &str, lease: Duration) -> Result<bool, AppError>;
    async fn release_claim(&self, id: &str) -> Result<(), AppError>;
    /// Marks created/active sessions older than `cutoff` as expired. Returns how many changed.
    async fn expire_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    conversation_id: Option<String>,
    conversation_url: Option<String>,
    status: String,
    source: Option<String>,
    attendee_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            conversation_url: row.conversation_url,
            status: SessionStatus::from_stored(&row.status),
            source: row.source.as_deref().and_then(|source| source.parse::<Source>().ok()),
            attendee_name: row.attendee_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SESSION_COLUMNS: &str = "id, conversation_id, conversation_url, status, source, attendee_name, created_at, updated_at";

#[async_trait::async_trait]
impl SessionRepository for PostgresRepository {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!("SELECT {SESSION_COLUMNS} FROM booth_session WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Session::from))
    }

    async fn get_session_by_conversation_id(&self, conversation_id: &str) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM booth_session WHERE conversation_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Session::from))
    }

    async fn create_session(&self, id: &str, fields: NewSession) -> Result<Session, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            INSERT INTO booth_session (id, conversation_id, conversation_url, status, source, attendee_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&fields.conversation_id)
        .bind(&fields.conversation_url)
        .bind(fields.status.as_str())
        .bind(fields.source.map(|source| source.as_str()))
        .bind(&fields.attendee_name)
        .bind(fields.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn update_session(&self, id: &str, changes: SessionUpdate) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE booth_session
            SET conversation_id = COALESCE($2, conversation_id),
                conversation_url = COALESCE($3, conversation_url),
                status = COALESCE($4, status),
                source = COALESCE($5, source),
                attendee_name = COALESCE($6, attendee_name),
                created_at = COALESCE($7, created_at),
                updated_at = now()
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&changes.conversation_id)
        .bind(&changes.conversation_url)
        .bind(changes.status.map(|status| status.as_str()))
        .bind(changes.source.map(|source| source.as_str()))
        .bind(&changes.attendee_name)
        .bind(changes.created_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Session::from))
    }

    async fn try_claim(&self, id: &str, lease: Duration) -> Result<bool, AppError> {
        // A lapsed lease is taken over in the same statement.
        let claimed = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO booth_session_claim (session_id, claimed_at)
            VALUES ($1, now())
            ON CONFLICT (session_id) DO UPDATE SET claimed_at = now()
            WHERE booth_session_claim.claimed_at < now() - make_interval(secs => $2)
            RETURNING session_id
            "#,
        )
        .bind(id)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn release_claim(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM booth_session_claim WHERE session_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn expire_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE booth_session
            SET status = 'expired', updated_at = now()
            WHERE status IN ('created', 'active') AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
