use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use validator::ValidationError;

static SESSION_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid session id regex"));

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Ended,
    Expired,
    PersonaDrift,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Expired => "expired",
            SessionStatus::PersonaDrift => "persona_drift",
        }
    }

    /// Statuses in which the vendor conversation can still be joined.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Created | SessionStatus::Active)
    }

    /// Transitions driven by vendor webhooks. Recreation by the orchestrator is not
    /// subject to this table.
    pub fn accepts_webhook_transition(&self, next: SessionStatus) -> bool {
        match next {
            SessionStatus::Active => *self == SessionStatus::Created,
            SessionStatus::Ended => self.is_live(),
            SessionStatus::PersonaDrift => matches!(self, SessionStatus::Created | SessionStatus::Active | SessionStatus::Ended),
            SessionStatus::Created | SessionStatus::Expired => false,
        }
    }

    /// Lenient parse for values read back from storage. Unknown values are treated as
    /// ended so they are never resumed.
    pub fn from_stored(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            tracing::warn!(status = value, "unknown stored session status, treating as ended");
            SessionStatus::Ended
        })
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(SessionStatus::Created),
            "active" => Ok(SessionStatus::Active),
            "ended" => Ok(SessionStatus::Ended),
            "expired" => Ok(SessionStatus::Expired),
            "persona_drift" | "persona-drift" => Ok(SessionStatus::PersonaDrift),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// How the visitor reached the booth page.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Nfc,
    Qr,
    Link,
    Direct,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Nfc => "nfc",
            Source::Qr => "qr",
            Source::Link => "link",
            Source::Direct => "direct",
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nfc" => Ok(Source::Nfc),
            "qr" => Ok(Source::Qr),
            "link" => Ok(Source::Link),
            "direct" => Ok(Source::Direct),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub conversation_id: Option<String>,
    pub conversation_url: Option<String>,
    pub status: SessionStatus,
    pub source: Option<Source>,
    pub attendee_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }

    /// Returns the conversation id and URL if this session can be rejoined instead of
    /// creating a new vendor conversation.
    pub fn resumable(&self, now: DateTime<Utc>, ttl: Duration) -> Option<(&str, &str)> {
        if !self.status.is_live() || self.is_expired(now, ttl) {
            return None;
        }
        match (self.conversation_id.as_deref(), self.conversation_url.as_deref()) {
            (Some(id), Some(url)) if !id.is_empty() && !url.is_empty() => Some((id, url)),
            _ => None,
        }
    }
}

/// Fields for a session that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub conversation_id: Option<String>,
    pub conversation_url: Option<String>,
    pub status: SessionStatus,
    pub source: Option<Source>,
    pub attendee_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub conversation_id: Option<String>,
    pub conversation_url: Option<String>,
    pub status: Option<SessionStatus>,
    pub source: Option<Source>,
    pub attendee_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply(&self, session: &mut Session, now: DateTime<Utc>) {
        if let Some(conversation_id) = &self.conversation_id {
            session.conversation_id = Some(conversation_id.clone());
        }
        if let Some(conversation_url) = &self.conversation_url {
            session.conversation_url = Some(conversation_url.clone());
        }
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(source) = self.source {
            session.source = Some(source);
        }
        if let Some(attendee_name) = &self.attendee_name {
            session.attendee_name = Some(attendee_name.clone());
        }
        if let Some(created_at) = self.created_at {
            session.created_at = created_at;
        }
        session.updated_at = now;
    }
}

#[derive(Serialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub conversation_id: Option<String>,
    pub conversation_url: Option<String>,
    pub status: SessionStatus,
    pub source: Option<Source>,
    pub attendee_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            conversation_id: session.conversation_id.clone(),
            conversation_url: session.conversation_url.clone(),
            status: session.status,
            source: session.source,
            attendee_name: session.attendee_name.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

pub fn is_valid_session_id(id: &str) -> bool {
    SESSION_ID_PATTERN.is_match(id)
}

pub fn validate_session_id(id: &str) -> Result<(), ValidationError> {
    if is_valid_session_id(id) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_session_id").with_message("must be 1-128 characters of letters, digits, '-' or '_'".into()))
    }
}
