use crate::cache::TtlCache;
use crate::config::Config;
use crate::database::session::SessionRepository;
use crate::error::app_error::AppError;
use crate::models::session::{Session, SessionStatus, SessionUpdate};
use crate::models::webhook::{EventKind, WebhookAck, WebhookEvent};
use crate::service::guardrail::ContentInspector;
use crate::service::signature::{body_digest, normalize_signature, verify_callback_token, verify_signature};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One raw delivery from the vendor, as received on the wire.
#[derive(Debug, Clone, Copy)]
pub struct WebhookDelivery<'a> {
    pub body: &'a [u8],
    pub signature: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub token: Option<&'a str>,
}

pub struct WebhookService {
    repository: Arc<dyn SessionRepository>,
    cache: Arc<dyn TtlCache>,
    inspector: Arc<dyn ContentInspector>,
    secret: Option<String>,
    verify: bool,
    dedupe_ttl: Duration,
}

impl WebhookService {
    pub fn new(repository: Arc<dyn SessionRepository>, cache: Arc<dyn TtlCache>, inspector: Arc<dyn ContentInspector>, config: &Config) -> Self {
        Self {
            repository,
            cache,
            inspector,
            secret: config.tavus.webhook_secret.clone().filter(|s| !s.trim().is_empty()),
            verify: config.webhook_verification_enabled(),
            dedupe_ttl: Duration::from_millis(config.webhook.dedupe_ttl_ms.max(1)),
        }
    }

    pub async fn ingest(&self, delivery: WebhookDelivery<'_>) -> Result<WebhookAck, AppError> {
        self.authenticate(&delivery)?;

        let event: WebhookEvent = serde_json::from_slice(delivery.body).map_err(|e| {
            warn!(error = %e, "malformed webhook payload");
            AppError::BadRequest(format!("invalid webhook payload: {e}"))
        })?;

        let dedupe_key = format!(
            "webhook:{}",
            match delivery.signature.map(normalize_signature).filter(|s| !s.is_empty()) {
                Some(signature) => signature,
                None => body_digest(delivery.body),
            }
        );

        if !self.cache.insert_if_absent(&dedupe_key, self.dedupe_ttl).await? {
            info!(event_type = %event.event_type, conversation_id = ?event.conversation_id, "duplicate webhook delivery");
            return Ok(WebhookAck::duplicate());
        }

        if let Err(err) = self.process(&event, &delivery).await {
            if let Err(remove_err) = self.cache.remove(&dedupe_key).await {
                warn!(error = ?remove_err, "failed to drop dedupe key after processing error");
            }
            return Err(err);
        }

        Ok(WebhookAck::processed())
    }

    fn authenticate(&self, delivery: &WebhookDelivery<'_>) -> Result<(), AppError> {
        if !self.verify {
            return Ok(());
        }

        let Some(secret) = self.secret.as_deref() else {
            return Err(AppError::Configuration {
                status: 500,
                message: "Webhook verification is enabled but TAVUS_WEBHOOK_SECRET is not set".to_string(),
            });
        };

        match delivery.signature {
            Some(signature) if verify_signature(secret, delivery.body, signature) => Ok(()),
            Some(_) => Err(AppError::InvalidSignature),
            None => {
                warn!("webhook delivery without signature header");
                Err(AppError::InvalidSignature)
            }
        }
    }

    async fn process(&self, event: &WebhookEvent, delivery: &WebhookDelivery<'_>) -> Result<(), AppError> {
        let kind = EventKind::classify(&event.event_type);
        debug!(
            event_type = %event.event_type,
            message_type = ?event.message_type,
            timestamp = ?event.timestamp,
            kind = ?kind,
            "processing webhook event"
        );

        let target = match kind {
            EventKind::Termination => SessionStatus::Ended,
            EventKind::Liveness => SessionStatus::Active,
            EventKind::Transcription => match self.find_drift(event) {
                Some(term) => {
                    warn!(conversation_id = ?event.conversation_id, term = %term, "replica used a forbidden term");
                    SessionStatus::PersonaDrift
                }
                None => return Ok(()),
            },
            EventKind::Perception => {
                info!(conversation_id = ?event.conversation_id, "perception analysis received");
                return Ok(());
            }
            EventKind::Other => {
                debug!(event_type = %event.event_type, conversation_id = ?event.conversation_id, "ignoring webhook event");
                return Ok(());
            }
        };

        let Some(session) = self.resolve_session(event, delivery).await? else {
            warn!(
                event_type = %event.event_type,
                conversation_id = ?event.conversation_id,
                "webhook does not match any session"
            );
            return Ok(());
        };

        // A session recreated after expiry must not be touched by events from its old call.
        if let (Some(event_conversation), Some(current)) = (event.conversation_id.as_deref(), session.conversation_id.as_deref())
            && event_conversation != current
        {
            info!(
                session_id = %session.id,
                event_conversation = %event_conversation,
                current_conversation = %current,
                "ignoring event for a superseded conversation"
            );
            return Ok(());
        }

        if !session.status.accepts_webhook_transition(target) {
            debug!(session_id = %session.id, from = %session.status, to = %target, "transition not applicable");
            return Ok(());
        }

        self.repository.update_session(&session.id, SessionUpdate::status(target)).await?;
        info!(
            session_id = %session.id,
            from = %session.status,
            to = %target,
            shutdown_reason = ?event.shutdown_reason(),
            "session status updated from webhook"
        );

        Ok(())
    }

    fn find_drift(&self, event: &WebhookEvent) -> Option<String> {
        event
            .transcript()
            .iter()
            .filter(|turn| turn.is_replica())
            .filter_map(|turn| turn.content.as_deref())
            .find_map(|content| self.inspector.inspect(content))
            .map(|finding| finding.term)
    }

    async fn resolve_session(&self, event: &WebhookEvent, delivery: &WebhookDelivery<'_>) -> Result<Option<Session>, AppError> {
        if let Some(session_id) = self.trusted_query_session(delivery)
            && let Some(session) = self.repository.get_session(session_id).await?
        {
            return Ok(Some(session));
        }

        if let Some(session_id) = event.session_id()
            && let Some(session) = self.repository.get_session(session_id).await?
        {
            return Ok(Some(session));
        }

        match event.conversation_id.as_deref() {
            Some(conversation_id) => self.repository.get_session_by_conversation_id(conversation_id).await,
            None => Ok(None),
        }
    }

    fn trusted_query_session<'a>(&self, delivery: &WebhookDelivery<'a>) -> Option<&'a str> {
        let session_id = delivery.session_id?;
        match self.secret.as_deref() {
            None => Some(session_id),
            Some(secret) => match delivery.token {
                Some(token) if verify_callback_token(secret, session_id, token) => Some(session_id),
                _ => {
                    warn!(session_id = %session_id, "ignoring sessionId query without a valid callback token");
                    None
                }
            },
        }
    }
}
