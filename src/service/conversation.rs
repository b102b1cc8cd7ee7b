use crate::config::{Config, ScriptConfig};
use crate::database::session::SessionRepository;
use crate::error::app_error::AppError;
use crate::models::conversation::{CreateConversationRequest, CreateConversationResponse};
use crate::models::session::{NewSession, Session, SessionStatus, SessionUpdate};
use crate::service::signature::callback_token;
use crate::service::tavus::{ConversationProperties, ConversationRequest, ConversationVendor, VendorConversation};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

const PARTICIPANT_LEFT_TIMEOUT_SECS: u32 = 10;
const PARTICIPANT_ABSENT_TIMEOUT_SECS: u32 = 60;
/// Slack between the vendor deadline and the creation claim lease.
const CLAIM_LEASE_MARGIN_SECS: u64 = 5;

/// Everything the orchestrator needs from configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub session_ttl: chrono::Duration,
    pub claim_lease: std::time::Duration,
    pub persona_id: Option<String>,
    pub replica_id: Option<String>,
    pub verify_persona: bool,
    /// Absolute webhook URL handed to the vendor, without query parameters.
    pub callback_endpoint: Option<String>,
    pub webhook_secret: Option<String>,
    pub script: ScriptConfig,
}

impl ConversationSettings {
    pub fn from_config(config: &Config, api_base_path: &str) -> Self {
        let non_blank = |value: &Option<String>| value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);

        let callback_endpoint = non_blank(&config.app.public_base_url)
            .map(|origin| format!("{}{}/webhook/conversation-ended", origin.trim_end_matches('/'), api_base_path));

        Self {
            session_ttl: chrono::Duration::milliseconds(config.session.ttl_ms.min(i64::MAX as u64) as i64),
            claim_lease: std::time::Duration::from_secs(claim_lease_secs(config)),
            persona_id: non_blank(&config.tavus.persona_id),
            replica_id: non_blank(&config.tavus.replica_id),
            verify_persona: config.tavus.verify_persona,
            callback_endpoint,
            webhook_secret: non_blank(&config.tavus.webhook_secret),
            script: config.script.clone(),
        }
    }
}

/// The claim must outlive an in-flight vendor call, otherwise a second request could
/// take over the lapsed claim and create a duplicate conversation.
fn claim_lease_secs(config: &Config) -> u64 {
    let floor = config.tavus.request_timeout_secs.max(1).saturating_add(CLAIM_LEASE_MARGIN_SECS);
    if config.session.claim_lease_secs < floor {
        warn!(
            configured = config.session.claim_lease_secs,
            effective = floor,
            "claim lease is shorter than the vendor timeout; raising it"
        );
    }
    config.session.claim_lease_secs.max(floor)
}

/// Hands out a joinable conversation per visitor session, reusing the live one when
/// possible so a refreshed booth page does not start a second billed call.
pub struct ConversationService {
    repository: Arc<dyn SessionRepository>,
    vendor: Arc<dyn ConversationVendor>,
    settings: ConversationSettings,
}

impl ConversationService {
    pub fn new(repository: Arc<dyn SessionRepository>, vendor: Arc<dyn ConversationVendor>, settings: ConversationSettings) -> Self {
        Self {
            repository,
            vendor,
            settings,
        }
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, AppError> {
        self.repository
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {session_id} not found")))
    }

    pub async fn create_or_reuse(&self, request: &CreateConversationRequest) -> Result<CreateConversationResponse, AppError> {
        self.create_or_reuse_at(request, Utc::now()).await
    }

    pub(crate) async fn create_or_reuse_at(&self, request: &CreateConversationRequest, now: DateTime<Utc>) -> Result<CreateConversationResponse, AppError> {
        let session_id = request.session_id.as_str();

        if let Some(session) = self.repository.get_session(session_id).await?
            && let Some(response) = self.reuse(&session, now)
        {
            return Ok(response);
        }

        if !self.repository.try_claim(session_id, self.settings.claim_lease).await? {
            warn!(session_id = %session_id, "conversation creation already in progress");
            return Err(AppError::CreationPending(session_id.to_string()));
        }

        let result = self.create_claimed(request, now).await;

        if let Err(err) = self.repository.release_claim(session_id).await {
            warn!(session_id = %session_id, error = ?err, "failed to release creation claim");
        }

        result
    }

    fn reuse(&self, session: &Session, now: DateTime<Utc>) -> Option<CreateConversationResponse> {
        let (conversation_id, conversation_url) = session.resumable(now, self.settings.session_ttl)?;

        info!(session_id = %session.id, conversation_id = %conversation_id, "reusing live conversation");

        Some(CreateConversationResponse {
            session_id: session.id.clone(),
            conversation_url: conversation_url.to_string(),
            conversation_id: conversation_id.to_string(),
            reused: true,
        })
    }

    async fn create_claimed(&self, request: &CreateConversationRequest, now: DateTime<Utc>) -> Result<CreateConversationResponse, AppError> {
        let session_id = request.session_id.as_str();

        // Another request may have finished creating while we waited for the claim.
        let existing = self.repository.get_session(session_id).await?;
        if let Some(session) = &existing {
            if let Some(response) = self.reuse(session, now) {
                return Ok(response);
            }

            if session.status.is_live() && session.is_expired(now, self.settings.session_ttl) {
                info!(session_id = %session_id, "session outlived its ttl, marking expired");
                self.repository
                    .update_session(session_id, SessionUpdate::status(SessionStatus::Expired))
                    .await?;
            }
        }

        let vendor_request = self.build_vendor_request(request)?;
        let conversation = self.vendor.create_conversation(&vendor_request).await?;
        self.check_persona(&vendor_request, &conversation)?;

        info!(
            session_id = %session_id,
            conversation_id = %conversation.conversation_id,
            vendor_status = ?conversation.status,
            "created Tavus conversation"
        );

        let update = SessionUpdate {
            conversation_id: Some(conversation.conversation_id.clone()),
            conversation_url: Some(conversation.conversation_url.clone()),
            status: Some(SessionStatus::Created),
            source: request.source,
            attendee_name: request.attendee_name.clone(),
            created_at: Some(now),
        };

        let stored = match existing {
            Some(_) => self.repository.update_session(session_id, update.clone()).await?,
            None => None,
        };

        if stored.is_none() {
            self.repository
                .create_session(
                    session_id,
                    NewSession {
                        conversation_id: update.conversation_id,
                        conversation_url: update.conversation_url,
                        status: SessionStatus::Created,
                        source: request.source,
                        attendee_name: request.attendee_name.clone(),
                        created_at: now,
                    },
                )
                .await?;
        }

        Ok(CreateConversationResponse {
            session_id: session_id.to_string(),
            conversation_url: conversation.conversation_url,
            conversation_id: conversation.conversation_id,
            reused: false,
        })
    }

    fn build_vendor_request(&self, request: &CreateConversationRequest) -> Result<ConversationRequest, AppError> {
        let persona_id = self.settings.persona_id.clone().ok_or_else(AppError::missing_persona)?;
        let script = &self.settings.script;

        let mut context = format!("{} The product you represent is {}.", script.context.trim(), script.product_name);
        if let Some(name) = request.attendee_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            context.push_str(&format!(" The visitor's name is {name}."));
        }

        let callback_url = self.settings.callback_endpoint.as_ref().map(|endpoint| {
            let mut url = format!("{endpoint}?sessionId={}", urlencoding::encode(&request.session_id));
            if let Some(secret) = &self.settings.webhook_secret {
                url.push_str(&format!("&token={}", callback_token(secret, &request.session_id)));
            }
            url
        });

        Ok(ConversationRequest {
            replica_id: self.settings.replica_id.clone(),
            persona_id,
            callback_url,
            conversation_name: format!("Booth visit {}", request.session_id),
            conversational_context: context,
            custom_greeting: script.greeting.clone(),
            properties: ConversationProperties {
                max_call_duration: script.max_call_duration_secs,
                participant_left_timeout: PARTICIPANT_LEFT_TIMEOUT_SECS,
                participant_absent_timeout: PARTICIPANT_ABSENT_TIMEOUT_SECS,
                language: script.language.clone(),
                enable_recording: false,
            },
        })
    }

    /// Only ids the vendor actually echoes are compared.
    fn check_persona(&self, requested: &ConversationRequest, returned: &VendorConversation) -> Result<(), AppError> {
        if !self.settings.verify_persona {
            return Ok(());
        }

        if let Some(persona) = returned.persona_id.as_deref()
            && persona != requested.persona_id
        {
            return Err(AppError::PersonaMismatch {
                requested: requested.persona_id.clone(),
                returned: persona.to_string(),
            });
        }

        if let (Some(wanted), Some(replica)) = (requested.replica_id.as_deref(), returned.replica_id.as_deref())
            && wanted != replica
        {
            return Err(AppError::PersonaMismatch {
                requested: wanted.to_string(),
                returned: replica.to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryRepository;
    use crate::models::session::Source;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeVendor {
        calls: AtomicUsize,
        persona_echo: Option<String>,
        requests: Mutex<Vec<ConversationRequest>>,
    }

    impl FakeVendor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                persona_echo: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConversationVendor for FakeVendor {
        async fn create_conversation(&self, request: &ConversationRequest) -> Result<VendorConversation, AppError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.requests.lock().unwrap().push(request.clone());
            Ok(VendorConversation {
                conversation_id: format!("c-{n}"),
                conversation_url: format!("https://tavus.daily.co/c-{n}"),
                persona_id: self.persona_echo.clone(),
                replica_id: None,
                status: Some("active".to_string()),
            })
        }
    }

    fn settings() -> ConversationSettings {
        ConversationSettings {
            session_ttl: chrono::Duration::milliseconds(3_600_000),
            claim_lease: std::time::Duration::from_secs(30),
            persona_id: Some("p-1".to_string()),
            replica_id: None,
            verify_persona: true,
            callback_endpoint: None,
            webhook_secret: None,
            script: ScriptConfig::default(),
        }
    }

    fn request(session_id: &str) -> CreateConversationRequest {
        CreateConversationRequest {
            session_id: session_id.to_string(),
            source: Some(Source::Nfc),
            attendee_name: None,
        }
    }

    fn service(vendor: Arc<FakeVendor>, settings: ConversationSettings) -> (ConversationService, Arc<InMemoryRepository>) {
        let repository = Arc::new(InMemoryRepository::new());
        (ConversationService::new(repository.clone(), vendor, settings), repository)
    }

    #[rocket::async_test]
    async fn first_visit_creates_one_conversation() {
        let vendor = Arc::new(FakeVendor::new());
        let (service, repository) = service(vendor.clone(), settings());

        let response = service.create_or_reuse(&request("s-1")).await.unwrap();

        assert_eq!(vendor.calls(), 1);
        assert!(!response.reused);
        let stored = repository.get_session("s-1").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Created);
        assert_eq!(stored.conversation_id.as_deref(), Some(response.conversation_id.as_str()));
        assert_eq!(stored.source, Some(Source::Nfc));
    }

    #[rocket::async_test]
    async fn abc_123_reuses_within_ttl_and_recreates_after() {
        let vendor = Arc::new(FakeVendor::new());
        let (service, repository) = service(vendor.clone(), settings());
        let t0 = Utc::now();

        let first = service.create_or_reuse_at(&request("abc-123"), t0).await.unwrap();
        assert_eq!(repository.get_session("abc-123").await.unwrap().unwrap().status, SessionStatus::Created);

        let again = service
            .create_or_reuse_at(&request("abc-123"), t0 + chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert!(again.reused);
        assert_eq!(again.conversation_id, first.conversation_id);
        assert_eq!(again.conversation_url, first.conversation_url);
        assert_eq!(vendor.calls(), 1);

        let later = t0 + chrono::Duration::seconds(3700);
        let fresh = service.create_or_reuse_at(&request("abc-123"), later).await.unwrap();
        assert!(!fresh.reused);
        assert_ne!(fresh.conversation_id, first.conversation_id);
        assert_eq!(vendor.calls(), 2);

        let stored = repository.get_session("abc-123").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Created);
        assert_eq!(stored.created_at, later);
    }

    #[rocket::async_test]
    async fn ended_session_gets_a_new_conversation() {
        let vendor = Arc::new(FakeVendor::new());
        let (service, repository) = service(vendor.clone(), settings());

        service.create_or_reuse(&request("s-2")).await.unwrap();
        repository
            .update_session("s-2", SessionUpdate::status(SessionStatus::Ended))
            .await
            .unwrap();

        let response = service.create_or_reuse(&request("s-2")).await.unwrap();
        assert!(!response.reused);
        assert_eq!(vendor.calls(), 2);
    }

    #[rocket::async_test]
    async fn held_claim_reports_pending_without_vendor_call() {
        let vendor = Arc::new(FakeVendor::new());
        let (service, repository) = service(vendor.clone(), settings());

        assert!(repository.try_claim("s-3", std::time::Duration::from_secs(30)).await.unwrap());

        let err = service.create_or_reuse(&request("s-3")).await.unwrap_err();
        assert_eq!(err.code(), "CONVERSATION_PENDING");
        assert_eq!(vendor.calls(), 0);
    }

    #[rocket::async_test]
    async fn claim_is_released_after_failure() {
        let vendor = Arc::new(FakeVendor::new());
        let mut settings = settings();
        settings.persona_id = None;
        let (service, repository) = service(vendor.clone(), settings);

        let err = service.create_or_reuse(&request("s-4")).await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        assert!(repository.try_claim("s-4", std::time::Duration::from_secs(30)).await.unwrap());
        assert_eq!(vendor.calls(), 0);
    }

    #[rocket::async_test]
    async fn echoed_persona_must_match() {
        let vendor = Arc::new(FakeVendor {
            persona_echo: Some("someone-else".to_string()),
            ..FakeVendor::new()
        });
        let (service, repository) = service(vendor, settings());

        let err = service.create_or_reuse(&request("s-5")).await.unwrap_err();
        assert_eq!(err.code(), "PERSONA_MISMATCH");
        assert!(repository.get_session("s-5").await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn persona_check_can_be_disabled() {
        let vendor = Arc::new(FakeVendor {
            persona_echo: Some("someone-else".to_string()),
            ..FakeVendor::new()
        });
        let mut settings = settings();
        settings.verify_persona = false;
        let (service, _) = service(vendor, settings);

        assert!(service.create_or_reuse(&request("s-6")).await.is_ok());
    }

    #[rocket::async_test]
    async fn vendor_request_carries_script_and_signed_callback() {
        let vendor = Arc::new(FakeVendor::new());
        let mut settings = settings();
        settings.callback_endpoint = Some("https://booth.example.com/api/webhook/conversation-ended".to_string());
        settings.webhook_secret = Some("secret".to_string());
        let (service, _) = service(vendor.clone(), settings);

        let mut req = request("s-7");
        req.attendee_name = Some("Sam".to_string());
        service.create_or_reuse(&req).await.unwrap();

        let sent = vendor.requests.lock().unwrap()[0].clone();
        assert_eq!(sent.persona_id, "p-1");
        assert_eq!(sent.properties.max_call_duration, 150);
        assert!(sent.conversational_context.contains("Sam"));
        let callback = sent.callback_url.unwrap();
        assert!(callback.starts_with("https://booth.example.com/api/webhook/conversation-ended?sessionId=s-7&token="));
        assert!(callback.ends_with(&callback_token("secret", "s-7")));
    }

    #[test]
    fn settings_build_callback_from_public_base_url() {
        let mut config = Config::default();
        config.app.public_base_url = Some("https://booth.example.com/".to_string());
        config.tavus.persona_id = Some("  ".to_string());

        let settings = ConversationSettings::from_config(&config, "/api");
        assert_eq!(
            settings.callback_endpoint.as_deref(),
            Some("https://booth.example.com/api/webhook/conversation-ended")
        );
        assert!(settings.persona_id.is_none());
        assert_eq!(settings.session_ttl, chrono::Duration::hours(1));
    }

    #[test]
    fn claim_lease_outlives_the_vendor_deadline() {
        let mut config = Config::default();
        assert_eq!(ConversationSettings::from_config(&config, "/api").claim_lease.as_secs(), 30);

        config.tavus.request_timeout_secs = 60;
        config.session.claim_lease_secs = 30;
        assert_eq!(ConversationSettings::from_config(&config, "/api").claim_lease.as_secs(), 65);

        config.tavus.request_timeout_secs = 0;
        config.session.claim_lease_secs = 0;
        assert_eq!(ConversationSettings::from_config(&config, "/api").claim_lease.as_secs(), 6);
    }

    #[rocket::async_test]
    async fn get_session_reports_not_found() {
        let (service, _) = service(Arc::new(FakeVendor::new()), settings());
        assert!(matches!(service.get_session("missing").await, Err(AppError::NotFound(_))));
    }
}
