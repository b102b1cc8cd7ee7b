//! Client for the Tavus conversation API.
//!
//! Only conversation creation is used. The response is parsed against a single schema
//! and anything else is rejected, so a vendor-side format change fails loudly instead
//! of storing half-filled sessions.

use crate::config::TavusConfig;
use crate::error::app_error::{AppError, body_preview};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

const MAX_CONCURRENT_MARKER: &str = "maximum concurrent conversations";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_id: Option<String>,
    pub persona_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub conversation_name: String,
    pub conversational_context: String,
    pub custom_greeting: String,
    pub properties: ConversationProperties,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationProperties {
    pub max_call_duration: u32,
    pub participant_left_timeout: u32,
    pub participant_absent_timeout: u32,
    pub language: String,
    pub enable_recording: bool,
}

/// The documented create-conversation response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VendorConversation {
    pub conversation_id: String,
    pub conversation_url: String,
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub replica_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait ConversationVendor: Send + Sync {
    async fn create_conversation(&self, request: &ConversationRequest) -> Result<VendorConversation, AppError>;
}

#[derive(Debug, Clone)]
pub struct TavusClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout_secs: u64,
}

impl TavusClient {
    pub fn new(config: &TavusConfig) -> Result<Self, AppError> {
        let timeout_secs = config.request_timeout_secs.max(1);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|source| AppError::VendorUnavailable { source })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    fn transport_error(&self, source: reqwest::Error) -> AppError {
        if source.is_timeout() {
            warn!(timeout_secs = self.timeout_secs, "Tavus request timed out");
            AppError::VendorTimeout(self.timeout_secs)
        } else {
            error!(error = %source, "Tavus request failed before a response was received");
            AppError::VendorUnavailable { source }
        }
    }
}

#[async_trait]
impl ConversationVendor for TavusClient {
    async fn create_conversation(&self, request: &ConversationRequest) -> Result<VendorConversation, AppError> {
        let api_key = self.api_key.as_deref().ok_or_else(AppError::missing_api_key)?;
        let url = format!("{}/v2/conversations", self.base_url);

        debug!(url = %url, persona_id = %request.persona_id, "creating Tavus conversation");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(vendor_error(status.as_u16(), body));
        }

        parse_conversation(&body)
    }
}

fn vendor_error(status: u16, body: String) -> AppError {
    if body.to_lowercase().contains(MAX_CONCURRENT_MARKER) {
        warn!(status = status, "Tavus concurrent conversation limit reached");
        AppError::VendorMaxConcurrent { status, body }
    } else {
        error!(status = status, body = %body_preview(&body), "Tavus API error");
        AppError::Vendor { status, body }
    }
}

fn parse_conversation(body: &str) -> Result<VendorConversation, AppError> {
    let conversation: VendorConversation = serde_json::from_str(body).map_err(|e| {
        error!(error = %e, payload = %body_preview(body), "unexpected Tavus response shape");
        AppError::InvalidVendorResponse(format!("could not parse conversation: {e}"))
    })?;

    if conversation.conversation_id.trim().is_empty() || conversation.conversation_url.trim().is_empty() {
        error!(payload = %body_preview(body), "Tavus response is missing conversation id or url");
        return Err(AppError::InvalidVendorResponse("conversation_id and conversation_url must be non-empty".to_string()));
    }

    Ok(conversation)
}
