use crate::models::session::{Source, validate_session_id};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use validator::Validate;

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    /// Client-generated identifier, stable across retries of the same visit.
    #[validate(custom(function = "validate_session_id"))]
    #[schemars(regex(pattern = r"^[A-Za-z0-9_-]{1,128}$"))]
    pub session_id: String,

    pub source: Option<Source>,

    #[validate(length(min = 1, max = 80))]
    pub attendee_name: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationResponse {
    pub session_id: String,
    pub conversation_url: String,
    pub conversation_id: String,
    /// Present and true when an existing conversation was handed back.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reused: bool,
}
