use crate::error::app_error::AppError;
use crate::error::json::JsonBody;
use crate::middleware::rate_limit::ConversationRateLimit;
use crate::models::conversation::{CreateConversationRequest, CreateConversationResponse};
use crate::service::conversation::ConversationService;
use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_okapi::openapi;
use std::sync::Arc;
use validator::Validate;

/// Create a conversation for a booth session, or hand back the live one
#[openapi(tag = "Conversations")]
#[post("/", data = "<payload>")]
pub async fn create_conversation(
    service: &State<Arc<ConversationService>>,
    _rate_limit: ConversationRateLimit,
    payload: JsonBody<CreateConversationRequest>,
) -> Result<Json<CreateConversationResponse>, AppError> {
    payload.validate()?;
    let response = service.create_or_reuse(&payload).await?;
    Ok(Json(response))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![create_conversation]
}
