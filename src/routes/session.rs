use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::session::{SessionResponse, is_valid_session_id};
use crate::service::conversation::ConversationService;
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::openapi;
use std::sync::Arc;

/// Get a booth session by its client-generated id
#[openapi(tag = "Sessions")]
#[get("/<session_id>")]
pub async fn get_session(service: &State<Arc<ConversationService>>, _rate_limit: RateLimit, session_id: &str) -> Result<Json<SessionResponse>, AppError> {
    if !is_valid_session_id(session_id) {
        return Err(AppError::BadRequest("sessionId must be 1-128 characters of letters, digits, '-' or '_'".to_string()));
    }

    let session = service.get_session(session_id).await?;
    Ok(Json(SessionResponse::from(&session)))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![get_session]
}
