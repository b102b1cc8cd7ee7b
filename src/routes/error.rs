use crate::error::app_error::ErrorBody;
use crate::error::json::BodyRejection;
use crate::middleware::current_request_id;
use crate::middleware::rate_limit::RateLimitRetryAfter;
use rocket::http::{ContentType, Header, Status};
use rocket::response::{self, Responder};
use rocket::{Request, Response, catch};
use serde_json::json;
use std::io::Cursor;

/// Error body for failures that never reached a handler (guards, routing).
pub struct CaughtError {
    status: Status,
    body: ErrorBody,
    retry_after: Option<u64>,
}

impl CaughtError {
    fn new(req: &Request<'_>, status: Status, message: &str, code: &'static str) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: message.to_string(),
                code,
                retryable: false,
                details: None,
                request_id: Some(current_request_id(req)),
            },
            retry_after: None,
        }
    }
}

impl<'r> Responder<'r, 'static> for CaughtError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let body = serde_json::to_string(&self.body).map_err(|_| Status::InternalServerError)?;

        let mut builder = Response::build();
        builder
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body));

        if let Some(seconds) = self.retry_after {
            builder.header(Header::new("Retry-After", seconds.to_string()));
        }

        builder.ok()
    }
}

#[catch(400)]
pub fn bad_request(req: &Request) -> CaughtError {
    let mut error = CaughtError::new(req, Status::BadRequest, "Bad request", "VALIDATION_ERROR");
    if let Some(rejection) = req.local_cache(|| None::<BodyRejection>).as_ref() {
        error.body.error = "Request body is not valid".to_string();
        error.body.details = Some(json!({
            "message": rejection.message,
            "line": rejection.line,
            "column": rejection.column,
        }));
    }
    error
}

#[catch(401)]
pub fn unauthorized(req: &Request) -> CaughtError {
    CaughtError::new(req, Status::Unauthorized, "Unauthorized", "INVALID_SIGNATURE")
}

#[catch(404)]
pub fn not_found(req: &Request) -> CaughtError {
    CaughtError::new(req, Status::NotFound, "Not found", "NOT_FOUND")
}

#[catch(409)]
pub fn conflict(req: &Request) -> CaughtError {
    CaughtError::new(req, Status::Conflict, "Conflict", "CONFLICT")
}

#[catch(413)]
pub fn payload_too_large(req: &Request) -> CaughtError {
    CaughtError::new(req, Status::PayloadTooLarge, "Request body is too large", "VALIDATION_ERROR")
}

#[catch(422)]
pub fn unprocessable_entity(req: &Request) -> CaughtError {
    CaughtError::new(req, Status::UnprocessableEntity, "Request body has the wrong shape", "VALIDATION_ERROR")
}

#[catch(429)]
pub fn too_many_requests(req: &Request) -> CaughtError {
    let mut error = CaughtError::new(req, Status::TooManyRequests, "Too many requests", "RATE_LIMITED");
    error.body.retryable = true;
    error.retry_after = req.local_cache(|| None::<RateLimitRetryAfter>).as_ref().map(|r| r.0);
    error
}

#[catch(500)]
pub fn internal_error(req: &Request) -> CaughtError {
    CaughtError::new(req, Status::InternalServerError, "Internal server error", "INTERNAL_ERROR")
}

#[catch(default)]
pub fn default_catcher(status: Status, req: &Request) -> CaughtError {
    let code = if status.class().is_server_error() { "INTERNAL_ERROR" } else { "VALIDATION_ERROR" };
    CaughtError::new(req, status, status.reason_lossy(), code)
}

pub fn catchers() -> Vec<rocket::Catcher> {
    rocket::catchers![
        bad_request,
        unauthorized,
        not_found,
        conflict,
        payload_too_large,
        unprocessable_entity,
        too_many_requests,
        internal_error,
        default_catcher
    ]
}
