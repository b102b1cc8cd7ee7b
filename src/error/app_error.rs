use rocket::http::{ContentType, Status};
use rocket::response::Responder;
use rocket::{Request, Response};
use rocket_okapi::OpenApiError;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::response::OpenApiResponderInner;
use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;
use tracing::error;
use validator::ValidationErrors;

pub const MAX_CONCURRENT_CODE: &str = "TAVUS_MAX_CONCURRENT";

#[derive(Debug, Error)]
pub enum AppError {
    /// Operator-facing misconfiguration. `status` is 500 for a missing API key and
    /// 400 for an unresolvable persona.
    #[error("Configuration error: {message}")]
    Configuration { status: u16, message: String },
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationErrors),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("A conversation is already being created for session {0}")]
    CreationPending(String),
    #[error("Tavus request failed with status {status}")]
    Vendor { status: u16, body: String },
    #[error("Tavus reports the maximum number of concurrent conversations is reached")]
    VendorMaxConcurrent { status: u16, body: String },
    #[error("Tavus did not answer within {0} seconds")]
    VendorTimeout(u64),
    #[error("Tavus is unreachable")]
    VendorUnavailable {
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid vendor response: {0}")]
    InvalidVendorResponse(String),
    #[error("Persona mismatch: requested {requested}, vendor returned {returned}")]
    PersonaMismatch { requested: String, returned: String },
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Internal server error")]
    Db {
        message: String,
        #[source]
        source: sqlx::error::Error,
    },
    #[error("Internal server error")]
    Cache {
        message: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("Internal server error")]
    ConfigurationLoad {
        message: String,
        #[source]
        source: figment::Error,
    },
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AppError {
    pub fn db(message: impl Into<String>, source: sqlx::error::Error) -> Self {
        Self::Db {
            message: message.into(),
            source,
        }
    }

    pub fn cache(message: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Cache {
            message: message.into(),
            source,
        }
    }

    pub fn missing_api_key() -> Self {
        Self::Configuration {
            status: 500,
            message: "TAVUS_API_KEY is not configured".to_string(),
        }
    }

    pub fn missing_persona() -> Self {
        Self::Configuration {
            status: 400,
            message: "No persona id configured; set TAVUS_PERSONA_ID".to_string(),
        }
    }

    /// Stable machine-readable code clients can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration { .. } => "CONFIGURATION_ERROR",
            AppError::BadRequest(_) | AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::CreationPending(_) => "CONVERSATION_PENDING",
            AppError::Vendor { .. } => "TAVUS_ERROR",
            AppError::VendorMaxConcurrent { .. } => MAX_CONCURRENT_CODE,
            AppError::VendorTimeout(_) => "TAVUS_TIMEOUT",
            AppError::VendorUnavailable { .. } => "TAVUS_UNAVAILABLE",
            AppError::InvalidVendorResponse(_) => "INVALID_VENDOR_RESPONSE",
            AppError::PersonaMismatch { .. } => "PERSONA_MISMATCH",
            AppError::InvalidSignature => "INVALID_SIGNATURE",
            AppError::Db { .. } | AppError::Cache { .. } | AppError::ConfigurationLoad { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether the client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::VendorTimeout(_) | AppError::VendorUnavailable { .. } | AppError::CreationPending(_)
        )
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::ValidationError(errors) => serde_json::to_value(errors).ok(),
            AppError::Vendor { body, .. } | AppError::VendorMaxConcurrent { body, .. } => {
                Some(serde_json::Value::String(body_preview(body)))
            }
            _ => None,
        }
    }
}

fn proxied_status(code: u16) -> Status {
    match Status::from_code(code) {
        Some(status) if status.class().is_client_error() || status.class().is_server_error() => status,
        _ => Status::BadGateway,
    }
}

pub(crate) fn body_preview(body: &str) -> String {
    if body.len() > 500 {
        let mut end = 500;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

impl From<&AppError> for Status {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::Configuration { status, .. } => Status::from_code(*status).unwrap_or(Status::InternalServerError),
            AppError::BadRequest(_) => Status::BadRequest,
            AppError::ValidationError(_) => Status::BadRequest,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Conflict(_) => Status::Conflict,
            AppError::CreationPending(_) => Status::Conflict,
            AppError::Vendor { status, .. } => proxied_status(*status),
            AppError::VendorMaxConcurrent { status, .. } => proxied_status(*status),
            AppError::VendorTimeout(_) => Status::GatewayTimeout,
            AppError::VendorUnavailable { .. } => Status::BadGateway,
            AppError::InvalidVendorResponse(_) => Status::InternalServerError,
            AppError::PersonaMismatch { .. } => Status::InternalServerError,
            AppError::InvalidSignature => Status::Unauthorized,
            AppError::Db { .. } => Status::InternalServerError,
            AppError::Cache { .. } => Status::InternalServerError,
            AppError::ConfigurationLoad { .. } => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &Request<'_>) -> rocket::response::Result<'static> {
        let method = req.method();
        let uri = req.uri();

        let request_id = req
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.clone());

        let status = Status::from(&self);
        let code = self.code();

        if status.class().is_server_error() {
            error!(
                error = ?self,
                code = code,
                request_id = %request_id.as_deref().unwrap_or("unknown"),
                method = %method,
                uri = %uri,
                "request failed"
            );
        } else {
            tracing::warn!(
                error = %self,
                code = code,
                request_id = %request_id.as_deref().unwrap_or("unknown"),
                method = %method,
                uri = %uri,
                "request rejected"
            );
        }

        let body = ErrorBody {
            error: self.to_string(),
            code,
            retryable: self.is_retryable(),
            details: self.details(),
            request_id,
        };
        let body = serde_json::to_string(&body).map_err(|_| Status::InternalServerError)?;

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl OpenApiResponderInner for AppError {
    fn responses(_gen: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse};
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Bad Request"),
            ("404", "Not Found"),
            ("409", "Conflict"),
            ("500", "Internal Server Error"),
            ("502", "Bad Gateway"),
            ("504", "Gateway Timeout"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::ConfigurationLoad {
            message: "Failed to read configuration".to_string(),
            source: e,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict("Resource already exists".to_string()),
            _ => AppError::db("Database error", e),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::cache("Cache error", e)
    }
}
