use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::config::RateLimitConfig;
use crate::error::app_error::AppError;
use crate::middleware::current_request_id;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RateLimitBucket {
    Read,
    Conversation,
}

impl RateLimitBucket {
    fn as_str(self) -> &'static str {
        match self {
            RateLimitBucket::Read => "read",
            RateLimitBucket::Conversation => "conversation",
        }
    }
}

/// Fixed-window limiter keyed by client IP, route and bucket. Counters live in the
/// shared [`TtlCache`], so with the Redis backend the limit holds across instances.
pub(crate) struct RateLimiter {
    config: RateLimitConfig,
    window: Duration,
    cache: Arc<dyn TtlCache>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, cache: Arc<dyn TtlCache>) -> Self {
        let window = Duration::from_secs(config.window_seconds.max(1));
        Self { config, window, cache }
    }

    async fn check(&self, identity: &str, route: &str, bucket: RateLimitBucket) -> Result<RateLimitDecision, AppError> {
        // NOTE: fixed window; bursts can reach twice the limit across a window boundary.
        let limit = self.limit_for_bucket(bucket) as u64;
        let key = format!("ratelimit:{}:{}:{}", bucket.as_str(), route, identity);
        let state = self.cache.incr(&key, self.window).await?;

        if state.count > limit {
            Ok(RateLimitDecision::Limited {
                retry_after: state.expires_in,
            })
        } else {
            Ok(RateLimitDecision::Allow)
        }
    }

    fn limit_for_bucket(&self, bucket: RateLimitBucket) -> u32 {
        match bucket {
            RateLimitBucket::Read => self.config.read_limit,
            RateLimitBucket::Conversation => self.config.conversation_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateLimitDecision {
    Allow,
    Limited { retry_after: Duration },
}

/// Guard for read endpoints.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RateLimit;

/// Guard for conversation creation, which costs a vendor call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConversationRateLimit;

/// Seconds until the window resets, stashed for the 429 catcher.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RateLimitRetryAfter(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RateLimitError {
    TooManyRequests,
    MissingClientIp,
    Unavailable,
}

impl RateLimitError {
    fn status(self) -> Status {
        match self {
            RateLimitError::TooManyRequests => Status::TooManyRequests,
            RateLimitError::MissingClientIp => Status::BadRequest,
            RateLimitError::Unavailable => Status::InternalServerError,
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RateLimit {
    type Error = RateLimitError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        rate_limit_request(request, RateLimitBucket::Read).await.map(|_| RateLimit)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ConversationRateLimit {
    type Error = RateLimitError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        rate_limit_request(request, RateLimitBucket::Conversation)
            .await
            .map(|_| ConversationRateLimit)
    }
}

impl<'a> OpenApiFromRequest<'a> for RateLimit {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        too_many_requests_response()
    }
}

impl<'a> OpenApiFromRequest<'a> for ConversationRateLimit {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        too_many_requests_response()
    }
}

async fn rate_limit_request(request: &Request<'_>, bucket: RateLimitBucket) -> Outcome<(), RateLimitError> {
    let limiter = match request.rocket().state::<Arc<RateLimiter>>() {
        Some(limiter) => limiter,
        None => return Outcome::Success(()),
    };

    let request_id = current_request_id(request);

    let identity = match request.client_ip() {
        Some(ip) => ip.to_string(),
        None => {
            warn!(
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                "client ip unavailable for rate limiting"
            );
            if limiter.config.require_client_ip {
                return Outcome::Error((RateLimitError::MissingClientIp.status(), RateLimitError::MissingClientIp));
            }
            "missing-ip".to_string()
        }
    };

    let route = request
        .route()
        .map(|route| route.uri.to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    match limiter.check(&identity, &route, bucket).await {
        Ok(RateLimitDecision::Allow) => Outcome::Success(()),
        Ok(RateLimitDecision::Limited { retry_after }) => {
            let retry_after_secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            request.local_cache(|| Some(RateLimitRetryAfter(retry_after_secs)));
            warn!(
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                bucket = bucket.as_str(),
                retry_after_secs = %retry_after_secs,
                "rate limit exceeded"
            );
            Outcome::Error((RateLimitError::TooManyRequests.status(), RateLimitError::TooManyRequests))
        }
        Err(err) => {
            error!(request_id = %request_id, error = ?err, "rate limiter backend failed");
            Outcome::Error((RateLimitError::Unavailable.status(), RateLimitError::Unavailable))
        }
    }
}

fn too_many_requests_response() -> rocket_okapi::Result<Responses> {
    let mut responses = Responses::default();
    responses.responses.insert(
        "429".to_string(),
        RefOr::Object(OpenApiResponse {
            description: "Too Many Requests".to_string(),
            ..Default::default()
        }),
    );
    Ok(responses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::routes::error::too_many_requests;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use rocket::{catchers, get, routes};

    #[get("/limited")]
    async fn limited(_rate_limit: RateLimit) -> Status {
        Status::Ok
    }

    #[get("/other")]
    async fn other(_rate_limit: RateLimit) -> Status {
        Status::Ok
    }

    fn config(read_limit: u32, conversation_limit: u32, window_seconds: u64) -> RateLimitConfig {
        RateLimitConfig {
            conversation_limit,
            read_limit,
            window_seconds,
            require_client_ip: false,
        }
    }

    fn limiter(config: RateLimitConfig) -> RateLimiter {
        RateLimiter::new(config, Arc::new(MemoryCache::new()))
    }

    #[rocket::async_test]
    async fn rate_limiter_blocks_after_limit() {
        let limiter = limiter(config(2, 1, 60));

        for _ in 0..2 {
            let decision = limiter.check("127.0.0.1", "/limited", RateLimitBucket::Read).await.unwrap();
            assert_eq!(decision, RateLimitDecision::Allow);
        }
        assert!(matches!(
            limiter.check("127.0.0.1", "/limited", RateLimitBucket::Read).await.unwrap(),
            RateLimitDecision::Limited { .. }
        ));
    }

    #[rocket::async_test]
    async fn rate_limiter_resets_after_window() {
        let limiter = limiter(config(1, 1, 1));

        assert_eq!(
            limiter.check("127.0.0.1", "/limited", RateLimitBucket::Read).await.unwrap(),
            RateLimitDecision::Allow
        );
        assert!(matches!(
            limiter.check("127.0.0.1", "/limited", RateLimitBucket::Read).await.unwrap(),
            RateLimitDecision::Limited { .. }
        ));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(
            limiter.check("127.0.0.1", "/limited", RateLimitBucket::Read).await.unwrap(),
            RateLimitDecision::Allow
        );
    }

    #[rocket::async_test]
    async fn keys_are_separated_by_ip_route_and_bucket() {
        let limiter = limiter(config(1, 1, 60));

        assert_eq!(limiter.check("10.0.0.1", "/a", RateLimitBucket::Read).await.unwrap(), RateLimitDecision::Allow);
        assert_eq!(limiter.check("10.0.0.2", "/a", RateLimitBucket::Read).await.unwrap(), RateLimitDecision::Allow);
        assert_eq!(limiter.check("10.0.0.1", "/b", RateLimitBucket::Read).await.unwrap(), RateLimitDecision::Allow);
        assert_eq!(
            limiter.check("10.0.0.1", "/a", RateLimitBucket::Conversation).await.unwrap(),
            RateLimitDecision::Allow
        );
        assert!(matches!(
            limiter.check("10.0.0.1", "/a", RateLimitBucket::Read).await.unwrap(),
            RateLimitDecision::Limited { .. }
        ));
    }

    #[rocket::async_test]
    async fn conversation_bucket_uses_its_own_limit() {
        let limiter = limiter(config(10, 1, 60));

        assert_eq!(
            limiter.check("127.0.0.1", "/conversations", RateLimitBucket::Conversation).await.unwrap(),
            RateLimitDecision::Allow
        );
        assert!(matches!(
            limiter.check("127.0.0.1", "/conversations", RateLimitBucket::Conversation).await.unwrap(),
            RateLimitDecision::Limited { .. }
        ));
    }

    #[rocket::async_test]
    async fn rate_limit_retry_after_header_is_set() {
        let limiter = Arc::new(limiter(config(0, 0, 60)));

        let rocket = rocket::build()
            .manage(limiter)
            .mount("/", routes![limited, other])
            .register("/", catchers![too_many_requests]);

        let client = Client::tracked(rocket).await.expect("valid rocket instance");
        let response = client.get("/limited").dispatch().await;

        assert_eq!(response.status(), Status::TooManyRequests);
        assert_eq!(response.headers().get_one("Retry-After"), Some("60"));
        assert_eq!(response.content_type(), Some(ContentType::JSON));
        let body: serde_json::Value = response.into_json().await.expect("json body");
        assert_eq!(body["code"], "RATE_LIMITED");
    }

    #[rocket::async_test]
    async fn known_client_ip_passes_when_required() {
        let mut cfg = config(5, 5, 60);
        cfg.require_client_ip = true;

        let rocket = rocket::build().manage(Arc::new(limiter(cfg))).mount("/", routes![limited]);
        let client = Client::tracked(rocket).await.expect("valid rocket instance");
        let response = client
            .get("/limited")
            .remote("10.0.0.1:5000".parse().unwrap())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
    }
}
