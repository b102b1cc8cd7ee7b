use crate::error::app_error::AppError;
use crate::models::webhook::WebhookAck;
use crate::service::signature::SIGNATURE_HEADER;
use crate::service::webhook::{WebhookDelivery, WebhookService};
use rocket::data::{Data, ToByteUnit};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::{FromForm, State, post, routes};
use std::sync::Arc;
use tracing::warn;

const WEBHOOK_BODY_LIMIT_KIB: u64 = 1024;

/// Raw `x-tavus-signature` header, if the vendor sent one.
pub struct WebhookSignature(Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for WebhookSignature {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, ()> {
        Outcome::Success(WebhookSignature(req.headers().get_one(SIGNATURE_HEADER).map(str::to_string)))
    }
}

/// Query parameters we put on the callback URL when creating the conversation.
#[derive(Debug, FromForm)]
pub struct CallbackQuery {
    #[field(name = "sessionId")]
    session_id: Option<String>,
    token: Option<String>,
}

#[post("/conversation-ended?<query..>", data = "<body>")]
pub async fn conversation_ended(
    service: &State<Arc<WebhookService>>,
    signature: WebhookSignature,
    query: CallbackQuery,
    body: Data<'_>,
) -> Result<Json<WebhookAck>, AppError> {
    let bytes = body
        .open(WEBHOOK_BODY_LIMIT_KIB.kibibytes())
        .into_bytes()
        .await
        .map_err(|e| AppError::BadRequest(format!("could not read webhook body: {e}")))?;

    if !bytes.is_complete() {
        warn!("webhook body exceeded size limit");
        return Err(AppError::BadRequest("webhook body is too large".to_string()));
    }
    let bytes = bytes.into_inner();

    let ack = service
        .ingest(WebhookDelivery {
            body: &bytes,
            signature: signature.0.as_deref(),
            session_id: query.session_id.as_deref(),
            token: query.token.as_deref(),
        })
        .await?;

    Ok(Json(ack))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![conversation_ended]
}

#[cfg(test)]
mod tests {
    use crate::service::signature::sign_hex;
    use crate::test_utils::{client, mock_create, test_config};
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{Value, json};
    use wiremock::MockServer;

    async fn start_session(client: &Client, session_id: &str) {
        let response = client
            .post("/api/conversations")
            .header(ContentType::JSON)
            .body(json!({ "sessionId": session_id }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    async fn session_status(client: &Client, session_id: &str) -> Value {
        let response = client.get(format!("/api/sessions/{session_id}")).dispatch().await;
        let body: Value = response.into_json().await.unwrap();
        body["status"].clone()
    }

    #[rocket::async_test]
    async fn duplicate_delivery_is_flagged() {
        let server = MockServer::start().await;
        mock_create(&server, "c-1", 1).await;
        let client = client(test_config(&server.uri())).await;
        start_session(&client, "s-1").await;

        let event = json!({"event_type": "system.shutdown", "conversation_id": "c-1"}).to_string();

        let first = client
            .post("/api/webhook/conversation-ended")
            .header(ContentType::JSON)
            .body(&event)
            .dispatch()
            .await;
        assert_eq!(first.status(), Status::Ok);
        assert_eq!(first.into_json::<Value>().await.unwrap(), json!({"received": true}));

        let second = client
            .post("/api/webhook/conversation-ended")
            .header(ContentType::JSON)
            .body(&event)
            .dispatch()
            .await;
        assert_eq!(second.status(), Status::Ok);
        assert_eq!(second.into_json::<Value>().await.unwrap(), json!({"received": true, "duplicate": true}));

        assert_eq!(session_status(&client, "s-1").await, "ended");
    }

    #[rocket::async_test]
    async fn wrong_hmac_is_401_and_changes_nothing() {
        let server = MockServer::start().await;
        mock_create(&server, "c-1", 1).await;
        let mut config = test_config(&server.uri());
        config.tavus.webhook_secret = Some("shared".to_string());
        config.tavus.webhook_verify = true;
        let client = client(config).await;
        start_session(&client, "s-2").await;

        let event = json!({"event_type": "system.shutdown", "conversation_id": "c-1"}).to_string();
        let response = client
            .post("/api/webhook/conversation-ended")
            .header(ContentType::JSON)
            .header(Header::new("x-tavus-signature", sign_hex("wrong", event.as_bytes())))
            .body(&event)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Unauthorized);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["code"], "INVALID_SIGNATURE");
        assert_eq!(session_status(&client, "s-2").await, "created");
    }

    #[rocket::async_test]
    async fn signed_delivery_with_callback_query_is_applied() {
        let server = MockServer::start().await;
        mock_create(&server, "c-1", 1).await;
        let mut config = test_config(&server.uri());
        config.tavus.webhook_secret = Some("shared".to_string());
        config.tavus.webhook_verify = true;
        let client = client(config).await;
        start_session(&client, "s-3").await;

        let event = json!({"event_type": "system.replica_joined"}).to_string();
        let token = sign_hex("shared", b"s-3");
        let response = client
            .post(format!("/api/webhook/conversation-ended?sessionId=s-3&token={token}"))
            .header(ContentType::JSON)
            .header(Header::new("x-tavus-signature", format!("sha256={}", sign_hex("shared", event.as_bytes()))))
            .body(&event)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        assert_eq!(session_status(&client, "s-3").await, "active");
    }

    #[rocket::async_test]
    async fn malformed_body_is_400() {
        let client = client(test_config("http://127.0.0.1:9")).await;

        let response = client
            .post("/api/webhook/conversation-ended")
            .header(ContentType::JSON)
            .body("{oops")
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
}
