use crate::{Config, build_rocket};
use rocket::local::asynchronous::Client;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config wired to a mock Tavus server with in-memory backends.
pub fn test_config(tavus_url: &str) -> Config {
    let mut config = Config::default();
    config.tavus.base_url = tavus_url.to_string();
    config.tavus.api_key = Some("test-key".to_string());
    config.tavus.persona_id = Some("p-test".to_string());
    config
}

pub async fn client(config: Config) -> Client {
    Client::tracked(build_rocket(config)).await.expect("valid rocket instance")
}

pub fn conversation_body(id: &str) -> Value {
    json!({
        "conversation_id": id,
        "conversation_url": format!("https://tavus.daily.co/{id}"),
        "status": "active"
    })
}

/// Mounts a successful create-conversation mock expected to be hit `times` times.
pub async fn mock_create(server: &MockServer, conversation_id: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/v2/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_body(conversation_id)))
        .expect(times)
        .mount(server)
        .await;
}

/// Like [`mock_create`], but stops matching after one call so a second mock can
/// answer the next create with a different id.
pub async fn mock_create_once(server: &MockServer, conversation_id: &str) {
    Mock::given(method("POST"))
        .and(path("/v2/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_body(conversation_id)))
        .up_to_n_times(1)
        .expect(1)
        .mount(server)
        .await;
}
