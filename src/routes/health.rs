use crate::models::health::HealthResponse;
use rocket::serde::json::Json;
use rocket::{get, routes};

#[get("/healthz")]
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

pub fn routes() -> Vec<rocket::Route> {
    routes![healthz]
}
