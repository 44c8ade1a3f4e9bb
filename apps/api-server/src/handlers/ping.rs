//! Throttled probe endpoint.

use actix_web::HttpResponse;
use serde::Serialize;

#[derive(Serialize)]
pub struct PingResponse {
    pub message: &'static str,
    pub timestamp: String,
}

/// GET /api/ping
pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(PingResponse {
        message: "pong",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
