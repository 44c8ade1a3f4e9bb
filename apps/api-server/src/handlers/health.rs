//! Health check endpoint.

use actix_web::{HttpResponse, web};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub strategy: &'static str,
    pub store: &'static str,
    pub failure_policy: &'static str,
}

/// Health check endpoint - returns server status and the active limiter.
///
/// GET /health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let response = HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        strategy: state.strategy.as_str(),
        store: state.store_backend,
        failure_policy: state.limiter.failure_policy().as_str(),
    };

    HttpResponse::Ok().json(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitSettings, Strategy};
    use crate::state::build_limiter;
    use actix_web::{App, test};
    use gatekeep_infra::InMemoryStore;
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health_reports_limiter() {
        let settings = RateLimitSettings {
            strategy: Strategy::SlidingLogAtomic,
            ..RateLimitSettings::default()
        };
        let state = AppState {
            limiter: build_limiter(&settings, Arc::new(InMemoryStore::new())).unwrap(),
            strategy: settings.strategy,
            store_backend: "memory",
        };

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "ok");
        assert_eq!(body["strategy"], "sliding-log-atomic");
        assert_eq!(body["store"], "memory");
        assert_eq!(body["failure_policy"], "fail-open");
    }
}
