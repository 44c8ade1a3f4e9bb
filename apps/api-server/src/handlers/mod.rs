//! HTTP handlers and route configuration.

mod health;
mod ping;

use std::sync::Arc;

use actix_web::web;
use gatekeep_core::ports::RateLimiter;

use crate::middleware::rate_limit::RateLimitMiddleware;

/// Configure all application routes.
///
/// `/health` stays outside the limiter so probes never consume quota.
pub fn configure_routes(limiter: Arc<dyn RateLimiter>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/api")
                    .wrap(RateLimitMiddleware::new(limiter))
                    .route("/ping", web::get().to(ping::ping)),
            );
    }
}
