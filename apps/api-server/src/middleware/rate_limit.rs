//! Rate limiting middleware.

use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use gatekeep_core::domain::RateLimitKey;
use gatekeep_core::ports::{RateLimiter, Verdict};

use crate::response::ErrorResponse;

/// Rate limiting middleware factory.
pub struct RateLimitMiddleware {
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    limiter: Arc<dyn RateLimiter>,
}

/// Whole seconds for a `Retry-After` header, rounded up.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = self.limiter.clone();

        // Get client identifier (IP address)
        let key = RateLimitKey::new(
            req.connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown"),
        );

        Box::pin(async move {
            match limiter.evaluate(&key).await {
                Ok(Verdict::Admit) => {
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Ok(Verdict::Reject { retry_after }) => {
                    tracing::warn!(key = %key, "Rate limit exceeded");

                    let mut response = HttpResponse::TooManyRequests();
                    response.insert_header(("X-RateLimit-Remaining", "0"));

                    let error = match retry_after.map(retry_after_secs) {
                        Some(secs) => {
                            response.insert_header(("Retry-After", secs.to_string()));
                            ErrorResponse::too_many_requests(format!(
                                "Rate limit exceeded. Try again in {secs} seconds."
                            ))
                        }
                        None => ErrorResponse::too_many_requests("Rate limit exceeded."),
                    };

                    Ok(req.into_response(response.json(error)).map_into_right_body())
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Rate limit check failed");

                    let response = HttpResponse::ServiceUnavailable()
                        .json(ErrorResponse::service_unavailable());

                    Ok(req.into_response(response).map_into_right_body())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, test, web};
    use gatekeep_core::domain::LimitPolicy;
    use gatekeep_infra::{AtomicSlidingLogRateLimiter, FixedWindowRateLimiter, InMemoryStore};

    async fn ok() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    fn request(peer: &str) -> test::TestRequest {
        test::TestRequest::get().uri("/").peer_addr(peer.parse().unwrap())
    }

    #[::core::prelude::v1::test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_millis(200)), 1);
    }

    #[actix_web::test]
    async fn test_rejects_with_429_and_retry_after() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = Arc::new(FixedWindowRateLimiter::new(
            store,
            LimitPolicy::new(1, Duration::from_secs(60)).unwrap(),
        ));
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(limiter))
                .route("/", web::get().to(ok)),
        )
        .await;

        let resp = test::call_service(&app, request("10.0.0.1:4000").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(&app, request("10.0.0.1:4001").to_request()).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("Retry-After").unwrap(), "60");

        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, 429);

        // Another client is unaffected
        let resp = test::call_service(&app, request("10.0.0.2:4000").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_propagated_store_error_is_503() {
        let store = Arc::new(InMemoryStore::new());
        store.set_available(false);
        let limiter = Arc::new(FixedWindowRateLimiter::new(
            store,
            LimitPolicy::new(10, Duration::from_secs(60)).unwrap(),
        ));
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(limiter))
                .route("/", web::get().to(ok)),
        )
        .await;

        let resp = test::call_service(&app, request("10.0.0.1:4000").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_fail_open_limiter_lets_request_through() {
        let store = Arc::new(InMemoryStore::new());
        store.set_available(false);
        let limiter = Arc::new(AtomicSlidingLogRateLimiter::new(
            store,
            LimitPolicy::new(1, Duration::from_secs(60)).unwrap(),
        ));
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(limiter))
                .route("/", web::get().to(ok)),
        )
        .await;

        for port in 4000..4003 {
            let req = request(&format!("10.0.0.1:{port}")).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }
    }
}
