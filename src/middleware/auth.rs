//! # API Key Authentication
//!
//! Every protected resource requires `Authorization: Bearer <api_key>`, where
//! `api_key` is the single shared key from the configuration. The comparison
//! is exact: scheme, spacing and case all have to match.
//!
//! `OPTIONS` requests pass through unauthenticated so browsers can complete
//! CORS pre-flight before sending the key.
//!
//! ## Key Rust Concepts:
//! - **EitherBody**: The middleware returns either the inner service's body
//!   (left) or its own 401 body (right), so the response type stays concrete
//! - **into_parts**: A rejected request is answered without ever polling the
//!   inner service, so no handler runs and the upload is never read

use crate::error::AppError;
use crate::state::AppState;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, Method},
    web, Error, ResponseError,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};

pub struct ApiKeyAuth;

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = ApiKeyAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthMiddleware { service }))
    }
}

pub struct ApiKeyAuthMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if req.method() == Method::OPTIONS || is_authorized(&req) {
            let fut = self.service.call(req);
            return Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) });
        }

        tracing::warn!(
            method = %req.method(),
            path = %req.path(),
            has_header = req.headers().contains_key(header::AUTHORIZATION),
            "Rejected request with invalid API key"
        );

        let (request, _payload) = req.into_parts();
        let response = AppError::Unauthorized("Invalid or missing API key".to_string())
            .error_response()
            .map_into_right_body();
        Box::pin(async move { Ok(ServiceResponse::new(request, response)) })
    }
}

/// Whether the request carries exactly `Bearer <configured key>`.
fn is_authorized(req: &ServiceRequest) -> bool {
    let Some(state) = req.app_data::<web::Data<AppState>>() else {
        tracing::error!("Application state missing; rejecting request");
        return false;
    };

    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == format!("Bearer {}", state.config.auth.api_key))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::transcription::registry::ModelRegistry;
    use actix_web::{http::StatusCode, test, App, HttpResponse};

    fn state() -> web::Data<AppState> {
        let mut config = AppConfig::default();
        config.auth.api_key = "sk-test".to_string();
        web::Data::new(AppState::new(config, ModelRegistry::default()))
    }

    macro_rules! protected_app {
        () => {
            test::init_service(
                App::new().app_data(state()).service(
                    web::resource("/protected")
                        .route(web::get().to(|| async { HttpResponse::Ok().body("secret") }))
                        .route(web::method(Method::OPTIONS).to(|| async { HttpResponse::Ok().finish() }))
                        .wrap(ApiKeyAuth),
                ),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_valid_key_passes() {
        let app = protected_app!();
        let req = test::TestRequest::get()
            .uri("/protected")
            .insert_header((header::AUTHORIZATION, "Bearer sk-test"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await, "secret");
    }

    #[actix_web::test]
    async fn test_missing_or_wrong_key_is_rejected() {
        let app = protected_app!();
        for header_value in [None, Some("Bearer wrong"), Some("bearer sk-test"), Some("sk-test"), Some("Bearer  sk-test")] {
            let mut req = test::TestRequest::get().uri("/protected");
            if let Some(value) = header_value {
                req = req.insert_header((header::AUTHORIZATION, value));
            }
            let resp = test::call_service(&app, req.to_request()).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "header {:?}", header_value);

            let body: serde_json::Value = test::read_body_json(resp).await;
            assert_eq!(body["type"], "invalid_api_key");
        }
    }

    #[actix_web::test]
    async fn test_options_needs_no_key() {
        let app = protected_app!();
        let req = test::TestRequest::default()
            .method(Method::OPTIONS)
            .uri("/protected")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
