//! # Route Table
//!
//! Every path is registered explicitly from the tables below. actix matches
//! a path to the first resource that owns it and answers 405 instead of
//! trying a second resource with the same path, so each distinct path gets
//! exactly one resource carrying all of its methods (`/v1/models` has POST,
//! GET and OPTIONS).
//!
//! | Method  | Paths                                                                           | Auth |
//! |---------|---------------------------------------------------------------------------------|------|
//! | POST    | `/v1/audio/transcriptions`, `/audio/transcriptions`, `/v1/transcriptions`, `/v1/models`, `/v1` | yes |
//! | GET     | `/v1/models`, `/models`                                                         | yes  |
//! | OPTIONS | `/v1/audio/transcriptions`, `/v1/models`                                        | no   |
//! | GET     | `/health`                                                                       | no   |

use crate::handlers::{self, preflight};
use crate::health;
use crate::middleware::ApiKeyAuth;
use actix_web::{http::Method, web};

/// Paths accepting a multipart transcription upload
pub const TRANSCRIPTION_PATHS: [&str; 5] = [
    "/v1/audio/transcriptions",
    "/audio/transcriptions",
    "/v1/transcriptions",
    "/v1/models",
    "/v1",
];

/// Paths listing the loaded models
pub const MODEL_LIST_PATHS: [&str; 2] = ["/v1/models", "/models"];

/// Paths answering plain OPTIONS, with their `Allow` header
pub const PREFLIGHT_PATHS: [(&str, &str); 2] = [
    ("/v1/audio/transcriptions", "OPTIONS, POST"),
    ("/v1/models", "OPTIONS, GET"),
];

pub const HEALTH_PATH: &str = "/health";

/// Every distinct protected path, in registration order.
fn protected_paths() -> Vec<&'static str> {
    let mut paths: Vec<&'static str> = Vec::new();
    let all = TRANSCRIPTION_PATHS
        .into_iter()
        .chain(MODEL_LIST_PATHS)
        .chain(PREFLIGHT_PATHS.map(|(path, _)| path));
    for path in all {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Register the whole HTTP surface.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(HEALTH_PATH, web::get().to(health::health_check));

    for path in protected_paths() {
        let mut resource = web::resource(path);

        if TRANSCRIPTION_PATHS.contains(&path) {
            resource = resource.route(web::post().to(handlers::create_transcription));
        }
        if MODEL_LIST_PATHS.contains(&path) {
            resource = resource.route(web::get().to(handlers::list_models));
        }
        if let Some((_, allow)) = PREFLIGHT_PATHS.into_iter().find(|(p, _)| *p == path) {
            resource = resource.route(web::method(Method::OPTIONS).to(move || preflight::allow(allow)));
        }

        cfg.service(resource.wrap(ApiKeyAuth));
    }
}
