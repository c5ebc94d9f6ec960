//! Plain `OPTIONS` answers: an empty JSON object and an `Allow` header.
//!
//! Browser CORS pre-flights (with `Origin` and `Access-Control-Request-Method`)
//! are answered by the CORS middleware before they get here.

use actix_web::{http::header, HttpResponse};
use serde_json::json;

pub async fn allow(methods: &'static str) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::ALLOW, methods))
        .json(json!({}))
}
