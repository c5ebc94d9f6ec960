//! # Model Listing
//!
//! `GET /v1/models` (alias `/models`) returns the names clients may pass as
//! the `model` form field:
//! ```json
//! { "models": ["base", "small"] }
//! ```
//! Names come from the registry built at startup, sorted.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    pub models: Vec<String>,
}

pub async fn list_models(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ModelListResponse {
        models: state.registry.names(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_list_serialization() {
        let response = ModelListResponse {
            models: vec!["base".to_string(), "small.en".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "models": ["base", "small.en"] })
        );
    }
}
