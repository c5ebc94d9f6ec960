//! `GET /health`: unauthenticated liveness and metrics document.
//!
//! Never includes the API key or any configuration secret.

use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    // No model means every transcription request would be rejected
    let status = if state.registry.is_empty() { "degraded" } else { "healthy" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "models": state.registry.names(),
        "model_count": state.registry.len(),
        "metrics": metrics_summary(&metrics, uptime_seconds),
        "memory": get_memory_info(),
    }))
}

fn metrics_summary(metrics: &AppMetrics, uptime_seconds: u64) -> serde_json::Value {
    let mut endpoints: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
            })
        })
        .collect();
    endpoints.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    json!({
        "total_requests": metrics.request_count,
        "total_errors": metrics.error_count,
        "error_rate": if metrics.request_count > 0 {
            metrics.error_count as f64 / metrics.request_count as f64
        } else {
            0.0
        },
        "active_transcriptions": metrics.active_transcriptions,
        "requests_per_second": if uptime_seconds > 0 {
            metrics.request_count as f64 / uptime_seconds as f64
        } else {
            0.0
        },
        "endpoints": endpoints,
    })
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
            let field_bytes = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::transcription::registry::ModelRegistry;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_needs_no_key() {
        let state = web::Data::new(AppState::new(AppConfig::default(), ModelRegistry::default()));
        state.record_endpoint_request("GET /v1/models", 4, false);

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["model_count"], 0);
        assert_eq!(body["metrics"]["endpoints"][0]["endpoint"], "GET /v1/models");
        assert!(!body.to_string().contains("sk-your_secret_api_key"));
    }
}
