pub mod auth;
pub mod logging;
pub mod metrics;

pub use auth::ApiKeyAuth;
pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
