//! HTTP API gateway for deskloop.
//!
//! Exposes a health check and the v1 API: blocking chat, the SSE workflow
//! stream, session history, the tool list and the global event log.
//!
//! Built on Axum. All runs go through one shared [`RunDriver`].

pub mod api_v1;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    response::Json,
    routing::get,
};
use deskloop_agent::RunDriver;
use deskloop_config::AppConfig;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Origins allowed when none are configured: a local frontend dev server.
const DEFAULT_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:3001",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:3001",
];

/// Build the full router: `/health` plus the v1 API under `/v1`.
pub fn build_router(state: api_v1::SharedApiState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(cors_layer(allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let configured: Vec<&str> = if allowed_origins.is_empty() {
        DEFAULT_ORIGINS.to_vec()
    } else {
        allowed_origins.iter().map(String::as_str).collect()
    };

    let origins: Vec<HeaderValue> = configured
        .into_iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600))
}

/// Start the gateway HTTP server and serve until the process is stopped.
pub async fn start(config: &AppConfig, driver: RunDriver) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(api_v1::ApiV1State::new(driver));
    let app = build_router(state, &config.gateway.allowed_origins);

    info!(addr = %addr, model = %config.model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use deskloop_agent::ExecutionLoop;
    use deskloop_core::decision::{Decision, DecisionMaker, DecisionRequest};
    use deskloop_core::error::DecisionError;
    use deskloop_core::event::EventBus;
    use deskloop_core::tool::ToolRegistry;
    use deskloop_memory::InMemoryConversationStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct Silent;

    #[async_trait::async_trait]
    impl DecisionMaker for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn decide(&self, _request: DecisionRequest) -> Result<Decision, DecisionError> {
            Ok(Decision::answer("ok"))
        }
    }

    fn router(origins: &[String]) -> Router {
        let execution = ExecutionLoop::new(
            Arc::new(Silent),
            Arc::new(ToolRegistry::new()),
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(EventBus::new()),
        );
        let state = Arc::new(api_v1::ApiV1State::new(RunDriver::new(Arc::new(execution))));
        build_router(state, origins)
    }

    #[tokio::test]
    async fn health_endpoint() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router(&[]).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn cors_allows_configured_origin_only() {
        let origins = vec!["http://desk.example".to_string()];

        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://desk.example")
            .body(Body::empty())
            .unwrap();
        let response = router(&origins).oneshot(req).await.unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://desk.example"
        );

        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://evil.example")
            .body(Body::empty())
            .unwrap();
        let response = router(&origins).oneshot(req).await.unwrap();
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn default_origins_cover_local_frontend() {
        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let response = router(&[]).oneshot(req).await.unwrap();
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_some());
    }
}
