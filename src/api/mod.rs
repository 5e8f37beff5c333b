// src/api/mod.rs — HTTP control surface for evaluation runs and iterations

pub mod auth;
pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::core::types::ProgressEvent;
use crate::core::{EvaluationRunController, IterationController};
use crate::infra::config::{ApiConfig, IterationConfig};
pub use types::{Envelope, IterationStartRequest};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub runs: Arc<EvaluationRunController>,
    pub iterations: Arc<IterationController>,
    pub events: broadcast::Sender<ProgressEvent>,
    pub token: Option<String>,
    /// Defaults for iteration parameters the caller leaves out.
    pub iteration_defaults: IterationConfig,
}

impl ApiState {
    pub fn new(runs: Arc<EvaluationRunController>, iterations: Arc<IterationController>) -> Self {
        let events = runs.events();
        Self {
            runs,
            iterations,
            events,
            token: None,
            iteration_defaults: IterationConfig::default(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_iteration_defaults(mut self, defaults: IterationConfig) -> Self {
        self.iteration_defaults = defaults;
        self
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: ApiState) -> Router {
    let origins = [
        "http://localhost:3000",
        "http://localhost:5173",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:5173",
    ]
    .into_iter()
    .map(HeaderValue::from_static)
    .collect::<Vec<_>>();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let project = "/api/v1/projects/{id}";
    Router::new()
        .route(&format!("{project}/evaluation/start"), post(handlers::evaluation_start))
        .route(&format!("{project}/evaluation/pause"), post(handlers::evaluation_pause))
        .route(&format!("{project}/evaluation/resume"), post(handlers::evaluation_resume))
        .route(&format!("{project}/evaluation/stop"), post(handlers::evaluation_stop))
        .route(&format!("{project}/evaluation/progress"), get(handlers::evaluation_progress))
        .route(&format!("{project}/evaluation/results"), get(handlers::evaluation_results))
        .route(
            &format!("{project}/evaluation/cases/{{case_id}}/retry"),
            post(handlers::evaluation_retry_case),
        )
        .route(&format!("{project}/iteration/start"), post(handlers::iteration_start))
        .route(&format!("{project}/iteration/stop"), post(handlers::iteration_stop))
        .route(&format!("{project}/iteration/progress"), get(handlers::iteration_progress))
        .route(&format!("{project}/iteration/report"), get(handlers::iteration_report))
        .route(&format!("{project}/iteration/log"), get(handlers::iteration_log))
        .route("/api/v1/events", get(handlers::events))
        .route("/api/v1/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until Ctrl-C.
pub async fn start_server(config: &ApiConfig, state: ApiState) -> anyhow::Result<()> {
    let addr = format!("127.0.0.1:{}", config.port);
    let router = build_router(state);

    tracing::info!("API server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down API server");
        })
        .await?;
    Ok(())
}
