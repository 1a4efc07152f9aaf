//! HTTP surface for the campaign engine.
//!
//! - `tracking` - open pixel and click redirect (/track/*)
//! - `scheduler` - dispatch trigger (/process-scheduled)
//! - `health` - health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod health;
pub mod openapi;
pub mod scheduler;
pub mod tracking;

use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

use crate::AppResources;
use crate::dispatch::scheduler::DispatcherState;

pub use health::MISC_TAG;
pub use scheduler::SCHEDULER_TAG;
pub use tracking::TRACKING_TAG;

/// Build the application router with all middleware layers attached.
pub fn build_router(app_resources: AppResources, dispatcher: Arc<DispatcherState>) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/track", tracking::router())
        .merge(scheduler::router(scheduler::SchedulerApiState { dispatcher }))
        .routes(routes!(health::health))
        .layer(axum::Extension(app_resources))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip_all)]
pub async fn start_webserver(
    app_resources: AppResources,
    dispatcher: Arc<DispatcherState>,
) -> color_eyre::Result<()> {
    let router = build_router(app_resources, dispatcher);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info!(
        name = "api.server.started",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        addr = "0.0.0.0:8080",
        message = "Server running"
    );
    axum::serve(listener, router)
        .await
        .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
