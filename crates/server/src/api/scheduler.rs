//! Dispatch trigger endpoint.
//!
//! External cron infrastructure POSTs here once a minute; the internal timer
//! loop covers deployments without one. Both paths share the dispatcher's
//! overlap guard, so a trigger racing a tick is a visible no-op, never a
//! double dispatch.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::AppResources;
use crate::dispatch::scheduler::{DispatcherState, ProcessSummary, process_due_campaigns};

/// Tag for OpenAPI documentation.
pub const SCHEDULER_TAG: &str = "Scheduler";

/// Shared state for the scheduler endpoint.
#[derive(Clone)]
pub struct SchedulerApiState {
    pub dispatcher: Arc<DispatcherState>,
}

/// Creates the scheduler API router.
#[tracing::instrument(skip_all)]
pub fn router(state: SchedulerApiState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(process_scheduled))
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Process all due scheduled campaigns.
#[tracing::instrument(skip(resources, state, headers))]
#[utoipa::path(
    post,
    path = "/process-scheduled",
    operation_id = "Process Scheduled Campaigns",
    tag = SCHEDULER_TAG,
    summary = "Dispatch all due scheduled campaigns",
    description = "Finds campaigns with status `scheduled` whose `scheduled_at` has passed and \
                   runs the send pipeline for each.\n\n\
                   Requires `Authorization: Bearer <scheduler.shared_secret>`. If a dispatch \
                   run is already active (timer tick or concurrent trigger), the call returns \
                   immediately with `skipped: true` instead of queueing a second run.",
    responses(
        (status = 200, description = "Summary of processed campaigns", body = ProcessSummary),
        (status = 401, description = "Missing or incorrect bearer secret", content_type = "application/json")
    ),
    security(("bearer" = []))
)]
async fn process_scheduled(
    Extension(resources): Extension<AppResources>,
    State(state): State<SchedulerApiState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let authorized = bearer_token(&headers)
        .is_some_and(|token| token == resources.config.scheduler.shared_secret);
    if !authorized {
        tracing::warn!(
            name = "api.process_scheduled.unauthorized",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            message = "Rejected dispatch trigger with missing or wrong secret"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    let resources = Arc::new(resources);
    let summary = process_due_campaigns(resources, state.dispatcher.clone()).await;
    (StatusCode::OK, Json(summary)).into_response()
}
