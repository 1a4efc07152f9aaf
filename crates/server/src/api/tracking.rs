//! Engagement tracking endpoints.
//!
//! These handlers answer to mail clients, image proxies and link scanners:
//! remote parties that must never see an error page. Whatever happens
//! internally, `/track/open` returns the pixel and `/track/click` returns a
//! redirect; recording is best-effort and absorbed by
//! [`crate::tracking`].

use axum::Extension;
use axum::http::{HeaderMap, Uri, header};
use axum::response::{IntoResponse, Redirect, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use once_cell::sync::Lazy;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::AppResources;
use crate::tracking::{self, TrackingHit};

/// Tag for OpenAPI documentation.
pub const TRACKING_TAG: &str = "Tracking";

/// 1x1 transparent PNG served for every open hit.
static TRACKING_PIXEL: Lazy<Vec<u8>> = Lazy::new(|| {
    BASE64_STANDARD
        .decode("iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==")
        .expect("pixel constant decodes")
});

/// Creates the tracking router, nested under `/track`.
#[tracing::instrument]
pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(track_open))
        .routes(routes!(track_click))
}

/// Pull one query parameter out of a raw query string.
///
/// Query extraction must never reject a request here, however mangled, so
/// this walks the raw string instead of going through a deserializer.
/// Undecodable percent-escapes fall back to the raw value.
fn query_param(uri: &Uri, key: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == key).then(|| {
            let v = v.replace('+', " ");
            urlencoding::decode(&v)
                .map(|decoded| decoded.into_owned())
                .unwrap_or(v)
        })
    })
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Unknown")
        .to_string()
}

fn hit_from_request(uri: &Uri, headers: &HeaderMap) -> TrackingHit {
    TrackingHit {
        campaign_id: query_param(uri, "c"),
        subscriber_id: query_param(uri, "u"),
        send_id: query_param(uri, "s"),
        user_agent: user_agent(headers),
        ip_address: client_ip(headers),
    }
}

fn pixel_response() -> Response {
    (
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        TRACKING_PIXEL.clone(),
    )
        .into_response()
}

/// Open tracking pixel.
#[tracing::instrument(skip(resources, headers))]
#[utoipa::path(
    get,
    path = "/open",
    operation_id = "Track Open",
    tag = TRACKING_TAG,
    summary = "Email open tracking pixel",
    description = "Records an email open event and serves a 1x1 transparent PNG.\n\n\
                   Query parameters `c` (campaign id), `u` (subscriber id) and `s` (send id) \
                   must be UUIDs referencing an existing send for the hit to be recorded. \
                   Repeat opens for the same send inside the dedup window and hits from \
                   known automated agents are not counted.\n\n\
                   **The pixel is returned unconditionally**: missing parameters, bot \
                   classification or storage failures never surface to the mail client.",
    params(
        ("c" = Option<String>, Query, description = "Campaign id (UUID)"),
        ("u" = Option<String>, Query, description = "Subscriber id (UUID)"),
        ("s" = Option<String>, Query, description = "Send id (UUID)"),
    ),
    responses(
        (status = 200, description = "1x1 transparent PNG, in all cases", content_type = "image/png")
    )
)]
async fn track_open(
    Extension(resources): Extension<AppResources>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let hit = hit_from_request(&uri, &headers);
    let outcome =
        tracking::record_open(resources.db.as_ref(), &resources.config.tracking, &hit).await;
    tracing::debug!(
        name = "api.track_open.handled",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        outcome = ?outcome,
        message = "Open hit handled"
    );
    pixel_response()
}

/// Click tracking redirect.
#[tracing::instrument(skip(resources, headers))]
#[utoipa::path(
    get,
    path = "/click",
    operation_id = "Track Click",
    tag = TRACKING_TAG,
    summary = "Email click tracking redirect",
    description = "Records an email click event and redirects to the original destination.\n\n\
                   The `url` parameter carries the percent-encoded original target. Only \
                   http/https targets are honored; anything else redirects to the configured \
                   fallback URL.\n\n\
                   **The redirect is returned unconditionally**: a broken tracking link \
                   must never block the recipient's navigation.",
    params(
        ("c" = Option<String>, Query, description = "Campaign id (UUID)"),
        ("u" = Option<String>, Query, description = "Subscriber id (UUID)"),
        ("s" = Option<String>, Query, description = "Send id (UUID)"),
        ("url" = Option<String>, Query, description = "Percent-encoded destination URL"),
    ),
    responses(
        (status = 307, description = "Redirect to the destination (or fallback) URL, in all cases")
    )
)]
async fn track_click(
    Extension(resources): Extension<AppResources>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let hit = hit_from_request(&uri, &headers);
    let target = query_param(&uri, "url");

    // Pick the redirect target first; recording can never change it.
    let destination = target
        .as_deref()
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
        .unwrap_or(resources.config.tracking.fallback_redirect_url.as_str())
        .to_string();

    if let Some(url) = &target {
        let outcome =
            tracking::record_click(resources.db.as_ref(), &resources.config.tracking, &hit, url)
                .await;
        tracing::debug!(
            name = "api.track_click.handled",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            outcome = ?outcome,
            message = "Click hit handled"
        );
    } else {
        tracing::debug!(
            name = "api.track_click.missing_url",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            message = "Click hit without url parameter; redirecting to fallback"
        );
    }

    Redirect::temporary(&destination).into_response()
}
