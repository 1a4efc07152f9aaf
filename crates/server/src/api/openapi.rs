//! OpenAPI/Utoipa configuration.

use crate::api::{health::MISC_TAG, scheduler::SCHEDULER_TAG, tracking::TRACKING_TAG};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .description(Some(
                    "Shared scheduler secret, configured as `scheduler.shared_secret`.",
                ))
                .build();
            components.add_security_scheme("bearer", SecurityScheme::Http(bearer));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Campaign Engine API",
        version = "1.0.0",
        description = "Scheduled campaign dispatch and engagement tracking."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = TRACKING_TAG, description = "Open and click tracking endpoints"),
        (name = SCHEDULER_TAG, description = "Campaign dispatch trigger")
    )
)]
pub struct ApiDoc;
