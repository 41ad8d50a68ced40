//! OpenAPI/Utoipa configuration.

use crate::api::{health::MISC_TAG, resources::RESOURCES_TAG, subscriptions::SUBSCRIPTIONS_TAG};
use utoipa::OpenApi;

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Entrywatch API",
        version = "1.0.0",
        description = "API for tracking externally-hosted registration pages and notifying subscribers when they open."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = RESOURCES_TAG, description = "Tracked resource endpoints"),
        (name = SUBSCRIPTIONS_TAG, description = "Subscription management endpoints")
    )
)]
pub struct ApiDoc;
