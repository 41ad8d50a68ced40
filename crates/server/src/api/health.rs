//! Health check endpoint.

use crate::{AppResources, entity::resource};
use axum::{Extension, Json, http::StatusCode, response::IntoResponse};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::Serialize;
use utoipa::ToSchema;

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub resources_tracked: u64,
    pub resources_open: u64,
}

/// Health check endpoint.
#[tracing::instrument(skip(resources))]
#[utoipa::path(
    method(get, head),
    path = "/healthz",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Service health check",
    description = "Pings the backing store and reports how many resources are tracked and how many \
                   have opened. Returns 503 when the store is unreachable.\n\n\
                   Supports both GET and HEAD methods for compatibility with various health check systems.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Backing store unreachable", content_type = "application/json")
    )
)]
pub async fn health(Extension(resources): Extension<AppResources>) -> impl IntoResponse {
    let tracked = resource::Entity::find().count(resources.db.as_ref()).await;
    let tracked = match tracked {
        Ok(count) => count,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "degraded", "error": format!("{e}") })),
            );
        }
    };

    let open = resource::Entity::find()
        .filter(resource::Column::IsOpen.eq(true))
        .count(resources.db.as_ref())
        .await
        .unwrap_or(0);

    let body = HealthResponse {
        status: "ok",
        resources_tracked: tracked,
        resources_open: open,
    };
    (StatusCode::OK, Json(serde_json::json!(body)))
}
