//! Tracked resource endpoints.
//!
//! - `POST /resources` - Start tracking a resource
//! - `GET /resources/{id}` - Current status of a tracked resource

use crate::{AppResources, entity::resource, status::ResourceStatus};
use axum::{
    Extension, Json,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, EntityTrait};
use serde_json::json;
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const RESOURCES_TAG: &str = "Resources API";

#[derive(serde::Deserialize, ToSchema)]
struct TrackResource {
    /// Numeric key assigned by the external source.
    id: i64,
    name: Option<String>,
}

/// Creates the resources API router.
#[tracing::instrument(skip_all)]
pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(track_resource))
        .routes(routes!(get_resource))
}

#[tracing::instrument(skip(resources, payload), fields(resource_id = payload.id))]
#[utoipa::path(
    post,
    path = "/resources",
    operation_id = "Track Resource",
    tag = RESOURCES_TAG,
    summary = "Start tracking a resource",
    description = "Registers an externally-hosted resource for polling. The resource starts in the \
                   `unopened` state; the poller keeps its status current once at least one \
                   subscription exists for it.\n\n\
                   Tracking an already-tracked resource is a no-op and returns the existing row.",
    request_body(
        content = TrackResource,
        description = "Resource to track"
    ),
    responses(
        (status = 201, description = "Resource is now tracked", body = resource::Model, content_type = "application/json"),
        (status = 200, description = "Resource was already tracked", body = resource::Model, content_type = "application/json"),
        (status = 500, description = "Internal server error", content_type = "application/json")
    )
)]
async fn track_resource(
    Extension(resources): Extension<AppResources>,
    Json(payload): Json<TrackResource>,
) -> impl IntoResponse {
    let now = OffsetDateTime::now_utc();

    let model = resource::ActiveModel {
        id: Set(payload.id),
        status: Set(ResourceStatus::Unopened.as_db().to_string()),
        is_open: Set(false),
        opened_at: Set(None),
        last_checked_at: Set(None),
        created_at: Set(now),
        name: Set(payload.name),
        venue: Set(None),
        starts_on: Set(None),
        ends_on: Set(None),
        last_source_label: Set(None),
    };

    let insert = resource::Entity::insert(model)
        .on_conflict(
            OnConflict::column(resource::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .exec(resources.db.as_ref())
        .await;

    let created = match insert {
        Ok(_) => true,
        Err(sea_orm::DbErr::RecordNotInserted) => false,
        Err(e) => {
            tracing::error!(
                name = "api.track_resource.db_insert_failed",
                error = ?e,
                message = "Failed to insert resource"
            );
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("DB error: {e}") })),
            );
        }
    };

    match resource::Entity::find_by_id(payload.id)
        .one(resources.db.as_ref())
        .await
    {
        Ok(Some(row)) => {
            let code = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (code, Json(json!(row)))
        }
        Ok(None) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "resource vanished after insert" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("DB error: {e}") })),
        ),
    }
}

#[tracing::instrument(skip(resources))]
#[utoipa::path(
    get,
    path = "/resources/{id}",
    operation_id = "Get Resource",
    tag = RESOURCES_TAG,
    summary = "Current status of a tracked resource",
    description = "Returns the stored row for a tracked resource, including the lifecycle status, \
                   the opening timestamp (set once, never changed) and any metadata reported by the \
                   source at the last poll.",
    params(
        ("id" = i64, Path, description = "Resource identifier")
    ),
    responses(
        (status = 200, description = "Tracked resource", body = resource::Model, content_type = "application/json"),
        (status = 404, description = "Resource is not tracked", content_type = "application/json"),
        (status = 500, description = "Internal server error", content_type = "application/json")
    )
)]
async fn get_resource(
    Extension(resources): Extension<AppResources>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match resource::Entity::find_by_id(id)
        .one(resources.db.as_ref())
        .await
    {
        Ok(Some(row)) => (StatusCode::OK, Json(json!(row))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "resource not tracked" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("DB error: {e}") })),
        ),
    }
}
