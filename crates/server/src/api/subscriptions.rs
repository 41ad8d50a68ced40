//! Subscription management endpoints.
//!
//! - `POST /subscriptions` - Subscribe a subscriber to a resource
//! - `DELETE /subscriptions` - Unsubscribe, cancelling any pending delivery
//! - `GET /subscribers/{id}/notifications` - Delivery audit log

use crate::{
    AppResources,
    dispatch::cancel_pending,
    entity::{notification_log, resource, subscription},
    status::ResourceStatus,
};
use axum::{Extension, Json, extract::Path, http::StatusCode, response::IntoResponse};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
};
use serde_json::json;
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const SUBSCRIPTIONS_TAG: &str = "Subscriptions API";

#[derive(serde::Deserialize, ToSchema)]
struct SubscriptionRequest {
    subscriber_id: String,
    resource_id: i64,
}

/// Creates the subscriptions API router.
#[tracing::instrument(skip_all)]
pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(subscribe, unsubscribe))
        .routes(routes!(list_notifications))
}

#[tracing::instrument(skip(resources, payload), fields(subscriber_id = payload.subscriber_id, resource_id = payload.resource_id))]
#[utoipa::path(
    post,
    path = "/subscriptions",
    operation_id = "Subscribe",
    tag = SUBSCRIPTIONS_TAG,
    summary = "Subscribe to a resource's opening",
    description = "Creates a subscription. The subscriber will be notified once, after their tier's \
                   delay, when the resource's registration first opens.\n\n\
                   The resource row is created on the fly if it is not yet tracked, so subscribing \
                   is enough to start the polling. Subscribing twice to the same pair is a no-op.",
    request_body(
        content = SubscriptionRequest,
        description = "Subscriber and resource pair"
    ),
    responses(
        (status = 201, description = "Subscription created", content_type = "application/json", example = json!({"status": "subscribed"})),
        (status = 200, description = "Subscription already existed", content_type = "application/json", example = json!({"status": "already subscribed"})),
        (status = 500, description = "Internal server error", content_type = "application/json")
    )
)]
async fn subscribe(
    Extension(resources): Extension<AppResources>,
    Json(payload): Json<SubscriptionRequest>,
) -> impl IntoResponse {
    let now = OffsetDateTime::now_utc();

    // Auto-track the resource so the poller picks it up on its next rescan.
    let track = resource::Entity::insert(resource::ActiveModel {
        id: Set(payload.resource_id),
        status: Set(ResourceStatus::Unopened.as_db().to_string()),
        is_open: Set(false),
        opened_at: Set(None),
        last_checked_at: Set(None),
        created_at: Set(now),
        name: Set(None),
        venue: Set(None),
        starts_on: Set(None),
        ends_on: Set(None),
        last_source_label: Set(None),
    })
    .on_conflict(
        OnConflict::column(resource::Column::Id)
            .do_nothing()
            .to_owned(),
    )
    .exec(resources.db.as_ref())
    .await;
    if let Err(e) = track
        && !matches!(e, DbErr::RecordNotInserted)
    {
        tracing::error!(
            name = "api.subscribe.resource_insert_failed",
            error = ?e,
            message = "Failed to auto-track resource for new subscription"
        );
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("DB error: {e}") })),
        );
    }

    let insert = subscription::Entity::insert(subscription::ActiveModel {
        id: sea_orm::ActiveValue::NotSet,
        subscriber_id: Set(payload.subscriber_id.clone()),
        resource_id: Set(payload.resource_id),
        notified: Set(false),
        notified_at: Set(None),
        created_at: Set(now),
    })
    .on_conflict(
        OnConflict::columns([
            subscription::Column::SubscriberId,
            subscription::Column::ResourceId,
        ])
        .do_nothing()
        .to_owned(),
    )
    .exec(resources.db.as_ref())
    .await;

    match insert {
        Ok(_) => (StatusCode::CREATED, Json(json!({ "status": "subscribed" }))),
        Err(DbErr::RecordNotInserted) => (
            StatusCode::OK,
            Json(json!({ "status": "already subscribed" })),
        ),
        Err(e) => {
            tracing::error!(
                name = "api.subscribe.db_insert_failed",
                error = ?e,
                message = "Failed to insert subscription"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("DB error: {e}") })),
            )
        }
    }
}

#[tracing::instrument(skip(resources, payload), fields(subscriber_id = payload.subscriber_id, resource_id = payload.resource_id))]
#[utoipa::path(
    delete,
    path = "/subscriptions",
    operation_id = "Unsubscribe",
    tag = SUBSCRIPTIONS_TAG,
    summary = "Unsubscribe from a resource",
    description = "Deletes the subscription and cancels any pending, unclaimed delivery job for the \
                   pair. A job already claimed by a dispatch worker is past the point of no return \
                   and will still be delivered; finished jobs are kept for the audit trail.",
    request_body(
        content = SubscriptionRequest,
        description = "Subscriber and resource pair"
    ),
    responses(
        (status = 200, description = "Unsubscribed; reports whether a pending job was cancelled", content_type = "application/json", example = json!({"status": "unsubscribed", "pending_job_cancelled": true})),
        (status = 404, description = "No such subscription", content_type = "application/json"),
        (status = 500, description = "Internal server error", content_type = "application/json")
    )
)]
async fn unsubscribe(
    Extension(resources): Extension<AppResources>,
    Json(payload): Json<SubscriptionRequest>,
) -> impl IntoResponse {
    let deleted = subscription::Entity::delete_many()
        .filter(subscription::Column::SubscriberId.eq(payload.subscriber_id.as_str()))
        .filter(subscription::Column::ResourceId.eq(payload.resource_id))
        .exec(resources.db.as_ref())
        .await;

    match deleted {
        Ok(res) if res.rows_affected == 0 => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no such subscription" })),
        ),
        Ok(_) => {
            match cancel_pending(
                resources.db.as_ref(),
                &payload.subscriber_id,
                payload.resource_id,
            )
            .await
            {
                Ok(cancelled) => (
                    StatusCode::OK,
                    Json(json!({
                        "status": "unsubscribed",
                        "pending_job_cancelled": cancelled > 0,
                    })),
                ),
                Err(e) => {
                    tracing::error!(
                        name = "api.unsubscribe.cascade_failed",
                        error = ?e,
                        message = "Subscription deleted but pending-job cascade failed"
                    );
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": format!("DB error: {e}") })),
                    )
                }
            }
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("DB error: {e}") })),
        ),
    }
}

#[tracing::instrument(skip(resources))]
#[utoipa::path(
    get,
    path = "/subscribers/{id}/notifications",
    operation_id = "List Notifications",
    tag = SUBSCRIPTIONS_TAG,
    summary = "Delivery audit log for a subscriber",
    description = "Returns every recorded delivery outcome for the subscriber, newest first. \
                   Permanent failures appear with outcome `delivery_failed`.",
    params(
        ("id" = String, Path, description = "Subscriber identifier")
    ),
    responses(
        (status = 200, description = "Audit log entries", body = [notification_log::Model], content_type = "application/json"),
        (status = 500, description = "Internal server error", content_type = "application/json")
    )
)]
async fn list_notifications(
    Extension(resources): Extension<AppResources>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match notification_log::Entity::find()
        .filter(notification_log::Column::SubscriberId.eq(id.as_str()))
        .order_by_desc(notification_log::Column::SentAt)
        .all(resources.db.as_ref())
        .await
    {
        Ok(rows) => (StatusCode::OK, Json(json!(rows))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("DB error: {e}") })),
        ),
    }
}
