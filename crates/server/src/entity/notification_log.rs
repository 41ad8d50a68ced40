//! Append-only audit record of delivery outcomes.
//!
//! One row per successful channel delivery, plus one `delivery_failed` row
//! when a job exhausts its retries, so failures are never silently absent.

use sea_orm::entity::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "notification_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub subscriber_id: String,
    pub resource_id: i64,
    pub channel: String,
    pub tier: String,
    /// Seconds between the opening and this delivery.
    pub delay_seconds: i64,
    pub outcome: String, // "delivered" or "delivery_failed"
    pub sent_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
