//! One pending or completed notification attempt.
//!
//! The unique (subscriber_id, resource_id) index is what makes redundant
//! fan-out calls a no-op. Claiming is done with a conditional update that
//! stamps a fresh claim token, so no two workers ever hold the same job.

use sea_orm::entity::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "delay_job")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub subscriber_id: String,
    pub resource_id: i64,
    /// Tier at enqueue time. Later tier changes do not move in-flight jobs.
    pub tier: String,
    pub send_at: OffsetDateTime,
    pub claimed: bool,
    pub claim_token: Option<String>,
    pub claimed_at: Option<OffsetDateTime>,
    pub attempts: i32,
    pub sent: bool,
    pub sent_at: Option<OffsetDateTime>,
    pub failed: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
