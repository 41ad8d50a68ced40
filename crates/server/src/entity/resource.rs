//! One monitored entry page on the external source.
//!
//! `opened_at` is written once by the first detected opening and never
//! changed afterwards, even if the source later reverts its label.

use sea_orm::entity::prelude::*;
use serde::Serialize;
use time::{Date, OffsetDateTime};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "resource")]
pub struct Model {
    /// Numeric key assigned by the external source.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub status: String, // see crate::status::ResourceStatus
    pub is_open: bool,
    pub opened_at: Option<OffsetDateTime>,
    pub last_checked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub name: Option<String>,
    pub venue: Option<String>,
    pub starts_on: Option<Date>,
    pub ends_on: Option<Date>,
    /// Raw lifecycle label seen at the last poll, kept for audit only.
    pub last_source_label: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
