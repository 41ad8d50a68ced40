//! Delay queue operations.
//!
//! Claiming is a single conditional UPDATE stamping a fresh claim token, so
//! two workers racing for the same due jobs partition them instead of
//! double-claiming. Everything here must stay safe to re-run after a crash.

use crate::entity::delay_job;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Atomically claim up to `limit` due, unclaimed jobs for this caller.
///
/// The conditional `claimed = FALSE` filter means a concurrent claimer can
/// only shrink the set this call wins, never share a job with it.
pub async fn claim_due_jobs(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<delay_job::Model>, DbErr> {
    let now = OffsetDateTime::now_utc();

    let candidates: Vec<i32> = delay_job::Entity::find()
        .select_only()
        .column(delay_job::Column::Id)
        .filter(delay_job::Column::Claimed.eq(false))
        .filter(delay_job::Column::Sent.eq(false))
        .filter(delay_job::Column::Failed.eq(false))
        .filter(delay_job::Column::SendAt.lte(now))
        .order_by_asc(delay_job::Column::SendAt)
        .limit(limit)
        .into_tuple()
        .all(db)
        .await?;

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let claim_token = Uuid::new_v4().to_string();
    let update = delay_job::Entity::update_many()
        .col_expr(delay_job::Column::Claimed, Expr::value(true))
        .col_expr(
            delay_job::Column::ClaimToken,
            Expr::value(Some(claim_token.clone())),
        )
        .col_expr(delay_job::Column::ClaimedAt, Expr::value(Some(now)))
        .filter(delay_job::Column::Id.is_in(candidates))
        .filter(delay_job::Column::Claimed.eq(false))
        .exec(db)
        .await?;

    if update.rows_affected == 0 {
        return Ok(Vec::new());
    }

    delay_job::Entity::find()
        .filter(delay_job::Column::ClaimToken.eq(claim_token))
        .order_by_asc(delay_job::Column::SendAt)
        .all(db)
        .await
}

/// Release claims held longer than `threshold` on unsent jobs.
///
/// A claim that old belongs to a worker that crashed mid-dispatch; releasing
/// it lets another worker retry. Channel deliveries are idempotent enough
/// that a duplicate send is the acceptable lesser evil versus losing the
/// notification.
pub async fn release_stale_claims(
    db: &DatabaseConnection,
    threshold: Duration,
) -> Result<u64, DbErr> {
    let cutoff = OffsetDateTime::now_utc() - threshold;

    let update = delay_job::Entity::update_many()
        .col_expr(delay_job::Column::Claimed, Expr::value(false))
        .col_expr(
            delay_job::Column::ClaimToken,
            Expr::value(Option::<String>::None),
        )
        .col_expr(
            delay_job::Column::ClaimedAt,
            Expr::value(Option::<OffsetDateTime>::None),
        )
        .filter(delay_job::Column::Claimed.eq(true))
        .filter(delay_job::Column::Sent.eq(false))
        .filter(delay_job::Column::Failed.eq(false))
        .filter(delay_job::Column::ClaimedAt.lt(cutoff))
        .exec(db)
        .await?;

    if update.rows_affected > 0 {
        tracing::info!(
            name = "dispatch.stale_claims_released",
            released = update.rows_affected,
            message = "Released stale claims from crashed workers"
        );
    }
    Ok(update.rows_affected)
}

/// Remove any still-pending job for the pair. Used by the unsubscribe
/// cascade; claimed or finished jobs are left for the audit trail.
pub async fn cancel_pending(
    db: &DatabaseConnection,
    subscriber_id: &str,
    resource_id: i64,
) -> Result<u64, DbErr> {
    let delete = delay_job::Entity::delete_many()
        .filter(delay_job::Column::SubscriberId.eq(subscriber_id))
        .filter(delay_job::Column::ResourceId.eq(resource_id))
        .filter(delay_job::Column::Claimed.eq(false))
        .filter(delay_job::Column::Sent.eq(false))
        .exec(db)
        .await?;
    Ok(delete.rows_affected)
}
