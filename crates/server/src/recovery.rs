//! Startup reconciliation after an unclean shutdown.
//!
//! Two holes can open while the process is down: a worker died holding a
//! claim, or a resource opened its registration and the fan-out never ran
//! (or ran partially). Both repairs are idempotent, so running them on every
//! boot is harmless.

use crate::dispatch::release_stale_claims;
use crate::fanout::FanoutCoordinator;
use crate::entity::{resource, subscription};
use crate::error::CoreError;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Claims released from workers that died mid-dispatch.
    pub claims_released: u64,
    /// Open resources whose fan-out was re-driven.
    pub resources_reconciled: usize,
    /// Delay jobs backfilled by the re-driven fan-outs.
    pub jobs_backfilled: usize,
}

/// Heal the delay queue after a restart.
///
/// Re-runs the fan-out for every open, non-terminal resource that still has
/// un-notified subscribers. The unique pair index on the delay queue makes
/// the re-run a no-op for subscribers whose job survived the crash, so no
/// duplicate notification can result.
#[tracing::instrument(skip(db, fanout))]
pub async fn reconcile(
    db: &DatabaseConnection,
    fanout: &FanoutCoordinator,
    stale_claim_threshold: Duration,
) -> Result<RecoveryReport, CoreError> {
    let mut report = RecoveryReport {
        claims_released: release_stale_claims(db, stale_claim_threshold).await?,
        ..RecoveryReport::default()
    };

    // Any open resource counts, terminal ones included: the opening already
    // happened, so subscribers who lost their job to the crash are still owed
    // a notification even if the source has since moved on.
    let open_resources = resource::Entity::find()
        .filter(resource::Column::IsOpen.eq(true))
        .all(db)
        .await?;

    for res in open_resources {
        let pending: Option<i32> = subscription::Entity::find()
            .select_only()
            .column(subscription::Column::Id)
            .filter(subscription::Column::ResourceId.eq(res.id))
            .filter(subscription::Column::Notified.eq(false))
            .limit(1)
            .into_tuple()
            .one(db)
            .await?;
        if pending.is_none() {
            continue;
        }

        let opened_at = match res.opened_at {
            Some(ts) => ts,
            // Open without a timestamp should not happen; repair with the
            // least surprising value rather than skipping the subscribers.
            None => {
                tracing::warn!(
                    name = "recovery.missing_opened_at",
                    resource_id = res.id,
                    message = "Open resource has no opening timestamp, using now"
                );
                time::OffsetDateTime::now_utc()
            }
        };

        let backfilled = fanout.handle_opened(res.id, opened_at).await?;
        report.resources_reconciled += 1;
        report.jobs_backfilled += backfilled;

        if backfilled > 0 {
            tracing::info!(
                name = "recovery.fanout_backfilled",
                resource_id = res.id,
                jobs = backfilled,
                message = "Backfilled delay jobs lost to an unclean shutdown"
            );
        }
    }

    tracing::info!(
        name = "recovery.completed",
        claims_released = report.claims_released,
        resources_reconciled = report.resources_reconciled,
        jobs_backfilled = report.jobs_backfilled,
        message = "Startup reconciliation completed"
    );
    Ok(report)
}
