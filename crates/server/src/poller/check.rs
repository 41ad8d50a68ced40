//! Single-resource check logic and the driving poll loop.
//!
//! A check never aborts the batch: fetch failures are local to one attempt
//! and surface as a growing `last_checked_at` gap plus a per-task backoff.
//! The first-opening write is a conditional update guarded on
//! `is_open = FALSE`, so concurrent or repeated detections cannot double-emit
//! the opening event.

use crate::entity::{resource, subscription};
use crate::error::{CoreError, FetchError};
use crate::fanout::FanoutCoordinator;
use crate::fetch::StatusFetcher;
use crate::poller::scheduler::PollTaskManager;
use crate::status::{Classified, ResourceStatus, StatusReading, classify};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QuerySelect,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Semaphore;

/// Outcome of one poll attempt, for logging and tests.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckOutcome {
    /// Status identical to the stored one.
    Unchanged(ResourceStatus),
    /// This check won the first-opening write and fan-out ran.
    Opened {
        status: ResourceStatus,
        opened_at: OffsetDateTime,
        jobs_enqueued: usize,
    },
    /// An open state was observed but another worker had already recorded
    /// the opening; nothing was emitted.
    AlreadyOpen(ResourceStatus),
    /// Any other recorded-but-silent transition (e.g. unopened → terminal).
    Transitioned {
        from: ResourceStatus,
        to: ResourceStatus,
    },
    /// The source reverted an opened resource to a closed-like label. Logged
    /// as a data anomaly; `is_open`/`opened_at` are never downgraded.
    Reverted {
        from: ResourceStatus,
        to: ResourceStatus,
    },
}

/// Check one tracked resource against the external source.
pub async fn check_one(
    db: &DatabaseConnection,
    fetcher: &dyn StatusFetcher,
    fanout: &FanoutCoordinator,
    resource_id: i64,
    fetch_timeout: Duration,
) -> Result<CheckOutcome, CoreError> {
    let model = resource::Entity::find_by_id(resource_id)
        .one(db)
        .await?
        .ok_or_else(|| {
            CoreError::Store(DbErr::RecordNotFound(format!(
                "resource {resource_id} is not tracked"
            )))
        })?;

    let reading = match tokio::time::timeout(fetch_timeout, fetcher.fetch(resource_id)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(fetch_timeout)),
    };

    let now = OffsetDateTime::now_utc();

    let reading = match reading {
        Ok(reading) => reading,
        Err(e) => {
            // Liveness is still recorded on failed attempts; only the status
            // remains untouched.
            resource::Entity::update_many()
                .col_expr(resource::Column::LastCheckedAt, Expr::value(Some(now)))
                .filter(resource::Column::Id.eq(resource_id))
                .exec(db)
                .await?;
            return Err(CoreError::Fetch(e));
        }
    };

    let Classified {
        status: new_status,
        unrecognized_label,
    } = classify(&reading);

    if let Some(label) = &unrecognized_label {
        tracing::warn!(
            name = "poller.classification_anomaly",
            resource_id = resource_id,
            label = %label,
            message = "Unrecognized source label, defaulting to unopened"
        );
    }

    let stored_status = ResourceStatus::from_db(&model.status);

    // First opening: conditional write so exactly one detection wins.
    if !model.is_open && new_status.is_open() {
        let update = with_reading_columns(
            resource::Entity::update_many()
                .col_expr(
                    resource::Column::Status,
                    Expr::value(new_status.as_db()),
                )
                .col_expr(resource::Column::IsOpen, Expr::value(true))
                .col_expr(resource::Column::OpenedAt, Expr::value(Some(now)))
                .col_expr(resource::Column::LastCheckedAt, Expr::value(Some(now))),
            &reading,
        )
        .filter(resource::Column::Id.eq(resource_id))
        .filter(resource::Column::IsOpen.eq(false))
        .exec(db)
        .await?;

        if update.rows_affected == 0 {
            // Lost the race; the winner already emitted the event.
            return Ok(CheckOutcome::AlreadyOpen(new_status));
        }

        tracing::info!(
            name = "poller.resource_opened",
            resource_id = resource_id,
            status = %new_status,
            message = "Resource opened for entries"
        );

        let jobs_enqueued = fanout.handle_opened(resource_id, now).await?;
        return Ok(CheckOutcome::Opened {
            status: new_status,
            opened_at: now,
            jobs_enqueued,
        });
    }

    // Reversion anomaly: already opened, but the source shows a closed-like
    // label again. Record the label for display, never "un-open".
    if model.is_open && new_status == ResourceStatus::Unopened {
        tracing::warn!(
            name = "poller.reversion_anomaly",
            resource_id = resource_id,
            stored_status = %stored_status,
            source_label = ?reading.source_label,
            message = "Opened resource reverted to a closed-like label on the source"
        );
        with_reading_columns(
            resource::Entity::update_many()
                .col_expr(
                    resource::Column::Status,
                    Expr::value(new_status.as_db()),
                )
                .col_expr(resource::Column::LastCheckedAt, Expr::value(Some(now))),
            &reading,
        )
        .filter(resource::Column::Id.eq(resource_id))
        .exec(db)
        .await?;
        return Ok(CheckOutcome::Reverted {
            from: stored_status,
            to: new_status,
        });
    }

    // Everything else: persist the status (and liveness) without emitting.
    with_reading_columns(
        resource::Entity::update_many()
            .col_expr(
                resource::Column::Status,
                Expr::value(new_status.as_db()),
            )
            .col_expr(resource::Column::LastCheckedAt, Expr::value(Some(now))),
        &reading,
    )
    .filter(resource::Column::Id.eq(resource_id))
    .exec(db)
    .await?;

    if new_status == stored_status {
        Ok(CheckOutcome::Unchanged(new_status))
    } else {
        tracing::info!(
            name = "poller.status_transition",
            resource_id = resource_id,
            from = %stored_status,
            to = %new_status,
            message = "Resource status transition recorded"
        );
        Ok(CheckOutcome::Transitioned {
            from: stored_status,
            to: new_status,
        })
    }
}

/// Attach the informational columns the source reported alongside a status
/// update. Absent fields are left untouched.
fn with_reading_columns(
    mut update: sea_orm::UpdateMany<resource::Entity>,
    reading: &StatusReading,
) -> sea_orm::UpdateMany<resource::Entity> {
    update = update.col_expr(
        resource::Column::LastSourceLabel,
        Expr::value(reading.source_label.clone()),
    );
    if reading.name.is_some() {
        update = update.col_expr(resource::Column::Name, Expr::value(reading.name.clone()));
    }
    if reading.venue.is_some() {
        update = update.col_expr(resource::Column::Venue, Expr::value(reading.venue.clone()));
    }
    if reading.starts_on.is_some() {
        update = update.col_expr(resource::Column::StartsOn, Expr::value(reading.starts_on));
    }
    if reading.ends_on.is_some() {
        update = update.col_expr(resource::Column::EndsOn, Expr::value(reading.ends_on));
    }
    update
}

/// Main loop for the status poller.
///
/// Rescans the set of actively-subscribed, non-terminal resources and keeps
/// one check task running per resource, staggered across the check interval.
/// The semaphore is the single backpressure valve: total concurrent calls to
/// the fetch collaborator never exceed `max_concurrent_fetches`.
#[tracing::instrument(skip_all)]
pub async fn poll_loop(
    db: Arc<DatabaseConnection>,
    fetcher: Arc<dyn StatusFetcher>,
    fanout: Arc<FanoutCoordinator>,
    tasks: Arc<PollTaskManager>,
    cfg: crate::config::PollerConfig,
) {
    let fetch_permits = Arc::new(Semaphore::new(cfg.max_concurrent_fetches));

    loop {
        let scan = active_resource_ids(db.as_ref()).await;
        let active_ids = match scan {
            Ok(ids) => ids,
            Err(e) => {
                let e = CoreError::Store(e);
                if e.is_store_unavailable() {
                    tracing::error!(
                        name = "poller.store_unavailable",
                        error = %e,
                        message = "Backing store unreachable, stopping poller"
                    );
                    tasks.stop_all().await;
                    return;
                }
                tracing::error!(
                    name = "poller.rescan_failed",
                    error = %e,
                    message = "Failed to rescan tracked resources"
                );
                tokio::time::sleep(Duration::from_secs(cfg.rescan_interval_secs)).await;
                continue;
            }
        };

        // Distribute checks over the interval to avoid all firing at once
        let total = active_ids.len();
        let stagger_interval = if total > 1 {
            cfg.check_interval_secs / total as u64
        } else {
            0
        };

        for (index, &resource_id) in active_ids.iter().enumerate() {
            if tasks.is_running(resource_id).await {
                continue;
            }

            let db = db.clone();
            let fetcher = fetcher.clone();
            let fanout = fanout.clone();
            let tasks_ref = tasks.clone();
            let permits = fetch_permits.clone();
            let cfg = cfg.clone();
            let initial_delay = Duration::from_secs(stagger_interval * index as u64);

            tasks
                .start_task(resource_id, move |flag| {
                    Box::pin(async move {
                        if !initial_delay.is_zero() {
                            tokio::time::sleep(initial_delay).await;
                        }

                        let fetch_timeout = Duration::from_secs(cfg.fetch_timeout_secs);
                        let mut consecutive_failures = 0u32;

                        while flag.load(Ordering::SeqCst) {
                            // Holding the permit only for the check keeps the
                            // ceiling on external calls, not on sleeps.
                            let outcome = match permits.acquire().await {
                                Ok(_permit) => {
                                    check_one(
                                        db.as_ref(),
                                        fetcher.as_ref(),
                                        fanout.as_ref(),
                                        resource_id,
                                        fetch_timeout,
                                    )
                                    .await
                                }
                                // Semaphore closed: the poller is shutting down
                                Err(_) => break,
                            };

                            match outcome {
                                Ok(CheckOutcome::Transitioned { to, .. })
                                    if to.is_terminal() =>
                                {
                                    tracing::info!(
                                        name = "poller.task.self_pruned",
                                        resource_id = resource_id,
                                        message = "Resource reached terminal state, stopping checks"
                                    );
                                    break;
                                }
                                Ok(_) => {
                                    consecutive_failures = 0;
                                }
                                Err(e) if e.is_store_unavailable() => {
                                    tracing::error!(
                                        name = "poller.task.store_unavailable",
                                        resource_id = resource_id,
                                        error = %e,
                                        message = "Backing store unreachable, stopping check task"
                                    );
                                    break;
                                }
                                Err(e) => {
                                    consecutive_failures += 1;
                                    tracing::warn!(
                                        name = "poller.check_failed",
                                        resource_id = resource_id,
                                        consecutive_failures = consecutive_failures,
                                        error = %e,
                                        message = "Poll attempt failed, will retry with backoff"
                                    );
                                }
                            }

                            tokio::time::sleep(backoff_interval(
                                cfg.check_interval_secs,
                                consecutive_failures,
                            ))
                            .await;
                        }

                        tasks_ref.finish_task(resource_id).await;
                    })
                })
                .await;
        }

        // Stop tasks for resources that lost their last subscriber
        let active: HashSet<i64> = active_ids.iter().copied().collect();
        tasks.stop_missing(&active).await;

        tokio::time::sleep(Duration::from_secs(cfg.rescan_interval_secs)).await;
    }
}

/// Resources worth polling: referenced by at least one subscription and not
/// yet terminal. Terminal resources stay in the store for audit but are
/// excluded from future cycles.
async fn active_resource_ids(db: &DatabaseConnection) -> Result<Vec<i64>, DbErr> {
    let subscribed: Vec<i64> = subscription::Entity::find()
        .select_only()
        .column(subscription::Column::ResourceId)
        .distinct()
        .into_tuple()
        .all(db)
        .await?;

    if subscribed.is_empty() {
        return Ok(Vec::new());
    }

    let resources: Vec<i64> = resource::Entity::find()
        .select_only()
        .column(resource::Column::Id)
        .filter(resource::Column::Id.is_in(subscribed))
        .filter(resource::Column::Status.ne(ResourceStatus::Terminal.as_db()))
        .into_tuple()
        .all(db)
        .await?;
    Ok(resources)
}

/// Exponential backoff on consecutive fetch failures, capped at 5 minutes.
fn backoff_interval(base_secs: u64, consecutive_failures: u32) -> Duration {
    let factor = 1u64 << consecutive_failures.min(6);
    Duration::from_secs((base_secs.saturating_mul(factor)).min(300))
}
