//! Dispatch worker: drives claimed jobs through the notification channels.
//!
//! The at-most-once guarantee is finalized in exactly one place: the write
//! that logs the deliveries, flips the subscription to notified and marks
//! the job sent. Everything before that write is safe to re-run; a crash
//! mid-dispatch is healed by the stale-claim release and at worst repeats a
//! channel call.

use crate::channels::{NotificationChannel, NotificationPayload};
use crate::config::DispatchConfig;
use crate::dispatch::queue;
use crate::directory::SubscriberDirectory;
use crate::entity::{delay_job, notification_log, resource, subscription};
use crate::error::CoreError;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter,
};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Marker channel name used for the audit row of a permanently failed job.
pub const FAILED_CHANNEL_MARKER: &str = "none";

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// At least one channel accepted the notice.
    Delivered { channels: Vec<&'static str> },
    /// Every round failed on every channel; the job is parked as failed and
    /// the subscription stays un-notified for a manual resend.
    PermanentlyFailed,
}

pub struct DispatchWorker {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn SubscriberDirectory>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    source_url_base: String,
    cfg: DispatchConfig,
}

impl DispatchWorker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        directory: Arc<dyn SubscriberDirectory>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        source_url_base: String,
        cfg: DispatchConfig,
    ) -> Self {
        Self {
            db,
            directory,
            channels,
            source_url_base,
            cfg,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.cfg
    }

    pub fn db(&self) -> &Arc<DatabaseConnection> {
        &self.db
    }

    /// Deliver one claimed job, retrying all-channel failures up to the
    /// configured attempt budget with a short backoff.
    #[tracing::instrument(skip(self, job), fields(subscriber_id = %job.subscriber_id, resource_id = job.resource_id))]
    pub async fn dispatch(&self, job: &delay_job::Model) -> Result<DispatchOutcome, CoreError> {
        let resource = resource::Entity::find_by_id(job.resource_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                CoreError::Store(DbErr::RecordNotFound(format!(
                    "resource {} vanished under claimed job {}",
                    job.resource_id, job.id
                )))
            })?;

        let opened_at = resource.opened_at.unwrap_or(job.send_at);
        let payload = NotificationPayload::for_resource(&resource, &self.source_url_base);

        let mut attempts = job.attempts;
        loop {
            let delivered = self.deliver_round(job, &payload).await;

            if !delivered.is_empty() {
                self.finalize(job, &delivered, opened_at).await?;
                return Ok(DispatchOutcome::Delivered {
                    channels: delivered,
                });
            }

            attempts += 1;
            delay_job::Entity::update_many()
                .col_expr(delay_job::Column::Attempts, Expr::value(attempts))
                .filter(delay_job::Column::Id.eq(job.id))
                .exec(self.db.as_ref())
                .await?;

            if attempts >= self.cfg.max_attempts {
                self.park_failed(job, opened_at).await?;
                return Ok(DispatchOutcome::PermanentlyFailed);
            }

            tracing::warn!(
                name = "dispatch.retrying",
                job_id = job.id,
                attempts = attempts,
                message = "All channels failed, retrying after backoff"
            );
            tokio::time::sleep(Duration::from_secs(self.cfg.retry_backoff_secs)).await;
        }
    }

    /// One delivery round across every enabled channel. A failure on one
    /// channel never blocks the others.
    async fn deliver_round(
        &self,
        job: &delay_job::Model,
        payload: &NotificationPayload,
    ) -> Vec<&'static str> {
        let contact = match self.directory.contact(&job.subscriber_id).await {
            Ok(contact) => contact,
            Err(e) => {
                tracing::warn!(
                    name = "dispatch.contact_lookup_failed",
                    job_id = job.id,
                    error = %e,
                    message = "Subscriber directory lookup failed for claimed job"
                );
                return Vec::new();
            }
        };

        // All enabled channels fire concurrently; each failure is local.
        let contact = &contact;
        let outcomes = futures::future::join_all(
            self.channels
                .iter()
                .filter(|channel| channel.enabled_for(contact))
                .map(|channel| async move {
                    (channel.name(), channel.deliver(contact, payload).await)
                }),
        )
        .await;

        let mut delivered = Vec::new();
        for (channel, result) in outcomes {
            match result {
                Ok(()) => {
                    delivered.push(channel);
                    tracing::info!(
                        name = "dispatch.channel_delivered",
                        job_id = job.id,
                        channel = channel,
                        message = "Channel delivery succeeded"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        name = "dispatch.channel_failed",
                        job_id = job.id,
                        channel = channel,
                        error = %e,
                        message = "Channel delivery failed"
                    );
                }
            }
        }
        delivered
    }

    /// The sole place the at-most-once guarantee is finalized.
    async fn finalize(
        &self,
        job: &delay_job::Model,
        delivered: &[&'static str],
        opened_at: OffsetDateTime,
    ) -> Result<(), CoreError> {
        let now = OffsetDateTime::now_utc();
        let delay_seconds = (now - opened_at).whole_seconds().max(0);

        for channel in delivered {
            let entry = notification_log::ActiveModel {
                id: ActiveValue::NotSet,
                subscriber_id: ActiveValue::Set(job.subscriber_id.clone()),
                resource_id: ActiveValue::Set(job.resource_id),
                channel: ActiveValue::Set((*channel).to_string()),
                tier: ActiveValue::Set(job.tier.clone()),
                delay_seconds: ActiveValue::Set(delay_seconds),
                outcome: ActiveValue::Set("delivered".to_string()),
                sent_at: ActiveValue::Set(now),
            };
            entry.insert(self.db.as_ref()).await?;
        }

        subscription::Entity::update_many()
            .col_expr(subscription::Column::Notified, Expr::value(true))
            .col_expr(subscription::Column::NotifiedAt, Expr::value(Some(now)))
            .filter(subscription::Column::SubscriberId.eq(job.subscriber_id.as_str()))
            .filter(subscription::Column::ResourceId.eq(job.resource_id))
            .exec(self.db.as_ref())
            .await?;

        delay_job::Entity::update_many()
            .col_expr(delay_job::Column::Sent, Expr::value(true))
            .col_expr(delay_job::Column::SentAt, Expr::value(Some(now)))
            .filter(delay_job::Column::Id.eq(job.id))
            .exec(self.db.as_ref())
            .await?;

        tracing::info!(
            name = "dispatch.job_sent",
            job_id = job.id,
            channels = ?delivered,
            delay_seconds = delay_seconds,
            message = "Notification delivered and finalized"
        );
        Ok(())
    }

    /// Park the job as permanently failed, visibly: the audit log gets a
    /// failure row and the subscription stays un-notified for a resend.
    async fn park_failed(
        &self,
        job: &delay_job::Model,
        opened_at: OffsetDateTime,
    ) -> Result<(), CoreError> {
        let now = OffsetDateTime::now_utc();

        delay_job::Entity::update_many()
            .col_expr(delay_job::Column::Failed, Expr::value(true))
            .filter(delay_job::Column::Id.eq(job.id))
            .exec(self.db.as_ref())
            .await?;

        let entry = notification_log::ActiveModel {
            id: ActiveValue::NotSet,
            subscriber_id: ActiveValue::Set(job.subscriber_id.clone()),
            resource_id: ActiveValue::Set(job.resource_id),
            channel: ActiveValue::Set(FAILED_CHANNEL_MARKER.to_string()),
            tier: ActiveValue::Set(job.tier.clone()),
            delay_seconds: ActiveValue::Set((now - opened_at).whole_seconds().max(0)),
            outcome: ActiveValue::Set("delivery_failed".to_string()),
            sent_at: ActiveValue::Set(now),
        };
        entry.insert(self.db.as_ref()).await?;

        tracing::error!(
            name = "dispatch.job_permanently_failed",
            job_id = job.id,
            subscriber_id = %job.subscriber_id,
            resource_id = job.resource_id,
            attempts = self.cfg.max_attempts,
            message = "Job exhausted its delivery attempts and was parked as failed"
        );
        Ok(())
    }
}

/// Main loop for one dispatch worker.
#[tracing::instrument(skip(worker))]
pub async fn dispatch_loop(worker: Arc<DispatchWorker>, worker_index: usize) {
    let poll_interval = Duration::from_secs(worker.cfg.poll_interval_secs.max(1));

    loop {
        let claimed = queue::claim_due_jobs(worker.db.as_ref(), worker.cfg.batch_limit).await;

        let jobs = match claimed {
            Ok(jobs) => jobs,
            Err(e) => {
                let e = CoreError::Store(e);
                if e.is_store_unavailable() {
                    tracing::error!(
                        name = "dispatch.store_unavailable",
                        worker_index = worker_index,
                        error = %e,
                        message = "Backing store unreachable, stopping dispatch worker"
                    );
                    return;
                }
                tracing::error!(
                    name = "dispatch.claim_failed",
                    worker_index = worker_index,
                    error = %e,
                    message = "Failed to claim due jobs"
                );
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        if jobs.is_empty() {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        if !dispatch_batch(worker.as_ref(), &jobs).await {
            tracing::error!(
                name = "dispatch.store_unavailable",
                worker_index = worker_index,
                message = "Backing store unreachable mid-dispatch, stopping worker"
            );
            return;
        }
    }
}

/// Drive every job of a claimed batch concurrently. A job stuck in its retry
/// backoff never delays the other jobs of the batch.
///
/// Returns `false` once the backing store itself became unreachable.
pub async fn dispatch_batch(worker: &DispatchWorker, jobs: &[delay_job::Model]) -> bool {
    let outcomes =
        futures::future::join_all(jobs.iter().map(|job| worker.dispatch(job))).await;

    let mut store_available = true;
    for (job, outcome) in jobs.iter().zip(outcomes) {
        match outcome {
            Ok(_) => {}
            Err(e) if e.is_store_unavailable() => {
                store_available = false;
            }
            Err(e) => {
                // Local to this job; the claim stays until the stale-claim
                // release hands it to another worker.
                tracing::error!(
                    name = "dispatch.job_error",
                    job_id = job.id,
                    error = %e,
                    message = "Dispatch failed for claimed job"
                );
            }
        }
    }
    store_available
}
