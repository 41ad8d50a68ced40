//! Fan-out coordinator: turns one opening event into per-subscriber delayed
//! delivery jobs, exactly once per subscriber.
//!
//! Idempotence comes from the unique (subscriber, resource) index on the
//! delay queue: a redundant call for the same opening (double detection,
//! crash-recovery rescan) collides on insert and is treated as a no-op.

use crate::config::TierConfig;
use crate::directory::SubscriberDirectory;
use crate::entity::{delay_job, subscription};
use crate::error::CoreError;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use time::OffsetDateTime;

pub struct FanoutCoordinator {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn SubscriberDirectory>,
    tiers: TierConfig,
}

impl FanoutCoordinator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        directory: Arc<dyn SubscriberDirectory>,
        tiers: TierConfig,
    ) -> Self {
        Self {
            db,
            directory,
            tiers,
        }
    }

    /// Enqueue one delay job per un-notified subscriber of the resource.
    ///
    /// Returns the number of jobs actually inserted. Subscribers who already
    /// have a job (or were already notified) are skipped silently.
    #[tracing::instrument(skip(self))]
    pub async fn handle_opened(
        &self,
        resource_id: i64,
        opened_at: OffsetDateTime,
    ) -> Result<usize, CoreError> {
        let subscriptions = subscription::Entity::find()
            .filter(subscription::Column::ResourceId.eq(resource_id))
            .filter(subscription::Column::Notified.eq(false))
            .all(self.db.as_ref())
            .await?;

        let now = OffsetDateTime::now_utc();
        let mut enqueued = 0usize;

        for sub in subscriptions {
            let tier = match self.directory.contact(&sub.subscriber_id).await {
                Ok(contact) => contact.tier,
                Err(e) => {
                    tracing::warn!(
                        name = "fanout.tier_lookup_failed",
                        subscriber_id = %sub.subscriber_id,
                        error = %e,
                        message = "Tier lookup failed, falling back to default tier"
                    );
                    self.tiers.default_tier.clone()
                }
            };

            // A late coordinator run must not produce a past timestamp that
            // never gets claimed; clamp to now instead of skipping.
            let mut send_at = opened_at + self.tiers.delay_for(&tier);
            if send_at <= now {
                send_at = now;
            }

            let job = delay_job::ActiveModel {
                id: ActiveValue::NotSet,
                subscriber_id: ActiveValue::Set(sub.subscriber_id.clone()),
                resource_id: ActiveValue::Set(resource_id),
                tier: ActiveValue::Set(tier),
                send_at: ActiveValue::Set(send_at),
                claimed: ActiveValue::Set(false),
                claim_token: ActiveValue::Set(None),
                claimed_at: ActiveValue::Set(None),
                attempts: ActiveValue::Set(0),
                sent: ActiveValue::Set(false),
                sent_at: ActiveValue::Set(None),
                failed: ActiveValue::Set(false),
                created_at: ActiveValue::Set(now),
            };

            let insert = delay_job::Entity::insert(job)
                .on_conflict(
                    OnConflict::columns([
                        delay_job::Column::SubscriberId,
                        delay_job::Column::ResourceId,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec(self.db.as_ref())
                .await;

            match insert {
                Ok(_) => {
                    enqueued += 1;
                    tracing::debug!(
                        name = "fanout.job_enqueued",
                        subscriber_id = %sub.subscriber_id,
                        resource_id = resource_id,
                        send_at = %send_at,
                        message = "Delay job enqueued"
                    );
                }
                // Conflict on the pair index: a job already exists for this
                // subscriber. Success by idempotence, not an error.
                Err(DbErr::RecordNotInserted) => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            name = "fanout.completed",
            resource_id = resource_id,
            enqueued = enqueued,
            message = "Fan-out completed for opening event"
        );
        Ok(enqueued)
    }
}
