//! Tests for the dispatch worker: per-channel delivery, retry budget and the
//! at-most-once finalization.

use async_trait::async_trait;
use entrywatch::channels::{NotificationChannel, NotificationPayload};
use entrywatch::config::DispatchConfig;
use entrywatch::directory::{SubscriberContact, SubscriberDirectory};
use entrywatch::dispatch::{DispatchOutcome, DispatchWorker, claim_due_jobs, dispatch_batch};
use entrywatch::entity::{delay_job, notification_log, resource, subscription};
use entrywatch::error::{ChannelError, DirectoryError};
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectOptions, Database, DatabaseConnection,
    EntityTrait, QueryFilter,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use time::{Duration, OffsetDateTime};

async fn setup_db() -> Arc<DatabaseConnection> {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1);
    let db = Database::connect(opts).await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    Arc::new(db)
}

struct OneSubscriberDirectory {
    contact: SubscriberContact,
}

#[async_trait]
impl SubscriberDirectory for OneSubscriberDirectory {
    async fn contact(&self, subscriber_id: &str) -> Result<SubscriberContact, DirectoryError> {
        if subscriber_id == self.contact.subscriber_id {
            Ok(self.contact.clone())
        } else {
            Err(DirectoryError::UnknownSubscriber(subscriber_id.to_string()))
        }
    }
}

fn directory_for(subscriber: &str) -> Arc<dyn SubscriberDirectory> {
    Arc::new(OneSubscriberDirectory {
        contact: SubscriberContact {
            subscriber_id: subscriber.to_string(),
            tier: "free".to_string(),
            email: Some(format!("{subscriber}@example.org")),
            push_enabled: true,
            chat_id: None,
        },
    })
}

/// Channel that records deliveries and fails the first `fail_first` calls.
struct FakeChannel {
    name: &'static str,
    fail_first: usize,
    calls: AtomicUsize,
    delivered_to: Mutex<Vec<String>>,
}

impl FakeChannel {
    fn reliable(name: &'static str) -> Arc<Self> {
        Self::failing(name, 0)
    }

    fn failing(name: &'static str, fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_first,
            calls: AtomicUsize::new(0),
            delivered_to: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl NotificationChannel for FakeChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    fn enabled_for(&self, _contact: &SubscriberContact) -> bool {
        true
    }

    async fn deliver(
        &self,
        contact: &SubscriberContact,
        _payload: &NotificationPayload,
    ) -> Result<(), ChannelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(ChannelError::Transport("provider down".into()));
        }
        self.delivered_to
            .lock()
            .expect("lock")
            .push(contact.subscriber_id.clone());
        Ok(())
    }
}

fn test_config(max_attempts: i32) -> DispatchConfig {
    DispatchConfig {
        max_attempts,
        retry_backoff_secs: 0,
        ..DispatchConfig::default()
    }
}

async fn seed_opened_resource(db: &DatabaseConnection, id: i64, opened_at: OffsetDateTime) {
    resource::ActiveModel {
        id: Set(id),
        status: Set("open_standard".into()),
        is_open: Set(true),
        opened_at: Set(Some(opened_at)),
        last_checked_at: Set(Some(opened_at)),
        created_at: Set(opened_at),
        name: Set(Some("Spring Jumping".into())),
        venue: Set(None),
        starts_on: Set(None),
        ends_on: Set(None),
        last_source_label: Set(None),
    }
    .insert(db)
    .await
    .expect("insert resource");
}

async fn seed_subscription(db: &DatabaseConnection, subscriber: &str, resource: i64) {
    subscription::ActiveModel {
        id: sea_orm::ActiveValue::NotSet,
        subscriber_id: Set(subscriber.to_string()),
        resource_id: Set(resource),
        notified: Set(false),
        notified_at: Set(None),
        created_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(db)
    .await
    .expect("insert subscription");
}

/// Insert a due job and claim it, as the dispatch loop would.
async fn seed_claimed_job(
    db: &DatabaseConnection,
    subscriber: &str,
    resource: i64,
) -> delay_job::Model {
    delay_job::ActiveModel {
        id: sea_orm::ActiveValue::NotSet,
        subscriber_id: Set(subscriber.to_string()),
        resource_id: Set(resource),
        tier: Set("free".to_string()),
        send_at: Set(OffsetDateTime::now_utc() - Duration::seconds(1)),
        claimed: Set(false),
        claim_token: Set(None),
        claimed_at: Set(None),
        attempts: Set(0),
        sent: Set(false),
        sent_at: Set(None),
        failed: Set(false),
        created_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(db)
    .await
    .expect("insert job");

    let mut claimed = claim_due_jobs(db, 10).await.expect("claim");
    assert_eq!(claimed.len(), 1);
    claimed.remove(0)
}

#[tokio::test]
async fn one_failing_channel_does_not_block_the_other() {
    let db = setup_db().await;
    let opened_at = OffsetDateTime::now_utc() - Duration::seconds(30);
    seed_opened_resource(db.as_ref(), 200, opened_at).await;
    seed_subscription(db.as_ref(), "sub-1", 200).await;
    let job = seed_claimed_job(db.as_ref(), "sub-1", 200).await;

    let good = FakeChannel::reliable("push");
    let bad = FakeChannel::failing("email", usize::MAX);
    let worker = DispatchWorker::new(
        db.clone(),
        directory_for("sub-1"),
        vec![bad, good.clone()],
        "https://source.example.org/events".into(),
        test_config(3),
    );

    let outcome = worker.dispatch(&job).await.expect("dispatch");
    assert_eq!(
        outcome,
        DispatchOutcome::Delivered {
            channels: vec!["push"]
        }
    );
    assert_eq!(good.delivered_to.lock().expect("lock").as_slice(), ["sub-1"]);

    // Finalized: job sent, subscription notified, one audit row.
    let job = delay_job::Entity::find_by_id(job.id)
        .one(db.as_ref())
        .await
        .expect("load")
        .expect("exists");
    assert!(job.sent);
    assert!(job.sent_at.is_some());
    assert!(!job.failed);

    let sub = subscription::Entity::find()
        .filter(subscription::Column::SubscriberId.eq("sub-1"))
        .one(db.as_ref())
        .await
        .expect("load")
        .expect("exists");
    assert!(sub.notified);
    assert!(sub.notified_at.is_some());

    let log = notification_log::Entity::find().all(db.as_ref()).await.expect("log");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].channel, "push");
    assert_eq!(log[0].outcome, "delivered");
    // Opened 30s ago, so the recorded delay reflects that.
    assert!((28..=35).contains(&log[0].delay_seconds));
}

#[tokio::test]
async fn transient_failure_is_retried_within_the_attempt_budget() {
    let db = setup_db().await;
    seed_opened_resource(db.as_ref(), 201, OffsetDateTime::now_utc()).await;
    seed_subscription(db.as_ref(), "sub-1", 201).await;
    let job = seed_claimed_job(db.as_ref(), "sub-1", 201).await;

    let flaky = FakeChannel::failing("push", 1);
    let worker = DispatchWorker::new(
        db.clone(),
        directory_for("sub-1"),
        vec![flaky],
        "https://source.example.org/events".into(),
        test_config(3),
    );

    let outcome = worker.dispatch(&job).await.expect("dispatch");
    assert_eq!(
        outcome,
        DispatchOutcome::Delivered {
            channels: vec!["push"]
        }
    );

    let job = delay_job::Entity::find_by_id(job.id)
        .one(db.as_ref())
        .await
        .expect("load")
        .expect("exists");
    assert!(job.sent);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn exhausted_attempts_park_the_job_visibly() {
    let db = setup_db().await;
    seed_opened_resource(db.as_ref(), 202, OffsetDateTime::now_utc()).await;
    seed_subscription(db.as_ref(), "sub-1", 202).await;
    let job = seed_claimed_job(db.as_ref(), "sub-1", 202).await;

    let dead = FakeChannel::failing("push", usize::MAX);
    let worker = DispatchWorker::new(
        db.clone(),
        directory_for("sub-1"),
        vec![dead],
        "https://source.example.org/events".into(),
        test_config(2),
    );

    let outcome = worker.dispatch(&job).await.expect("dispatch");
    assert_eq!(outcome, DispatchOutcome::PermanentlyFailed);

    let job = delay_job::Entity::find_by_id(job.id)
        .one(db.as_ref())
        .await
        .expect("load")
        .expect("exists");
    assert!(job.failed);
    assert!(!job.sent);
    assert_eq!(job.attempts, 2);

    // The failure is visible in the audit log, never silently absent.
    let log = notification_log::Entity::find().all(db.as_ref()).await.expect("log");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].outcome, "delivery_failed");
    assert_eq!(log[0].channel, "none");

    // The subscription stays un-notified so a manual resend remains possible.
    let sub = subscription::Entity::find()
        .filter(subscription::Column::SubscriberId.eq("sub-1"))
        .one(db.as_ref())
        .await
        .expect("load")
        .expect("exists");
    assert!(!sub.notified);
}

#[tokio::test]
async fn a_retrying_job_does_not_hold_up_the_rest_of_the_batch() {
    let db = setup_db().await;
    let opened_at = OffsetDateTime::now_utc() - Duration::seconds(30);
    seed_opened_resource(db.as_ref(), 205, opened_at).await;
    seed_subscription(db.as_ref(), "stuck-sub", 205).await;
    seed_subscription(db.as_ref(), "fast-sub", 205).await;

    struct AnySubscriberDirectory;
    #[async_trait]
    impl SubscriberDirectory for AnySubscriberDirectory {
        async fn contact(&self, subscriber_id: &str) -> Result<SubscriberContact, DirectoryError> {
            Ok(SubscriberContact {
                subscriber_id: subscriber_id.to_string(),
                tier: "free".to_string(),
                email: Some(format!("{subscriber_id}@example.org")),
                push_enabled: true,
                chat_id: None,
            })
        }
    }

    /// Rejects one subscriber forever and timestamps everyone else's delivery.
    struct SelectiveChannel {
        reject: &'static str,
        delivered_at: Mutex<Vec<(String, std::time::Instant)>>,
    }
    #[async_trait]
    impl NotificationChannel for SelectiveChannel {
        fn name(&self) -> &'static str {
            "push"
        }
        fn enabled_for(&self, _contact: &SubscriberContact) -> bool {
            true
        }
        async fn deliver(
            &self,
            contact: &SubscriberContact,
            _payload: &NotificationPayload,
        ) -> Result<(), ChannelError> {
            if contact.subscriber_id == self.reject {
                return Err(ChannelError::Transport("provider down".into()));
            }
            self.delivered_at
                .lock()
                .expect("lock")
                .push((contact.subscriber_id.clone(), std::time::Instant::now()));
            Ok(())
        }
    }

    // The stuck job sorts first in the batch: it is due earlier.
    for (subscriber, due) in [("stuck-sub", 10i64), ("fast-sub", 1)] {
        delay_job::ActiveModel {
            id: sea_orm::ActiveValue::NotSet,
            subscriber_id: Set(subscriber.to_string()),
            resource_id: Set(205),
            tier: Set("free".to_string()),
            send_at: Set(OffsetDateTime::now_utc() - Duration::seconds(due)),
            claimed: Set(false),
            claim_token: Set(None),
            claimed_at: Set(None),
            attempts: Set(0),
            sent: Set(false),
            sent_at: Set(None),
            failed: Set(false),
            created_at: Set(OffsetDateTime::now_utc()),
        }
        .insert(db.as_ref())
        .await
        .expect("insert job");
    }
    let jobs = claim_due_jobs(db.as_ref(), 10).await.expect("claim");
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].subscriber_id, "stuck-sub");

    let channel = Arc::new(SelectiveChannel {
        reject: "stuck-sub",
        delivered_at: Mutex::new(Vec::new()),
    });
    let worker = DispatchWorker::new(
        db.clone(),
        Arc::new(AnySubscriberDirectory),
        vec![channel.clone()],
        "https://source.example.org/events".into(),
        DispatchConfig {
            max_attempts: 2,
            retry_backoff_secs: 1,
            ..DispatchConfig::default()
        },
    );

    let started = std::time::Instant::now();
    assert!(dispatch_batch(&worker, &jobs).await);

    // The fast job went out well inside the stuck job's one-second backoff.
    let delivered = channel.delivered_at.lock().expect("lock").clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "fast-sub");
    assert!(delivered[0].1 - started < std::time::Duration::from_millis(500));

    let fast = delay_job::Entity::find_by_id(jobs[1].id)
        .one(db.as_ref())
        .await
        .expect("load")
        .expect("exists");
    assert!(fast.sent);
    let stuck = delay_job::Entity::find_by_id(jobs[0].id)
        .one(db.as_ref())
        .await
        .expect("load")
        .expect("exists");
    assert!(stuck.failed);
    assert!(!stuck.sent);
}

#[tokio::test]
async fn directory_outage_consumes_an_attempt() {
    let db = setup_db().await;
    seed_opened_resource(db.as_ref(), 203, OffsetDateTime::now_utc()).await;
    seed_subscription(db.as_ref(), "sub-1", 203).await;
    let job = seed_claimed_job(db.as_ref(), "sub-1", 203).await;

    struct DownDirectory;
    #[async_trait]
    impl SubscriberDirectory for DownDirectory {
        async fn contact(&self, _id: &str) -> Result<SubscriberContact, DirectoryError> {
            Err(DirectoryError::Unavailable("offline".into()))
        }
    }

    let channel = FakeChannel::reliable("push");
    let worker = DispatchWorker::new(
        db.clone(),
        Arc::new(DownDirectory),
        vec![channel],
        "https://source.example.org/events".into(),
        test_config(1),
    );

    let outcome = worker.dispatch(&job).await.expect("dispatch");
    assert_eq!(outcome, DispatchOutcome::PermanentlyFailed);
}

#[tokio::test]
async fn dispatch_for_a_missing_resource_is_an_error() {
    let db = setup_db().await;
    seed_opened_resource(db.as_ref(), 204, OffsetDateTime::now_utc()).await;
    let job = seed_claimed_job(db.as_ref(), "sub-1", 204).await;
    resource::Entity::delete_by_id(204)
        .exec(db.as_ref())
        .await
        .expect("delete");

    let worker = DispatchWorker::new(
        db.clone(),
        directory_for("sub-1"),
        vec![FakeChannel::reliable("push")],
        "https://source.example.org/events".into(),
        test_config(3),
    );

    assert!(worker.dispatch(&job).await.is_err());
}
