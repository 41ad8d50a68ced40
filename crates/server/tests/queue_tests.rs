//! Tests for the durable delay queue: claiming, stale-claim release and the
//! unsubscribe cascade.

use entrywatch::dispatch::{cancel_pending, claim_due_jobs, release_stale_claims};
use entrywatch::entity::delay_job;
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectOptions, Database, DatabaseConnection, EntityTrait,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use time::{Duration, OffsetDateTime};

async fn setup_db() -> Arc<DatabaseConnection> {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1);
    let db = Database::connect(opts).await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    Arc::new(db)
}

async fn insert_job(
    db: &DatabaseConnection,
    subscriber: &str,
    resource: i64,
    send_at: OffsetDateTime,
) -> delay_job::Model {
    let model = delay_job::ActiveModel {
        id: sea_orm::ActiveValue::NotSet,
        subscriber_id: Set(subscriber.to_string()),
        resource_id: Set(resource),
        tier: Set("free".to_string()),
        send_at: Set(send_at),
        claimed: Set(false),
        claim_token: Set(None),
        claimed_at: Set(None),
        attempts: Set(0),
        sent: Set(false),
        sent_at: Set(None),
        failed: Set(false),
        created_at: Set(OffsetDateTime::now_utc()),
    };
    model.insert(db).await.expect("insert job")
}

#[tokio::test]
async fn claims_only_due_jobs_in_send_order() {
    let db = setup_db().await;
    let now = OffsetDateTime::now_utc();
    insert_job(db.as_ref(), "later", 1, now - Duration::seconds(5)).await;
    insert_job(db.as_ref(), "first", 1, now - Duration::seconds(60)).await;
    insert_job(db.as_ref(), "future", 1, now + Duration::hours(1)).await;

    let claimed = claim_due_jobs(db.as_ref(), 10).await.expect("claim");
    assert_eq!(claimed.len(), 2);
    assert_eq!(claimed[0].subscriber_id, "first");
    assert_eq!(claimed[1].subscriber_id, "later");
    for job in &claimed {
        assert!(job.claimed);
        assert!(job.claim_token.is_some());
        assert!(job.claimed_at.is_some());
    }
}

#[tokio::test]
async fn a_job_is_claimed_at_most_once() {
    let db = setup_db().await;
    let now = OffsetDateTime::now_utc();
    insert_job(db.as_ref(), "sub-1", 2, now - Duration::seconds(1)).await;

    let first = claim_due_jobs(db.as_ref(), 10).await.expect("first claim");
    assert_eq!(first.len(), 1);

    // Same instant, different worker: nothing left to claim.
    let second = claim_due_jobs(db.as_ref(), 10).await.expect("second claim");
    assert!(second.is_empty());
}

#[tokio::test]
async fn racing_workers_claim_disjoint_sets() {
    let db = setup_db().await;
    let now = OffsetDateTime::now_utc();
    for i in 0..6 {
        insert_job(db.as_ref(), &format!("sub-{i}"), 4, now - Duration::seconds(10)).await;
    }

    // Two workers racing over the same due set.
    let (a, b) = tokio::join!(claim_due_jobs(db.as_ref(), 4), claim_due_jobs(db.as_ref(), 4));
    let a = a.expect("claim a");
    let b = b.expect("claim b");

    let ids_a: HashSet<i32> = a.iter().map(|job| job.id).collect();
    let ids_b: HashSet<i32> = b.iter().map(|job| job.id).collect();
    assert!(ids_a.is_disjoint(&ids_b));

    // A job the race left behind is still claimable, but only once each.
    let mut seen: HashSet<i32> = ids_a.union(&ids_b).copied().collect();
    loop {
        let rest = claim_due_jobs(db.as_ref(), 4).await.expect("claim rest");
        if rest.is_empty() {
            break;
        }
        for job in rest {
            assert!(seen.insert(job.id), "job {} claimed twice", job.id);
        }
    }
    assert_eq!(seen.len(), 6);
}

#[tokio::test]
async fn claim_respects_the_batch_limit() {
    let db = setup_db().await;
    let now = OffsetDateTime::now_utc();
    for i in 0..5 {
        insert_job(db.as_ref(), &format!("sub-{i}"), 3, now - Duration::seconds(10 - i)).await;
    }

    let claimed = claim_due_jobs(db.as_ref(), 3).await.expect("claim");
    assert_eq!(claimed.len(), 3);
    let rest = claim_due_jobs(db.as_ref(), 10).await.expect("claim rest");
    assert_eq!(rest.len(), 2);
}

#[tokio::test]
async fn stale_claims_are_released_and_reclaimed() {
    let db = setup_db().await;
    let now = OffsetDateTime::now_utc();
    insert_job(db.as_ref(), "sub-1", 4, now - Duration::seconds(1)).await;

    let claimed = claim_due_jobs(db.as_ref(), 10).await.expect("claim");
    assert_eq!(claimed.len(), 1);

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    let released = release_stale_claims(db.as_ref(), StdDuration::from_millis(1))
        .await
        .expect("release");
    assert_eq!(released, 1);

    let job = delay_job::Entity::find_by_id(claimed[0].id)
        .one(db.as_ref())
        .await
        .expect("load")
        .expect("exists");
    assert!(!job.claimed);
    assert!(job.claim_token.is_none());

    let reclaimed = claim_due_jobs(db.as_ref(), 10).await.expect("reclaim");
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, claimed[0].id);
}

#[tokio::test]
async fn fresh_claims_are_not_released() {
    let db = setup_db().await;
    let now = OffsetDateTime::now_utc();
    insert_job(db.as_ref(), "sub-1", 5, now - Duration::seconds(1)).await;
    claim_due_jobs(db.as_ref(), 10).await.expect("claim");

    let released = release_stale_claims(db.as_ref(), StdDuration::from_secs(120))
        .await
        .expect("release");
    assert_eq!(released, 0);
}

#[tokio::test]
async fn cancel_pending_removes_only_unclaimed_jobs() {
    let db = setup_db().await;
    let now = OffsetDateTime::now_utc();
    insert_job(db.as_ref(), "pending", 6, now + Duration::hours(1)).await;
    insert_job(db.as_ref(), "claimed", 6, now - Duration::seconds(1)).await;
    claim_due_jobs(db.as_ref(), 10).await.expect("claim");

    // Unsubscribe before the delay elapsed: the job disappears.
    let cancelled = cancel_pending(db.as_ref(), "pending", 6).await.expect("cancel");
    assert_eq!(cancelled, 1);

    // Already claimed: past the point of no return, stays.
    let cancelled = cancel_pending(db.as_ref(), "claimed", 6).await.expect("cancel");
    assert_eq!(cancelled, 0);
    assert_eq!(
        delay_job::Entity::find().all(db.as_ref()).await.expect("all").len(),
        1
    );
}
