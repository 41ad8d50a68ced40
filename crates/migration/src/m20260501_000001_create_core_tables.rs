use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Tracked resources. The primary key is the external source's numeric
        // key, never generated locally.
        manager
            .create_table(
                Table::create()
                    .table(Resource::Table)
                    .if_not_exists()
                    .col(big_integer(Resource::Id).primary_key().to_owned())
                    .col(
                        string(Resource::Status)
                            .default("unopened")
                            .not_null()
                            .to_owned(),
                    )
                    .col(
                        boolean(Resource::IsOpen)
                            .default(false)
                            .not_null()
                            .to_owned(),
                    )
                    .col(timestamp_with_time_zone_null(Resource::OpenedAt).to_owned())
                    .col(timestamp_with_time_zone_null(Resource::LastCheckedAt).to_owned())
                    .col(
                        timestamp_with_time_zone(Resource::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null()
                            .to_owned(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Subscription::Table)
                    .if_not_exists()
                    .col(pk_auto(Subscription::Id))
                    .col(string(Subscription::SubscriberId).not_null().to_owned())
                    .col(big_integer(Subscription::ResourceId).not_null().to_owned())
                    .col(
                        boolean(Subscription::Notified)
                            .default(false)
                            .not_null()
                            .to_owned(),
                    )
                    .col(timestamp_with_time_zone_null(Subscription::NotifiedAt).to_owned())
                    .col(
                        timestamp_with_time_zone(Subscription::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null()
                            .to_owned(),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_subscription_pair_unique")
                    .table(Subscription::Table)
                    .col(Subscription::SubscriberId)
                    .col(Subscription::ResourceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DelayJob::Table)
                    .if_not_exists()
                    .col(pk_auto(DelayJob::Id))
                    .col(string(DelayJob::SubscriberId).not_null().to_owned())
                    .col(big_integer(DelayJob::ResourceId).not_null().to_owned())
                    .col(string(DelayJob::Tier).not_null().to_owned())
                    .col(
                        timestamp_with_time_zone(DelayJob::SendAt)
                            .not_null()
                            .to_owned(),
                    )
                    .col(
                        boolean(DelayJob::Claimed)
                            .default(false)
                            .not_null()
                            .to_owned(),
                    )
                    .col(string_null(DelayJob::ClaimToken).to_owned())
                    .col(timestamp_with_time_zone_null(DelayJob::ClaimedAt).to_owned())
                    .col(
                        integer(DelayJob::Attempts)
                            .default(0)
                            .not_null()
                            .to_owned(),
                    )
                    .col(boolean(DelayJob::Sent).default(false).not_null().to_owned())
                    .col(timestamp_with_time_zone_null(DelayJob::SentAt).to_owned())
                    .col(
                        boolean(DelayJob::Failed)
                            .default(false)
                            .not_null()
                            .to_owned(),
                    )
                    .col(
                        timestamp_with_time_zone(DelayJob::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null()
                            .to_owned(),
                    )
                    .to_owned(),
            )
            .await?;
        // One job per (subscriber, resource) pair. Re-detected openings must
        // collide here instead of producing a second delivery.
        manager
            .create_index(
                Index::create()
                    .name("idx_delay_job_pair_unique")
                    .table(DelayJob::Table)
                    .col(DelayJob::SubscriberId)
                    .col(DelayJob::ResourceId)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_delay_job_due")
                    .table(DelayJob::Table)
                    .col(DelayJob::Claimed)
                    .col(DelayJob::SendAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(NotificationLog::Table)
                    .if_not_exists()
                    .col(pk_auto(NotificationLog::Id))
                    .col(string(NotificationLog::SubscriberId).not_null().to_owned())
                    .col(
                        big_integer(NotificationLog::ResourceId)
                            .not_null()
                            .to_owned(),
                    )
                    .col(string(NotificationLog::Channel).not_null().to_owned())
                    .col(string(NotificationLog::Tier).not_null().to_owned())
                    .col(
                        big_integer(NotificationLog::DelaySeconds)
                            .not_null()
                            .to_owned(),
                    )
                    .col(string(NotificationLog::Outcome).not_null().to_owned())
                    .col(
                        timestamp_with_time_zone(NotificationLog::SentAt)
                            .default(Expr::current_timestamp())
                            .not_null()
                            .to_owned(),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_notification_log_subscriber")
                    .table(NotificationLog::Table)
                    .col(NotificationLog::SubscriberId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(NotificationLog::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DelayJob::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subscription::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Resource::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Resource {
    Table,
    Id,
    Status,
    IsOpen,
    OpenedAt,
    LastCheckedAt,
    CreatedAt,
}

#[derive(Iden)]
enum Subscription {
    Table,
    Id,
    SubscriberId,
    ResourceId,
    Notified,
    NotifiedAt,
    CreatedAt,
}

#[derive(Iden)]
enum DelayJob {
    Table,
    Id,
    SubscriberId,
    ResourceId,
    Tier,
    SendAt,
    Claimed,
    ClaimToken,
    ClaimedAt,
    Attempts,
    Sent,
    SentAt,
    Failed,
    CreatedAt,
}

#[derive(Iden)]
enum NotificationLog {
    Table,
    Id,
    SubscriberId,
    ResourceId,
    Channel,
    Tier,
    DelaySeconds,
    Outcome,
    SentAt,
}
