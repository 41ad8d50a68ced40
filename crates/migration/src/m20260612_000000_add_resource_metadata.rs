use sea_orm_migration::{prelude::*, schema::*};

use crate::m20260501_000001_create_core_tables::Resource;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Add informational metadata reported by the source page, plus the raw
/// lifecycle label observed at the last classification (audit only).
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Resource::Table)
                    .add_column(string_null(Alias::new("name")).to_owned())
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Resource::Table)
                    .add_column(string_null(Alias::new("venue")).to_owned())
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Resource::Table)
                    .add_column(date_null(Alias::new("starts_on")).to_owned())
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Resource::Table)
                    .add_column(date_null(Alias::new("ends_on")).to_owned())
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Resource::Table)
                    .add_column(string_null(Alias::new("last_source_label")).to_owned())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for column in [
            "name",
            "venue",
            "starts_on",
            "ends_on",
            "last_source_label",
        ] {
            manager
                .alter_table(
                    Table::alter()
                        .table(Resource::Table)
                        .drop_column(Alias::new(column))
                        .to_owned(),
                )
                .await?;
        }
        Ok(())
    }
}
