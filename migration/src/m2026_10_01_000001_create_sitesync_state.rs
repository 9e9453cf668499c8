//! Migration to create the sitesync_state table.
//!
//! A small versioned key/value store holding the single job slot and the
//! expiring staged-artifact records of the remote agent.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SitesyncState::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SitesyncState::Key)
                            .string_len(191)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SitesyncState::Value).text().not_null())
                    .col(
                        ColumnDef::new(SitesyncState::Version)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(SitesyncState::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SitesyncState::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sitesync_state_expires_at")
                    .table(SitesyncState::Table)
                    .col(SitesyncState::ExpiresAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SitesyncState::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SitesyncState {
    Table,
    Key,
    Value,
    Version,
    ExpiresAt,
    UpdatedAt,
}
