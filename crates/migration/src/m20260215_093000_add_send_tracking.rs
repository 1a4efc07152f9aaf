use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Send rows and the append-only open/click event tables.
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Sends::Table)
                    .if_not_exists()
                    .col(pk_uuid(Sends::Id))
                    .col(uuid(Sends::CampaignId))
                    .col(uuid(Sends::SubscriberId))
                    .col(string(Sends::Email))
                    .col(
                        ColumnDef::new(Sends::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(string_null(Sends::MessageId))
                    .col(timestamp_with_time_zone_null(Sends::SentAt))
                    .to_owned(),
            )
            .await?;
        // One send per (campaign, subscriber); concurrent dispatch attempts
        // race on this index and the loser treats the violation as
        // "already sent".
        manager
            .create_index(
                Index::create()
                    .name("idx_sends_campaign_subscriber_unique")
                    .table(Sends::Table)
                    .col(Sends::CampaignId)
                    .col(Sends::SubscriberId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OpenEvents::Table)
                    .if_not_exists()
                    .col(pk_auto(OpenEvents::Id))
                    .col(uuid(OpenEvents::SendId))
                    .col(uuid(OpenEvents::CampaignId))
                    .col(uuid(OpenEvents::SubscriberId))
                    .col(string(OpenEvents::IpAddress))
                    .col(text(OpenEvents::UserAgent))
                    .col(
                        timestamp_with_time_zone(OpenEvents::OpenedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_open_events_send_id_opened_at")
                            .col(OpenEvents::SendId)
                            .col(OpenEvents::OpenedAt),
                    )
                    .index(
                        Index::create()
                            .name("idx_open_events_campaign_id")
                            .col(OpenEvents::CampaignId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ClickEvents::Table)
                    .if_not_exists()
                    .col(pk_auto(ClickEvents::Id))
                    .col(uuid(ClickEvents::SendId))
                    .col(uuid(ClickEvents::CampaignId))
                    .col(uuid(ClickEvents::SubscriberId))
                    .col(text(ClickEvents::Url))
                    .col(string(ClickEvents::IpAddress))
                    .col(text(ClickEvents::UserAgent))
                    .col(
                        timestamp_with_time_zone(ClickEvents::ClickedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_click_events_send_id")
                            .col(ClickEvents::SendId),
                    )
                    .index(
                        Index::create()
                            .name("idx_click_events_campaign_id")
                            .col(ClickEvents::CampaignId),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ClickEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OpenEvents::Table).to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sends_campaign_subscriber_unique")
                    .table(Sends::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Sends::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Sends {
    Table,
    Id,
    CampaignId,
    SubscriberId,
    Email,
    Status,
    MessageId,
    SentAt,
}

#[derive(Iden)]
enum OpenEvents {
    Table,
    Id,
    SendId,
    CampaignId,
    SubscriberId,
    IpAddress,
    UserAgent,
    OpenedAt,
}

#[derive(Iden)]
enum ClickEvents {
    Table,
    Id,
    SendId,
    CampaignId,
    SubscriberId,
    Url,
    IpAddress,
    UserAgent,
    ClickedAt,
}
