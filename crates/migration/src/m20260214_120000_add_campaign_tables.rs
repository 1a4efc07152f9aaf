use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Campaigns, audiences, subscribers and the targeting/membership join
/// tables.
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Campaigns::Table)
                    .if_not_exists()
                    .col(pk_uuid(Campaigns::Id))
                    .col(string(Campaigns::Name))
                    .col(string(Campaigns::Subject))
                    .col(string(Campaigns::SenderName))
                    .col(string(Campaigns::SenderEmail))
                    .col(string_null(Campaigns::ReplyToEmail))
                    .col(text(Campaigns::HtmlContent))
                    .col(text_null(Campaigns::TextContent))
                    .col(
                        ColumnDef::new(Campaigns::Status)
                            .string_len(16)
                            .not_null()
                            .default("draft"),
                    )
                    .col(timestamp_with_time_zone_null(Campaigns::ScheduledAt))
                    .col(timestamp_with_time_zone_null(Campaigns::SentAt))
                    .col(integer(Campaigns::TotalRecipients).default(0))
                    .col(integer(Campaigns::EmailsSent).default(0))
                    .col(integer(Campaigns::EmailsDelivered).default(0))
                    .col(integer(Campaigns::EmailsOpened).default(0))
                    .col(integer(Campaigns::EmailsClicked).default(0))
                    .col(integer(Campaigns::EmailsBounced).default(0))
                    .col(
                        timestamp_with_time_zone(Campaigns::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Campaigns::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;
        // The dispatcher scans for due campaigns by (status, scheduled_at).
        manager
            .create_index(
                Index::create()
                    .name("idx_campaigns_status_scheduled_at")
                    .table(Campaigns::Table)
                    .col(Campaigns::Status)
                    .col(Campaigns::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Audiences::Table)
                    .if_not_exists()
                    .col(pk_uuid(Audiences::Id))
                    .col(string(Audiences::Name))
                    .col(string_null(Audiences::Description))
                    .col(json(Audiences::Filters))
                    .col(
                        timestamp_with_time_zone(Audiences::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Audiences::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Subscribers::Table)
                    .if_not_exists()
                    .col(pk_uuid(Subscribers::Id))
                    .col(string(Subscribers::Email).unique_key().to_owned())
                    .col(
                        ColumnDef::new(Subscribers::Status)
                            .string_len(16)
                            .not_null()
                            .default("active"),
                    )
                    .col(uuid_null(Subscribers::UserId))
                    .col(
                        timestamp_with_time_zone(Subscribers::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Profiles::Table)
                    .if_not_exists()
                    .col(pk_uuid(Profiles::UserId))
                    .col(string_null(Profiles::Subscription))
                    .col(timestamp_with_time_zone_null(Profiles::TrialExpiration))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AudienceSubscribers::Table)
                    .if_not_exists()
                    .col(uuid(AudienceSubscribers::AudienceId))
                    .col(uuid(AudienceSubscribers::SubscriberId))
                    .col(
                        timestamp_with_time_zone(AudienceSubscribers::AddedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(AudienceSubscribers::AudienceId)
                            .col(AudienceSubscribers::SubscriberId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CampaignAudiences::Table)
                    .if_not_exists()
                    .col(uuid(CampaignAudiences::CampaignId))
                    .col(uuid(CampaignAudiences::AudienceId))
                    .col(boolean(CampaignAudiences::IsExcluded).default(false))
                    .primary_key(
                        Index::create()
                            .col(CampaignAudiences::CampaignId)
                            .col(CampaignAudiences::AudienceId),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CampaignAudiences::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AudienceSubscribers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Profiles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subscribers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Audiences::Table).to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_campaigns_status_scheduled_at")
                    .table(Campaigns::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Campaigns::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Campaigns {
    Table,
    Id,
    Name,
    Subject,
    SenderName,
    SenderEmail,
    ReplyToEmail,
    HtmlContent,
    TextContent,
    Status,
    ScheduledAt,
    SentAt,
    TotalRecipients,
    EmailsSent,
    EmailsDelivered,
    EmailsOpened,
    EmailsClicked,
    EmailsBounced,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Audiences {
    Table,
    Id,
    Name,
    Description,
    Filters,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Subscribers {
    Table,
    Id,
    Email,
    Status,
    UserId,
    CreatedAt,
}

#[derive(Iden)]
enum Profiles {
    Table,
    UserId,
    Subscription,
    TrialExpiration,
}

#[derive(Iden)]
enum AudienceSubscribers {
    Table,
    AudienceId,
    SubscriberId,
    AddedAt,
}

#[derive(Iden)]
enum CampaignAudiences {
    Table,
    CampaignId,
    AudienceId,
    IsExcluded,
}
