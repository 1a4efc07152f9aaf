//! Atomic campaign counter increments.
//!
//! Tracking ingest handlers run under arbitrary concurrency, so counters are
//! bumped with a single `SET col = col + 1` statement at the storage layer
//! instead of a fetch-then-write from the handler.

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entity::campaign;

async fn increment<C: ConnectionTrait>(
    db: &C,
    campaign_id: Uuid,
    column: campaign::Column,
) -> Result<(), DbErr> {
    campaign::Entity::update_many()
        .col_expr(column, Expr::col(column).add(1))
        .filter(campaign::Column::Id.eq(campaign_id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn emails_sent<C: ConnectionTrait>(db: &C, campaign_id: Uuid) -> Result<(), DbErr> {
    increment(db, campaign_id, campaign::Column::EmailsSent).await
}

pub async fn emails_delivered<C: ConnectionTrait>(db: &C, campaign_id: Uuid) -> Result<(), DbErr> {
    increment(db, campaign_id, campaign::Column::EmailsDelivered).await
}

pub async fn emails_opened<C: ConnectionTrait>(db: &C, campaign_id: Uuid) -> Result<(), DbErr> {
    increment(db, campaign_id, campaign::Column::EmailsOpened).await
}

pub async fn emails_clicked<C: ConnectionTrait>(db: &C, campaign_id: Uuid) -> Result<(), DbErr> {
    increment(db, campaign_id, campaign::Column::EmailsClicked).await
}

pub async fn emails_bounced<C: ConnectionTrait>(db: &C, campaign_id: Uuid) -> Result<(), DbErr> {
    increment(db, campaign_id, campaign::Column::EmailsBounced).await
}
