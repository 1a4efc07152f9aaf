//! Per-recipient send rows, the unit of dispatch idempotency.
//!
//! At most one row exists per (campaign_id, subscriber_id), enforced by a
//! unique index. The row id doubles as the opaque tracking token embedded in
//! pixel and click URLs. Rows are inserted `pending` before the transport
//! call and either promoted to `sent` or deleted, so a failed recipient
//! stays eligible for retry.

use sea_orm::entity::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum SendStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "sent")]
    Sent,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "sends")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub subscriber_id: Uuid,
    pub email: String,
    pub status: SendStatus,
    /// Transport-assigned message id, when the transport reports one.
    pub message_id: Option<String>,
    pub sent_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
