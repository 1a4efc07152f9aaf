//! Append-only open tracking events.
//!
//! One row per counted pixel hit. Hits inside the configured dedup window
//! for the same send are dropped before insertion, so `opened_at` gaps per
//! `send_id` are always at least the window length.

use sea_orm::entity::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "open_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub send_id: Uuid,
    pub campaign_id: Uuid,
    pub subscriber_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub opened_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
