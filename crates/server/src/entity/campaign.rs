//! Campaign rows with lifecycle status and aggregate engagement counters.
//!
//! Campaigns are created by an external authoring flow. This core mutates
//! only the lifecycle fields (`status`, `sent_at`, `total_recipients`) and
//! the aggregate counters.

use sea_orm::entity::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum CampaignStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "sending")]
    Sending,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "campaigns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub sender_name: String,
    pub sender_email: String,
    pub reply_to_email: Option<String>,
    pub preheader: Option<String>,
    pub html_content: String,
    pub text_content: Option<String>,
    pub status: CampaignStatus,
    pub scheduled_at: Option<OffsetDateTime>,
    pub sent_at: Option<OffsetDateTime>,
    pub total_recipients: i32,
    pub emails_sent: i32,
    pub emails_delivered: i32,
    pub emails_opened: i32,
    pub emails_clicked: i32,
    pub emails_bounced: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
