//! Campaign email delivery and engagement tracking.
//!
//! This library resolves campaign audiences, dispatches scheduled campaigns
//! with per-recipient send idempotency, and ingests open/click tracking hits
//! into campaign aggregate counters.

use std::sync::Arc;

use lettre::{AsyncSmtpTransport, Tokio1Executor};
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

pub mod api;
pub mod audience;
pub mod config;
pub mod counters;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod tracking;
pub mod unsubscribe;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    pub config: Arc<AppConfig>,
}
