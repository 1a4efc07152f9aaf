//! Time-driven campaign dispatcher.
//!
//! One periodic loop discovers due campaigns and runs the send pipeline for
//! each. Overlap protection is an explicit state object owned by the
//! dispatcher: a tick (or HTTP trigger) that finds a run already active
//! skips entirely rather than queueing, so a slow dispatch can never be
//! doubled by the next timer fire. The guard is process-local; running
//! multiple instances needs an external lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sea_orm::{ActiveValue, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::AppResources;
use crate::dispatch::{self, DispatchReport};
use crate::entity::campaign::{self, CampaignStatus};

/// Overlap guard for dispatch runs.
#[derive(Debug, Default)]
pub struct DispatcherState {
    active: AtomicBool,
}

impl DispatcherState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the dispatcher. Returns `None` while another run holds
    /// the claim; the returned guard releases it on drop.
    pub fn try_acquire(&self) -> Option<DispatchGuard<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DispatchGuard { state: self })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

pub struct DispatchGuard<'a> {
    state: &'a DispatcherState,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.state.active.store(false, Ordering::Release);
    }
}

/// Per-campaign entry in a [`ProcessSummary`].
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CampaignResult {
    pub campaign_id: Uuid,
    pub name: String,
    pub status: String,
    pub sent: usize,
    pub failed: usize,
    pub total_recipients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one dispatcher run.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ProcessSummary {
    pub processed: usize,
    /// True when the run was a no-op because another run was active.
    pub skipped: bool,
    pub results: Vec<CampaignResult>,
}

impl ProcessSummary {
    fn skipped() -> Self {
        Self {
            processed: 0,
            skipped: true,
            results: Vec::new(),
        }
    }
}

/// Find due campaigns and dispatch each exactly once.
///
/// Safe to call from both the timer loop and the HTTP trigger; the shared
/// [`DispatcherState`] guarantees at most one run at a time.
#[tracing::instrument(skip_all)]
pub async fn process_due_campaigns(
    resources: Arc<AppResources>,
    state: Arc<DispatcherState>,
) -> ProcessSummary {
    let Some(_guard) = state.try_acquire() else {
        tracing::info!(
            name = "scheduler.tick.skipped",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            message = "Previous dispatch run still active; skipping"
        );
        return ProcessSummary::skipped();
    };

    let now = OffsetDateTime::now_utc();
    let due = campaign::Entity::find()
        .filter(campaign::Column::Status.eq(CampaignStatus::Scheduled))
        .filter(campaign::Column::ScheduledAt.lte(now))
        .order_by_asc(campaign::Column::ScheduledAt)
        .all(resources.db.as_ref())
        .await;
    let due = match due {
        Ok(due) => due,
        Err(e) => {
            tracing::error!(
                name = "scheduler.scan_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                message = "Failed to scan for due campaigns"
            );
            return ProcessSummary {
                processed: 0,
                skipped: false,
                results: Vec::new(),
            };
        }
    };

    let mut results = Vec::with_capacity(due.len());
    for campaign_model in &due {
        results.push(process_one(&resources, campaign_model).await);
    }

    ProcessSummary {
        processed: due.len(),
        skipped: false,
        results,
    }
}

async fn process_one(resources: &AppResources, campaign_model: &campaign::Model) -> CampaignResult {
    let db = resources.db.as_ref();

    // Claim the campaign before sending so a crash leaves a visible state.
    let claim = campaign::ActiveModel {
        id: ActiveValue::Unchanged(campaign_model.id),
        status: ActiveValue::Set(CampaignStatus::Sending),
        updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        ..Default::default()
    };
    if let Err(e) = sea_orm::ActiveModelTrait::update(claim, db).await {
        tracing::error!(
            name = "scheduler.claim_failed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            error = %e,
            campaign_id = %campaign_model.id,
            message = "Failed to move campaign to sending"
        );
        return CampaignResult {
            campaign_id: campaign_model.id,
            name: campaign_model.name.clone(),
            status: "failed".into(),
            sent: 0,
            failed: 0,
            total_recipients: 0,
            error: Some(format!("failed to update status: {e}")),
        };
    }

    match dispatch::dispatch_campaign(
        db,
        &resources.config,
        resources.mailer.as_ref(),
        campaign_model,
    )
    .await
    {
        Ok(report) => {
            let DispatchReport {
                sent,
                failed,
                skipped: _,
                total_recipients,
            } = report;
            let status = if total_recipients > 0 && failed == total_recipients {
                "failed"
            } else {
                "sent"
            };
            CampaignResult {
                campaign_id: campaign_model.id,
                name: campaign_model.name.clone(),
                status: status.into(),
                sent,
                failed,
                total_recipients,
                error: None,
            }
        }
        Err(e) => {
            // A retryable failure (store unavailable) returns the campaign
            // to the queue; anything else is terminal.
            let next_status = if e.is_retryable() {
                CampaignStatus::Scheduled
            } else {
                CampaignStatus::Failed
            };
            let revert = campaign::ActiveModel {
                id: ActiveValue::Unchanged(campaign_model.id),
                status: ActiveValue::Set(next_status.clone()),
                updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
                ..Default::default()
            };
            if let Err(revert_err) = sea_orm::ActiveModelTrait::update(revert, db).await {
                tracing::error!(
                    name = "scheduler.revert_failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %revert_err,
                    campaign_id = %campaign_model.id,
                    message = "Failed to update campaign status after dispatch error"
                );
            }
            tracing::error!(
                name = "scheduler.dispatch_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                campaign_id = %campaign_model.id,
                retryable = e.is_retryable(),
                message = "Campaign dispatch attempt failed"
            );
            CampaignResult {
                campaign_id: campaign_model.id,
                name: campaign_model.name.clone(),
                status: match next_status {
                    CampaignStatus::Scheduled => "rescheduled".into(),
                    _ => "failed".into(),
                },
                sent: 0,
                failed: 0,
                total_recipients: 0,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Periodic dispatcher loop, spawned once from `main`.
///
/// Each tick starts a dispatch run and waits up to the configured timeout
/// for it to finish. A run that overruns keeps going in the background;
/// the overlap guard makes the following ticks no-ops until it completes.
#[tracing::instrument(skip_all)]
pub async fn run_dispatch_loop(resources: Arc<AppResources>, state: Arc<DispatcherState>) {
    let tick = Duration::from_secs(resources.config.scheduler.tick_interval_secs);
    let dispatch_timeout = Duration::from_secs(resources.config.scheduler.dispatch_timeout_secs);
    let mut interval = tokio::time::interval(tick);
    // A burst of missed ticks should collapse into one, not replay.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let run = tokio::spawn(process_due_campaigns(resources.clone(), state.clone()));
        match tokio::time::timeout(dispatch_timeout, run).await {
            Ok(Ok(summary)) => {
                if summary.processed > 0 {
                    tracing::info!(
                        name = "scheduler.tick.completed",
                        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                        processed = summary.processed,
                        message = "Dispatch tick completed"
                    );
                }
            }
            Ok(Err(e)) => {
                tracing::error!(
                    name = "scheduler.tick.panicked",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    message = "Dispatch run aborted"
                );
            }
            Err(_) => {
                tracing::warn!(
                    name = "scheduler.tick.timeout",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    timeout_secs = dispatch_timeout.as_secs(),
                    message = "Dispatch run still in progress; subsequent ticks will skip until it finishes"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_blocks_second_acquisition() {
        let state = DispatcherState::new();
        let guard = state.try_acquire();
        assert!(guard.is_some());
        assert!(state.is_active());
        assert!(state.try_acquire().is_none());
    }

    #[test]
    fn guard_releases_on_drop() {
        let state = DispatcherState::new();
        {
            let _guard = state.try_acquire().expect("first acquisition");
            assert!(state.try_acquire().is_none());
        }
        assert!(!state.is_active());
        assert!(state.try_acquire().is_some());
    }

    #[tokio::test]
    async fn concurrent_fires_are_noops_while_a_run_is_active() {
        let state = Arc::new(DispatcherState::new());
        let _guard = state.try_acquire().expect("first acquisition");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            handles.push(tokio::spawn(async move { state.try_acquire().is_some() }));
        }
        for handle in handles {
            assert!(!handle.await.expect("task completes"));
        }
    }
}
