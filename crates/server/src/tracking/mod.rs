//! Engagement tracking ingestion.
//!
//! Open-pixel and click-redirect hits arrive from mail clients, image
//! proxies and security scanners, none of which this system controls.
//! Recording therefore never fails outward: every internal problem collapses
//! into an [`IngestOutcome`] that the HTTP layer logs while still serving
//! the canonical pixel or redirect.

pub mod bots;

use sea_orm::{ActiveValue, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::TrackingConfig;
use crate::counters;
use crate::entity::{click_event, open_event, send};

/// What happened to a tracking hit. Only `Recorded` moved a counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Event stored and campaign counter incremented.
    Recorded,
    /// Valid hit, but inside the dedup policy; counter untouched.
    Duplicate,
    /// Automated agent; nothing recorded.
    Bot,
    /// Missing/malformed identifiers or no matching send row.
    Invalid,
    /// Storage failed; absorbed.
    Error,
}

/// Raw, untrusted parameters of a tracking hit.
#[derive(Clone, Debug, Default)]
pub struct TrackingHit {
    pub campaign_id: Option<String>,
    pub subscriber_id: Option<String>,
    pub send_id: Option<String>,
    pub user_agent: String,
    pub ip_address: String,
}

struct ValidIds {
    campaign_id: Uuid,
    subscriber_id: Uuid,
    send_id: Uuid,
}

fn parse_ids(hit: &TrackingHit) -> Option<ValidIds> {
    Some(ValidIds {
        campaign_id: Uuid::parse_str(hit.campaign_id.as_deref()?).ok()?,
        subscriber_id: Uuid::parse_str(hit.subscriber_id.as_deref()?).ok()?,
        send_id: Uuid::parse_str(hit.send_id.as_deref()?).ok()?,
    })
}

async fn send_exists<C: ConnectionTrait>(db: &C, send_id: Uuid) -> Result<bool, sea_orm::DbErr> {
    Ok(send::Entity::find_by_id(send_id).one(db).await?.is_some())
}

/// Record an open-pixel hit.
#[tracing::instrument(skip(db, config, hit), fields(ua_len = hit.user_agent.len()))]
pub async fn record_open<C: ConnectionTrait>(
    db: &C,
    config: &TrackingConfig,
    hit: &TrackingHit,
) -> IngestOutcome {
    let Some(ids) = parse_ids(hit) else {
        return IngestOutcome::Invalid;
    };

    if bots::is_automated_agent(&hit.user_agent, &config.extra_bot_user_agents) {
        tracing::debug!(
            name = "tracking.open.bot",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            send_id = %ids.send_id,
            message = "Open hit classified as automated; not recorded"
        );
        return IngestOutcome::Bot;
    }

    match send_exists(db, ids.send_id).await {
        Ok(true) => {}
        Ok(false) => return IngestOutcome::Invalid,
        Err(e) => {
            warn_storage("tracking.open.send_lookup_failed", ids.send_id, &e);
            return IngestOutcome::Error;
        }
    }

    let now = OffsetDateTime::now_utc();
    let window_start = now - Duration::seconds(config.open_dedup_window_secs as i64);

    // Image-proxying providers re-fetch the pixel on every render; a repeat
    // open inside the window is the same open, not a new one.
    let recent = open_event::Entity::find()
        .filter(open_event::Column::SendId.eq(ids.send_id))
        .filter(open_event::Column::OpenedAt.gt(window_start))
        .one(db)
        .await;
    match recent {
        Ok(Some(_)) => return IngestOutcome::Duplicate,
        Ok(None) => {}
        Err(e) => {
            warn_storage("tracking.open.dedup_lookup_failed", ids.send_id, &e);
            return IngestOutcome::Error;
        }
    }

    let event = open_event::ActiveModel {
        id: ActiveValue::NotSet,
        send_id: ActiveValue::Set(ids.send_id),
        campaign_id: ActiveValue::Set(ids.campaign_id),
        subscriber_id: ActiveValue::Set(ids.subscriber_id),
        ip_address: ActiveValue::Set(hit.ip_address.clone()),
        user_agent: ActiveValue::Set(hit.user_agent.clone()),
        opened_at: ActiveValue::Set(now),
    };
    if let Err(e) = open_event::Entity::insert(event).exec(db).await {
        warn_storage("tracking.open.insert_failed", ids.send_id, &e);
        return IngestOutcome::Error;
    }

    if let Err(e) = counters::emails_opened(db, ids.campaign_id).await {
        warn_storage("tracking.open.counter_failed", ids.send_id, &e);
        return IngestOutcome::Error;
    }

    IngestOutcome::Recorded
}

/// Record a click-redirect hit. The caller redirects regardless of the
/// returned outcome.
#[tracing::instrument(skip(db, config, hit, url), fields(ua_len = hit.user_agent.len()))]
pub async fn record_click<C: ConnectionTrait>(
    db: &C,
    config: &TrackingConfig,
    hit: &TrackingHit,
    url: &str,
) -> IngestOutcome {
    let Some(ids) = parse_ids(hit) else {
        return IngestOutcome::Invalid;
    };

    if bots::is_automated_agent(&hit.user_agent, &config.extra_bot_user_agents) {
        tracing::debug!(
            name = "tracking.click.bot",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            send_id = %ids.send_id,
            message = "Click hit classified as automated; not recorded"
        );
        return IngestOutcome::Bot;
    }

    match send_exists(db, ids.send_id).await {
        Ok(true) => {}
        Ok(false) => return IngestOutcome::Invalid,
        Err(e) => {
            warn_storage("tracking.click.send_lookup_failed", ids.send_id, &e);
            return IngestOutcome::Error;
        }
    }

    // The counter tracks unique (send, url) pairs; repeat clicks still land
    // in the event log.
    let first_click = click_event::Entity::find()
        .filter(click_event::Column::SendId.eq(ids.send_id))
        .filter(click_event::Column::Url.eq(url))
        .one(db)
        .await;
    let is_first = match first_click {
        Ok(existing) => existing.is_none(),
        Err(e) => {
            warn_storage("tracking.click.dedup_lookup_failed", ids.send_id, &e);
            return IngestOutcome::Error;
        }
    };

    let event = click_event::ActiveModel {
        id: ActiveValue::NotSet,
        send_id: ActiveValue::Set(ids.send_id),
        campaign_id: ActiveValue::Set(ids.campaign_id),
        subscriber_id: ActiveValue::Set(ids.subscriber_id),
        url: ActiveValue::Set(url.to_string()),
        ip_address: ActiveValue::Set(hit.ip_address.clone()),
        user_agent: ActiveValue::Set(hit.user_agent.clone()),
        clicked_at: ActiveValue::Set(OffsetDateTime::now_utc()),
    };
    if let Err(e) = click_event::Entity::insert(event).exec(db).await {
        warn_storage("tracking.click.insert_failed", ids.send_id, &e);
        return IngestOutcome::Error;
    }

    if !is_first {
        return IngestOutcome::Duplicate;
    }

    if let Err(e) = counters::emails_clicked(db, ids.campaign_id).await {
        warn_storage("tracking.click.counter_failed", ids.send_id, &e);
        return IngestOutcome::Error;
    }

    IngestOutcome::Recorded
}

fn warn_storage(event_name: &str, send_id: Uuid, e: &sea_orm::DbErr) {
    tracing::warn!(
        name = event_name,
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        error = %e,
        send_id = %send_id,
        message = "Tracking storage operation failed; hit absorbed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(c: &str, u: &str, s: &str) -> TrackingHit {
        TrackingHit {
            campaign_id: Some(c.into()),
            subscriber_id: Some(u.into()),
            send_id: Some(s.into()),
            user_agent: "Mozilla/5.0".into(),
            ip_address: "203.0.113.9".into(),
        }
    }

    #[test]
    fn parse_ids_accepts_uuids() {
        let a = Uuid::new_v4().to_string();
        let b = Uuid::new_v4().to_string();
        let c = Uuid::new_v4().to_string();
        assert!(parse_ids(&hit(&a, &b, &c)).is_some());
    }

    #[test]
    fn parse_ids_rejects_missing_or_malformed() {
        let valid = Uuid::new_v4().to_string();
        assert!(parse_ids(&hit("not-a-uuid", &valid, &valid)).is_none());
        assert!(parse_ids(&hit(&valid, &valid, "42")).is_none());
        let mut partial = hit(&valid, &valid, &valid);
        partial.subscriber_id = None;
        assert!(parse_ids(&partial).is_none());
    }
}
