//! Audience resolution: audience definition -> concrete subscriber id set.
//!
//! Static audiences read the externally maintained membership table; dynamic
//! audiences evaluate their rules against a snapshot of subscribers and
//! profiles. Resolution is pure given that snapshot; re-running it only
//! changes the result if the underlying data changed.

pub mod rules;

use std::collections::{HashMap, HashSet};

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entity::{audience, audience_subscriber, profile, subscriber};
use crate::error::ResolveError;
use rules::{AudienceFilter, Rule};

/// Resolve an audience to its member subscriber ids as of `now`.
#[tracing::instrument(skip(db, audience), fields(audience_id = %audience.id))]
pub async fn resolve<C: ConnectionTrait>(
    db: &C,
    audience: &audience::Model,
    now: OffsetDateTime,
) -> Result<HashSet<Uuid>, ResolveError> {
    match AudienceFilter::from_json(&audience.filters) {
        AudienceFilter::Static => resolve_static(db, audience.id).await,
        AudienceFilter::Dynamic { rules } => {
            let rules: Vec<Rule> = rules.iter().map(Rule::parse).collect();
            resolve_dynamic(db, &rules, now).await
        }
    }
}

/// Load an audience by id and resolve it.
#[tracing::instrument(skip(db))]
pub async fn resolve_by_id<C: ConnectionTrait>(
    db: &C,
    audience_id: Uuid,
    now: OffsetDateTime,
) -> Result<HashSet<Uuid>, ResolveError> {
    let audience = audience::Entity::find_by_id(audience_id)
        .one(db)
        .await?
        .ok_or(ResolveError::AudienceNotFound(audience_id))?;
    resolve(db, &audience, now).await
}

async fn resolve_static<C: ConnectionTrait>(
    db: &C,
    audience_id: Uuid,
) -> Result<HashSet<Uuid>, ResolveError> {
    let members = audience_subscriber::Entity::find()
        .filter(audience_subscriber::Column::AudienceId.eq(audience_id))
        .all(db)
        .await?;
    Ok(members.into_iter().map(|m| m.subscriber_id).collect())
}

async fn resolve_dynamic<C: ConnectionTrait>(
    db: &C,
    rules: &[Rule],
    now: OffsetDateTime,
) -> Result<HashSet<Uuid>, ResolveError> {
    // No rules resolves to nobody, never to "everyone".
    if rules.is_empty() {
        return Ok(HashSet::new());
    }

    let subscribers = subscriber::Entity::find().all(db).await?;
    let profiles: HashMap<Uuid, profile::Model> = profile::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.user_id, p))
        .collect();

    Ok(subscribers
        .iter()
        .filter(|s| {
            let profile = s.user_id.as_ref().and_then(|id| profiles.get(id));
            rules::is_member(rules, s, profile, now)
        })
        .map(|s| s.id)
        .collect())
}
