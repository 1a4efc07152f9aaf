//! Campaign send pipeline.
//!
//! Turns a campaign plus its resolved audience into deduplicated
//! per-recipient sends. Idempotency rests on one mechanism only: the unique
//! (campaign_id, subscriber_id) constraint on the `sends` table. A pending
//! row is inserted before the transport call; losing an insert race means
//! another attempt already owns that recipient, and a transport failure
//! deletes the row so the recipient stays retryable.

pub mod content;
pub mod scheduler;
pub mod transport;

use std::collections::HashSet;

use futures::StreamExt;
use lettre::Message;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use sea_orm::{ActiveValue, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, SqlErr};
use time::OffsetDateTime;
use tokio::time::Duration;
use uuid::Uuid;

use crate::audience;
use crate::config::AppConfig;
use crate::counters;
use crate::entity::campaign::{self, CampaignStatus};
use crate::entity::subscriber::SubscriberStatus;
use crate::entity::{campaign_audience, send, subscriber};
use crate::error::{DispatchError, TransportError};
use crate::unsubscribe::UnsubscribeTokenCodec;
use transport::MailTransport;

/// Result of one dispatch attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages handed to the transport successfully this attempt.
    pub sent: usize,
    /// Recipients whose transport call failed; retryable next attempt.
    pub failed: usize,
    /// Recipients already covered by an earlier attempt's send row.
    pub skipped: usize,
    /// Size of the resolved recipient set at dispatch time.
    pub total_recipients: usize,
}

enum SendOutcome {
    Sent,
    Skipped,
    Failed,
}

/// Dispatch a campaign to its resolved audience.
///
/// Individual recipient failures are isolated; only a failure to resolve the
/// audience set at all (or to talk to the store) aborts the attempt. The
/// campaign row is finalized (`Sent`/`Failed`, `sent_at`,
/// `total_recipients`) before returning.
#[tracing::instrument(skip_all, fields(campaign_id = %campaign.id))]
pub async fn dispatch_campaign<C, T>(
    db: &C,
    config: &AppConfig,
    transport: &T,
    campaign: &campaign::Model,
) -> Result<DispatchReport, DispatchError>
where
    C: ConnectionTrait,
    T: MailTransport + ?Sized,
{
    let now = OffsetDateTime::now_utc();
    let recipients = resolve_recipients(db, campaign, now).await?;
    let codec = UnsubscribeTokenCodec::from_config(&config.unsubscribe);

    let attempted = recipients.len();
    let mut report = DispatchReport {
        total_recipients: attempted,
        ..DispatchReport::default()
    };

    let outcomes: Vec<SendOutcome> = futures::stream::iter(recipients)
        .map(|recipient| {
            let codec = &codec;
            async move { send_to_recipient(db, config, transport, campaign, &recipient, codec).await }
        })
        .buffer_unordered(config.dispatch.send_concurrency)
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            SendOutcome::Sent => report.sent += 1,
            SendOutcome::Skipped => report.skipped += 1,
            SendOutcome::Failed => report.failed += 1,
        }
    }

    let final_status = if attempted > 0 && report.failed == attempted {
        CampaignStatus::Failed
    } else {
        CampaignStatus::Sent
    };
    let finalize = campaign::ActiveModel {
        id: ActiveValue::Unchanged(campaign.id),
        status: ActiveValue::Set(final_status),
        sent_at: ActiveValue::Set(Some(OffsetDateTime::now_utc())),
        total_recipients: ActiveValue::Set(attempted as i32),
        updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        ..Default::default()
    };
    sea_orm::ActiveModelTrait::update(finalize, db).await?;

    tracing::info!(
        name = "dispatch.campaign.completed",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        campaign_id = %campaign.id,
        sent = report.sent,
        failed = report.failed,
        skipped = report.skipped,
        total_recipients = report.total_recipients,
        message = "Campaign dispatch completed"
    );

    Ok(report)
}

/// Resolve included audiences, subtract excluded ones, and load the active
/// subscriber rows for the remainder.
async fn resolve_recipients<C: ConnectionTrait>(
    db: &C,
    campaign: &campaign::Model,
    now: OffsetDateTime,
) -> Result<Vec<subscriber::Model>, DispatchError> {
    let targets = campaign_audience::Entity::find()
        .filter(campaign_audience::Column::CampaignId.eq(campaign.id))
        .all(db)
        .await?;

    let included: Vec<Uuid> = targets
        .iter()
        .filter(|t| !t.is_excluded)
        .map(|t| t.audience_id)
        .collect();
    let excluded: Vec<Uuid> = targets
        .iter()
        .filter(|t| t.is_excluded)
        .map(|t| t.audience_id)
        .collect();

    if included.is_empty() {
        return Err(DispatchError::NoAudiences(campaign.id));
    }

    let mut members: HashSet<Uuid> = HashSet::new();
    for audience_id in included {
        members.extend(audience::resolve_by_id(db, audience_id, now).await?);
    }
    // Exclusion overrides inclusion.
    for audience_id in excluded {
        for subscriber_id in audience::resolve_by_id(db, audience_id, now).await? {
            members.remove(&subscriber_id);
        }
    }

    if members.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = members.into_iter().collect();
    let subscribers = subscriber::Entity::find()
        .filter(subscriber::Column::Id.is_in(ids))
        .filter(subscriber::Column::Status.eq(SubscriberStatus::Active))
        .all(db)
        .await?;
    Ok(subscribers)
}

async fn send_to_recipient<C, T>(
    db: &C,
    config: &AppConfig,
    transport: &T,
    campaign: &campaign::Model,
    recipient: &subscriber::Model,
    codec: &UnsubscribeTokenCodec,
) -> SendOutcome
where
    C: ConnectionTrait,
    T: MailTransport + ?Sized,
{
    let send_id = Uuid::new_v4();

    // Claim the recipient. A unique-constraint violation is the signal that
    // a previous (or concurrent) attempt already sent to them.
    let pending = send::ActiveModel {
        id: ActiveValue::Set(send_id),
        campaign_id: ActiveValue::Set(campaign.id),
        subscriber_id: ActiveValue::Set(recipient.id),
        email: ActiveValue::Set(recipient.email.clone()),
        status: ActiveValue::Set(send::SendStatus::Pending),
        message_id: ActiveValue::Set(None),
        sent_at: ActiveValue::Set(None),
    };
    if let Err(e) = send::Entity::insert(pending).exec(db).await {
        if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
            tracing::debug!(
                name = "dispatch.recipient.already_sent",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                subscriber_id = %recipient.id,
                message = "Send row already exists; skipping recipient"
            );
            return SendOutcome::Skipped;
        }
        tracing::error!(
            name = "dispatch.recipient.claim_failed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            error = %e,
            subscriber_id = %recipient.id,
            message = "Failed to insert send row"
        );
        return SendOutcome::Failed;
    }

    let message = match build_message(config, campaign, recipient, send_id, codec) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(
                name = "dispatch.recipient.render_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                subscriber_id = %recipient.id,
                message = "Failed to build message"
            );
            release_recipient(db, campaign.id, send_id).await;
            return SendOutcome::Failed;
        }
    };

    let timeout = Duration::from_secs(config.dispatch.transport_timeout_secs);
    let result = match tokio::time::timeout(timeout, transport.send_message(message)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout)),
    };

    match result {
        Ok(receipt) => {
            let now = OffsetDateTime::now_utc();
            let update = send::ActiveModel {
                id: ActiveValue::Unchanged(send_id),
                status: ActiveValue::Set(send::SendStatus::Sent),
                message_id: ActiveValue::Set(receipt.message_id),
                sent_at: ActiveValue::Set(Some(now)),
                ..Default::default()
            };
            if let Err(e) = sea_orm::ActiveModelTrait::update(update, db).await {
                // The message is out; the pending row still blocks resends,
                // so this only loses the timestamp.
                tracing::warn!(
                    name = "dispatch.recipient.mark_sent_failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    send_id = %send_id,
                    message = "Failed to mark send row as sent"
                );
            }
            if let Err(e) = counters::emails_sent(db, campaign.id).await {
                warn_counter("emails_sent", campaign.id, &e);
            }
            if let Err(e) = counters::emails_delivered(db, campaign.id).await {
                warn_counter("emails_delivered", campaign.id, &e);
            }
            SendOutcome::Sent
        }
        Err(e) => {
            tracing::warn!(
                name = "dispatch.recipient.transport_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                subscriber_id = %recipient.id,
                message = "Transport rejected recipient; releasing for retry"
            );
            release_recipient(db, campaign.id, send_id).await;
            if let Err(e) = counters::emails_bounced(db, campaign.id).await {
                warn_counter("emails_bounced", campaign.id, &e);
            }
            SendOutcome::Failed
        }
    }
}

/// Delete a pending send row so the recipient is eligible on the next
/// dispatch attempt.
async fn release_recipient<C: ConnectionTrait>(db: &C, campaign_id: Uuid, send_id: Uuid) {
    if let Err(e) = send::Entity::delete_by_id(send_id).exec(db).await {
        tracing::error!(
            name = "dispatch.recipient.release_failed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            error = %e,
            campaign_id = %campaign_id,
            send_id = %send_id,
            message = "Failed to delete pending send row; recipient will not be retried"
        );
    }
}

fn warn_counter(counter: &str, campaign_id: Uuid, e: &sea_orm::DbErr) {
    tracing::warn!(
        name = "dispatch.counter_failed",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        error = %e,
        counter = counter,
        campaign_id = %campaign_id,
        message = "Failed to increment campaign counter"
    );
}

fn build_message(
    config: &AppConfig,
    campaign: &campaign::Model,
    recipient: &subscriber::Model,
    send_id: Uuid,
    codec: &UnsubscribeTokenCodec,
) -> Result<Message, TransportError> {
    // Fall back to the configured sender when the campaign's own sender
    // does not parse as a mailbox.
    let from: Mailbox = format!("{} <{}>", campaign.sender_name, campaign.sender_email)
        .parse()
        .or_else(|_| config.smtp.from.parse())
        .map_err(|e| TransportError::InvalidAddress(format!("sender: {e}")))?;
    let to: Mailbox = recipient
        .email
        .parse()
        .map_err(|e| TransportError::InvalidAddress(format!("recipient: {e}")))?;

    let unsubscribe_url = codec.unsubscribe_url(&recipient.email, &config.site_url);
    let html_body = content::instrument_html(
        &campaign.html_content,
        &config.site_url,
        campaign.id,
        recipient.id,
        send_id,
        &unsubscribe_url,
    );
    let text_body = format!(
        "{}\n\n---\nUnsubscribe: {unsubscribe_url}",
        campaign
            .text_content
            .as_deref()
            .unwrap_or(campaign.subject.as_str())
    );

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(campaign.subject.clone())
        .header(lettre::message::header::MIME_VERSION_1_0)
        .header(UnsubscribeHeader::from(unsubscribe_url))
        .message_id(None);
    if let Some(reply_to) = &campaign.reply_to_email {
        let reply_to: Mailbox = reply_to
            .parse()
            .map_err(|e| TransportError::InvalidAddress(format!("reply-to: {e}")))?;
        builder = builder.reply_to(reply_to);
    }

    builder
        .multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(text_body),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html_body),
                ),
        )
        .map_err(|e| TransportError::Rejected(format!("message assembly: {e}")))
}

/// Custom List-Unsubscribe header for outbound messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeHeader(String);

impl Header for UnsubscribeHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn core::error::Error + Send + Sync>> {
        Ok(Self(s.into()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

impl From<String> for UnsubscribeHeader {
    fn from(content: String) -> Self {
        Self(content)
    }
}

impl AsRef<str> for UnsubscribeHeader {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
