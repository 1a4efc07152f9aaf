//! Per-recipient content instrumentation.
//!
//! Before a campaign body leaves the pipeline, every outbound link is
//! rewritten through the click-redirect endpoint, an open-tracking pixel is
//! injected, and an unsubscribe footer is appended. All three embed the
//! (campaign, subscriber, send) triple so tracking hits resolve back to one
//! delivered message.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use uuid::Uuid;

static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href=["']([^"']+)["']"#).expect("href regex compiles"));

pub fn open_pixel_url(site_url: &str, campaign_id: Uuid, subscriber_id: Uuid, send_id: Uuid) -> String {
    format!("{site_url}/track/open?c={campaign_id}&u={subscriber_id}&s={send_id}")
}

pub fn click_tracking_url(
    site_url: &str,
    campaign_id: Uuid,
    subscriber_id: Uuid,
    send_id: Uuid,
    target_url: &str,
) -> String {
    format!(
        "{site_url}/track/click?c={campaign_id}&u={subscriber_id}&s={send_id}&url={}",
        urlencoding::encode(target_url)
    )
}

/// Rewrite every trackable `href` through the click-redirect endpoint.
///
/// Anchors, `mailto:`/`tel:` links, unsubscribe links and already-rewritten
/// URLs pass through untouched.
pub fn rewrite_links(
    html: &str,
    site_url: &str,
    campaign_id: Uuid,
    subscriber_id: Uuid,
    send_id: Uuid,
) -> String {
    HREF_RE
        .replace_all(html, |caps: &Captures| {
            let url = &caps[1];
            if url.starts_with('#')
                || url.starts_with("mailto:")
                || url.starts_with("tel:")
                || url.contains("/track/click")
                || url.contains("unsubscribe")
            {
                return caps[0].to_string();
            }
            format!(
                r#"href="{}""#,
                click_tracking_url(site_url, campaign_id, subscriber_id, send_id, url)
            )
        })
        .into_owned()
}

/// Inject the 1x1 open-tracking pixel, preferably just before `</body>`.
pub fn inject_open_pixel(
    html: &str,
    site_url: &str,
    campaign_id: Uuid,
    subscriber_id: Uuid,
    send_id: Uuid,
) -> String {
    let pixel_url = open_pixel_url(site_url, campaign_id, subscriber_id, send_id);
    let pixel = format!(
        r#"<img src="{pixel_url}" width="1" height="1" style="display:block;border:0;margin:0;padding:0;" alt="" />"#
    );
    if let Some(idx) = html.rfind("</body>") {
        let mut out = String::with_capacity(html.len() + pixel.len());
        out.push_str(&html[..idx]);
        out.push_str(&pixel);
        out.push_str(&html[idx..]);
        out
    } else {
        format!("{html}{pixel}")
    }
}

/// Unsubscribe footer appended to the HTML body.
pub fn unsubscribe_footer_html(unsubscribe_url: &str) -> String {
    format!(
        r#"<div style="margin-top:30px;padding-top:20px;border-top:1px solid #e9ecef;text-align:center;font-size:12px;color:#666666;"><p><a href="{unsubscribe_url}">Unsubscribe</a></p></div>"#
    )
}

/// Full instrumentation pass: link rewriting, unsubscribe footer, pixel.
pub fn instrument_html(
    html: &str,
    site_url: &str,
    campaign_id: Uuid,
    subscriber_id: Uuid,
    send_id: Uuid,
    unsubscribe_url: &str,
) -> String {
    let rewritten = rewrite_links(html, site_url, campaign_id, subscriber_id, send_id);
    let with_footer = match rewritten.rfind("</body>") {
        Some(idx) => {
            let footer = unsubscribe_footer_html(unsubscribe_url);
            let mut out = String::with_capacity(rewritten.len() + footer.len());
            out.push_str(&rewritten[..idx]);
            out.push_str(&footer);
            out.push_str(&rewritten[idx..]);
            out
        }
        None => format!("{rewritten}{}", unsubscribe_footer_html(unsubscribe_url)),
    };
    inject_open_pixel(&with_footer, site_url, campaign_id, subscriber_id, send_id)
}
