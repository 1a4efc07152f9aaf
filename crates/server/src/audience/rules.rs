//! Audience filter parsing and rule evaluation.
//!
//! The stored `filters` JSON is a tagged union: `{"audience_type":"static"}`
//! audiences take their membership from the join table, while
//! `{"audience_type":"dynamic","rules":[...]}` audiences are evaluated
//! against subscriber and profile attributes. Every rule must match (AND);
//! there is no OR/NOT. An audience with no rules has no members: absence of
//! rules fails closed rather than meaning "everyone".

use serde::Deserialize;
use time::OffsetDateTime;

use crate::entity::{profile, subscriber};
use crate::entity::subscriber::SubscriberStatus;

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "audience_type", rename_all = "snake_case")]
pub enum AudienceFilter {
    Static,
    Dynamic {
        #[serde(default)]
        rules: Vec<RawRule>,
    },
}

impl AudienceFilter {
    /// Parse the stored filter JSON. Anything unparseable (missing tag,
    /// wrong shape) degrades to a dynamic filter with no rules, which
    /// resolves to an empty membership.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!(
                    name = "audience.filters.unparseable",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    message = "Audience filters did not parse; treating as empty dynamic audience"
                );
                AudienceFilter::Dynamic { rules: Vec::new() }
            }
        }
    }
}

/// A rule as stored: `{"field": "...", "operator": "...", "value": ...}`.
/// Extra keys (e.g. legacy `timeframe`) are ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct RawRule {
    pub field: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

fn default_operator() -> String {
    "equals".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmailOp {
    Equals,
    Contains,
}

/// Typed rule, evaluated by exhaustive match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rule {
    /// Subscriber status equality.
    Status { value: String },
    /// Subscription tier equality, looked up from the linked profile.
    Subscription { value: String },
    /// Email address match.
    Email { op: EmailOp, value: String },
    /// Trial state derived from the profile's trial expiry.
    Trial { active: bool },
    /// Unrecognized field, operator or value shape. Matches nothing so a
    /// malformed rule empties the audience instead of widening it.
    NonMatching,
}

impl Rule {
    pub fn parse(raw: &RawRule) -> Rule {
        let Some(value) = raw.value.as_str() else {
            return Self::unrecognized(raw, "non-string value");
        };
        match (raw.field.as_str(), raw.operator.as_str()) {
            ("status", "equals") => Rule::Status {
                value: value.to_string(),
            },
            ("subscription", "equals") => Rule::Subscription {
                value: value.to_string(),
            },
            ("email", "equals") => Rule::Email {
                op: EmailOp::Equals,
                value: value.to_lowercase(),
            },
            ("email", "contains") => Rule::Email {
                op: EmailOp::Contains,
                value: value.to_lowercase(),
            },
            ("trial", "equals") if value == "active" => Rule::Trial { active: true },
            ("trial", "equals") if value == "expired" => Rule::Trial { active: false },
            _ => Self::unrecognized(raw, "unknown field/operator"),
        }
    }

    fn unrecognized(raw: &RawRule, reason: &str) -> Rule {
        tracing::warn!(
            name = "audience.rule.unrecognized",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            field = %raw.field,
            operator = %raw.operator,
            reason = reason,
            message = "Unrecognized audience rule; treating as non-matching"
        );
        Rule::NonMatching
    }

    pub fn matches(
        &self,
        subscriber: &subscriber::Model,
        profile: Option<&profile::Model>,
        now: OffsetDateTime,
    ) -> bool {
        match self {
            Rule::Status { value } => status_str(&subscriber.status) == value,
            Rule::Subscription { value } => profile
                .and_then(|p| p.subscription.as_deref())
                .is_some_and(|tier| tier == value),
            Rule::Email { op, value } => {
                let email = subscriber.email.to_lowercase();
                match op {
                    EmailOp::Equals => email == *value,
                    EmailOp::Contains => email.contains(value.as_str()),
                }
            }
            Rule::Trial { active } => {
                let expiry = profile.and_then(|p| p.trial_expiration);
                match (active, expiry) {
                    (true, Some(expiry)) => expiry > now,
                    (false, Some(expiry)) => expiry <= now,
                    (_, None) => false,
                }
            }
            Rule::NonMatching => false,
        }
    }
}

fn status_str(status: &SubscriberStatus) -> &'static str {
    match status {
        SubscriberStatus::Active => "active",
        SubscriberStatus::Inactive => "inactive",
        SubscriberStatus::Unsubscribed => "unsubscribed",
    }
}

/// AND-combined membership check. No rules means no members.
pub fn is_member(
    rules: &[Rule],
    subscriber: &subscriber::Model,
    profile: Option<&profile::Model>,
    now: OffsetDateTime,
) -> bool {
    !rules.is_empty() && rules.iter().all(|r| r.matches(subscriber, profile, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use uuid::Uuid;

    fn subscriber(email: &str, status: SubscriberStatus) -> subscriber::Model {
        subscriber::Model {
            id: Uuid::new_v4(),
            email: email.to_string(),
            status,
            user_id: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn profile(subscription: Option<&str>, trial_expiration: Option<OffsetDateTime>) -> profile::Model {
        profile::Model {
            user_id: Uuid::new_v4(),
            subscription: subscription.map(str::to_string),
            trial_expiration,
        }
    }

    fn raw(field: &str, operator: &str, value: &str) -> RawRule {
        RawRule {
            field: field.into(),
            operator: operator.into(),
            value: serde_json::Value::String(value.into()),
        }
    }

    #[test]
    fn status_rule_matches_on_equality() {
        let rule = Rule::parse(&raw("status", "equals", "active"));
        let now = OffsetDateTime::now_utc();
        assert!(rule.matches(&subscriber("a@b.c", SubscriberStatus::Active), None, now));
        assert!(!rule.matches(&subscriber("a@b.c", SubscriberStatus::Inactive), None, now));
    }

    #[test]
    fn subscription_rule_requires_profile() {
        let rule = Rule::parse(&raw("subscription", "equals", "pro"));
        let now = OffsetDateTime::now_utc();
        let sub = subscriber("a@b.c", SubscriberStatus::Active);
        assert!(!rule.matches(&sub, None, now));
        assert!(rule.matches(&sub, Some(&profile(Some("pro"), None)), now));
        assert!(!rule.matches(&sub, Some(&profile(Some("basic"), None)), now));
        assert!(!rule.matches(&sub, Some(&profile(None, None)), now));
    }

    #[test]
    fn email_rules_are_case_insensitive() {
        let now = OffsetDateTime::now_utc();
        let eq = Rule::parse(&raw("email", "equals", "User@Example.COM"));
        assert!(eq.matches(&subscriber("user@example.com", SubscriberStatus::Active), None, now));

        let contains = Rule::parse(&raw("email", "contains", "@example."));
        assert!(contains.matches(&subscriber("x@EXAMPLE.com", SubscriberStatus::Active), None, now));
        assert!(!contains.matches(&subscriber("x@other.org", SubscriberStatus::Active), None, now));
    }

    #[test]
    fn trial_rule_compares_against_as_of_time() {
        let now = OffsetDateTime::now_utc();
        let active = Rule::parse(&raw("trial", "equals", "active"));
        let sub = subscriber("a@b.c", SubscriberStatus::Active);
        let running = profile(Some("none"), Some(now + Duration::days(3)));
        let lapsed = profile(Some("none"), Some(now - Duration::days(3)));
        assert!(active.matches(&sub, Some(&running), now));
        assert!(!active.matches(&sub, Some(&lapsed), now));

        let expired = Rule::parse(&raw("trial", "equals", "expired"));
        assert!(expired.matches(&sub, Some(&lapsed), now));
        assert!(!expired.matches(&sub, Some(&running), now));
        assert!(!expired.matches(&sub, None, now));
    }

    #[test]
    fn unknown_field_fails_closed() {
        let rule = Rule::parse(&raw("shoe_size", "equals", "44"));
        assert_eq!(rule, Rule::NonMatching);
        let now = OffsetDateTime::now_utc();
        assert!(!rule.matches(&subscriber("a@b.c", SubscriberStatus::Active), None, now));
    }

    #[test]
    fn unknown_operator_fails_closed() {
        assert_eq!(Rule::parse(&raw("status", "regex", "act.*")), Rule::NonMatching);
    }

    #[test]
    fn non_string_value_fails_closed() {
        let rule = Rule::parse(&RawRule {
            field: "status".into(),
            operator: "equals".into(),
            value: serde_json::json!(["active"]),
        });
        assert_eq!(rule, Rule::NonMatching);
    }

    #[test]
    fn no_rules_means_no_members() {
        let now = OffsetDateTime::now_utc();
        assert!(!is_member(&[], &subscriber("a@b.c", SubscriberStatus::Active), None, now));
    }

    #[test]
    fn rules_are_and_combined() {
        let now = OffsetDateTime::now_utc();
        let rules = vec![
            Rule::parse(&raw("status", "equals", "active")),
            Rule::parse(&raw("email", "contains", "@example.com")),
        ];
        assert!(is_member(&rules, &subscriber("a@example.com", SubscriberStatus::Active), None, now));
        assert!(!is_member(&rules, &subscriber("a@other.org", SubscriberStatus::Active), None, now));
        assert!(!is_member(&rules, &subscriber("a@example.com", SubscriberStatus::Inactive), None, now));
    }

    #[test]
    fn one_non_matching_rule_empties_the_audience() {
        let now = OffsetDateTime::now_utc();
        let rules = vec![
            Rule::parse(&raw("status", "equals", "active")),
            Rule::NonMatching,
        ];
        assert!(!is_member(&rules, &subscriber("a@example.com", SubscriberStatus::Active), None, now));
    }

    #[test]
    fn filter_json_parses_both_variants() {
        let s = AudienceFilter::from_json(&serde_json::json!({"audience_type": "static"}));
        assert!(matches!(s, AudienceFilter::Static));

        let d = AudienceFilter::from_json(&serde_json::json!({
            "audience_type": "dynamic",
            "rules": [{"field": "status", "operator": "equals", "value": "active"}]
        }));
        match d {
            AudienceFilter::Dynamic { rules } => assert_eq!(rules.len(), 1),
            _ => panic!("expected dynamic"),
        }
    }

    #[test]
    fn malformed_filter_json_degrades_to_empty_dynamic() {
        let f = AudienceFilter::from_json(&serde_json::json!({"audience_type": "everyone"}));
        match f {
            AudienceFilter::Dynamic { rules } => assert!(rules.is_empty()),
            _ => panic!("expected dynamic fallback"),
        }
    }
}
