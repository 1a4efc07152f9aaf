//! Self-contained signed unsubscribe tokens.
//!
//! A token is `base64url(email|timestamp_ms|nonce.signature)` where the
//! signature is the hex HMAC-SHA256 of the payload. Verification is pure
//! recomputation; no token state is persisted. Rotating the secret
//! invalidates every outstanding token at once, which is the intended
//! operational lever.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::config::UnsubscribeConfig;

type HmacSha256 = Hmac<Sha256>;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Default token validity window.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;

/// Stateless codec for unsubscribe link tokens.
#[derive(Clone)]
pub struct UnsubscribeTokenCodec {
    secret: String,
    max_age_days: i64,
}

impl UnsubscribeTokenCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }

    pub fn from_config(config: &UnsubscribeConfig) -> Self {
        Self::new(config.token_secret.clone()).with_max_age(config.token_max_age_days)
    }

    pub fn with_max_age(mut self, max_age_days: i64) -> Self {
        self.max_age_days = max_age_days;
        self
    }

    /// Generate a signed token for `email`, valid from now.
    pub fn generate(&self, email: &str) -> String {
        let timestamp_ms = now_unix_ms();
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.generate_at(email, timestamp_ms, &hex::encode(nonce))
    }

    fn generate_at(&self, email: &str, timestamp_ms: i64, nonce: &str) -> String {
        let payload = format!("{}|{}|{}", email.to_lowercase(), timestamp_ms, nonce);
        let signature = self.sign(&payload);
        URL_SAFE_NO_PAD.encode(format!("{payload}.{signature}"))
    }

    /// Verify a token and extract the email it was issued for.
    ///
    /// Returns `None` for anything that is not a well-formed, correctly
    /// signed token younger than the configured max age. That includes
    /// tokens with a timestamp in the future, which only forgery or severe
    /// clock skew produces.
    pub fn verify(&self, token: &str) -> Option<String> {
        let decoded = URL_SAFE_NO_PAD.decode(token).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;

        // The signature is hex and cannot contain '.', so the last '.'
        // separates payload from signature even if an email contained one.
        let (payload, signature) = decoded.rsplit_once('.')?;
        let signature = hex::decode(signature).ok()?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(payload.as_bytes());
        // Constant-time comparison.
        mac.verify_slice(&signature).ok()?;

        let mut parts = payload.splitn(3, '|');
        let email = parts.next().filter(|e| !e.is_empty())?;
        let timestamp_ms: i64 = parts.next()?.parse().ok()?;

        let age_ms = now_unix_ms() - timestamp_ms;
        if age_ms > self.max_age_days.checked_mul(MILLIS_PER_DAY)? {
            return None;
        }
        if age_ms < 0 {
            return None;
        }

        Some(email.to_lowercase())
    }

    /// Full unsubscribe URL for `email`, as embedded in outbound messages.
    pub fn unsubscribe_url(&self, email: &str, site_url: &str) -> String {
        let token = self.generate(email);
        format!(
            "{site_url}/unsubscribe?email={}&token={token}",
            urlencoding::encode(email)
        )
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn now_unix_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn codec() -> UnsubscribeTokenCodec {
        UnsubscribeTokenCodec::new(SECRET)
    }

    #[test]
    fn round_trip_returns_lowercased_email() {
        let codec = codec();
        let token = codec.generate("User@Example.COM");
        assert_eq!(codec.verify(&token), Some("user@example.com".into()));
    }

    #[test]
    fn tampered_signature_is_invalid() {
        let codec = codec();
        let token = codec.generate("user@example.com");
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        let (payload, signature) = decoded.rsplit_once('.').unwrap();
        // Flip one hex digit of the signature.
        let mut sig: Vec<char> = signature.chars().collect();
        sig[0] = if sig[0] == '0' { '1' } else { '0' };
        let tampered =
            URL_SAFE_NO_PAD.encode(format!("{payload}.{}", sig.into_iter().collect::<String>()));
        assert_eq!(codec.verify(&tampered), None);
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let codec = codec();
        let token = codec.generate("user@example.com");
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        let swapped = decoded.replacen("user@", "eve@", 1);
        let tampered = URL_SAFE_NO_PAD.encode(swapped);
        assert_eq!(codec.verify(&tampered), None);
    }

    #[test]
    fn expired_token_is_invalid() {
        let codec = codec();
        let thirty_one_days_ago = now_unix_ms() - 31 * MILLIS_PER_DAY;
        let token = codec.generate_at("user@example.com", thirty_one_days_ago, "00ff00ff");
        assert_eq!(codec.verify(&token), None);
        // The same stale token is still fine under a wider policy.
        let lenient = UnsubscribeTokenCodec::new(SECRET).with_max_age(60);
        assert!(lenient.verify(&token).is_some());
    }

    #[test]
    fn future_timestamp_is_invalid() {
        let codec = codec();
        let in_one_hour = now_unix_ms() + 60 * 60 * 1000;
        let token = codec.generate_at("user@example.com", in_one_hour, "00ff00ff");
        assert_eq!(codec.verify(&token), None);
    }

    #[test]
    fn garbage_tokens_are_invalid() {
        let codec = codec();
        assert_eq!(codec.verify(""), None);
        assert_eq!(codec.verify("not-base64url!!!"), None);
        assert_eq!(codec.verify(&URL_SAFE_NO_PAD.encode("no-separator")), None);
        assert_eq!(codec.verify(&URL_SAFE_NO_PAD.encode("payload.nothex")), None);
    }

    #[test]
    fn different_secret_rejects() {
        let token = codec().generate("user@example.com");
        let other = UnsubscribeTokenCodec::new("ffffffffffffffffffffffffffffffff");
        assert_eq!(other.verify(&token), None);
    }

    #[test]
    fn unsubscribe_url_embeds_encoded_email_and_token() {
        let codec = codec();
        let url = codec.unsubscribe_url("user+tag@example.com", "https://mail.example.org");
        assert!(url.starts_with(
            "https://mail.example.org/unsubscribe?email=user%2Btag%40example.com&token="
        ));
        let token = url.rsplit_once("token=").unwrap().1;
        assert_eq!(codec.verify(token), Some("user+tag@example.com".into()));
    }
}
