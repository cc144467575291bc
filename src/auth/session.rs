//! Stateless panel sessions.
//!
//! Grants are carried in an HMAC-signed cookie value rather than a server
//! side session store: `base64(payload).base64(tag)` where the payload is
//! the granted role names plus an issue timestamp. Tampering breaks the
//! tag; a stale cookie simply decodes to no grants.

use crate::auth::roles::{Role, RoleSet};
use crate::auth::resolver::SessionGrants;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::hmac;
use tracing::debug;

/// Sessions older than this decode to no grants.
const SESSION_MAX_AGE_SECS: i64 = 12 * 60 * 60;

/// Signs and verifies session cookie values.
pub struct SessionCodec {
    key: hmac::Key,
}

impl SessionCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
        }
    }

    /// Encode grants into a signed cookie value.
    pub fn encode(&self, grants: SessionGrants, now: i64) -> String {
        let roles: Vec<&str> = grants.0.iter().map(|r| r.name()).collect();
        let payload = format!("{}|{}", roles.join(","), now);
        let tag = hmac::sign(&self.key, payload.as_bytes());
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(tag.as_ref())
        )
    }

    /// Decode a cookie value; anything invalid yields no grants.
    pub fn decode(&self, value: &str, now: i64) -> SessionGrants {
        let Some(grants) = self.try_decode(value, now) else {
            debug!("session cookie rejected");
            return SessionGrants::none();
        };
        grants
    }

    fn try_decode(&self, value: &str, now: i64) -> Option<SessionGrants> {
        let (payload_b64, tag_b64) = value.split_once('.')?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let tag = URL_SAFE_NO_PAD.decode(tag_b64).ok()?;
        hmac::verify(&self.key, &payload, &tag).ok()?;

        let payload = String::from_utf8(payload).ok()?;
        let (roles_csv, issued_at) = payload.split_once('|')?;
        let issued_at: i64 = issued_at.parse().ok()?;
        if now - issued_at > SESSION_MAX_AGE_SECS || issued_at > now {
            return None;
        }

        let roles: RoleSet = roles_csv
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(Role::parse)
            .collect();
        Some(SessionGrants(roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let codec = SessionCodec::new("secret");
        let grants = SessionGrants::of(&[Role::Admin, Role::Tts]);
        let cookie = codec.encode(grants, 1_000_000);
        let decoded = codec.decode(&cookie, 1_000_100);
        assert!(decoded.0.contains(Role::Admin));
        assert!(decoded.0.contains(Role::Tts));
        assert!(!decoded.0.contains(Role::Pull));
    }

    #[test]
    fn test_tamper_yields_no_grants() {
        let codec = SessionCodec::new("secret");
        let cookie = codec.encode(SessionGrants::of(&[Role::Admin]), 1_000_000);
        let mut forged = cookie.clone();
        forged.replace_range(0..1, if cookie.starts_with('A') { "B" } else { "A" });
        assert!(codec.decode(&forged, 1_000_100).0.is_empty());
    }

    #[test]
    fn test_wrong_key_yields_no_grants() {
        let a = SessionCodec::new("secret-a");
        let b = SessionCodec::new("secret-b");
        let cookie = a.encode(SessionGrants::of(&[Role::Admin]), 1_000_000);
        assert!(b.decode(&cookie, 1_000_100).0.is_empty());
    }

    #[test]
    fn test_expiry_and_future_rejected() {
        let codec = SessionCodec::new("secret");
        let cookie = codec.encode(SessionGrants::of(&[Role::Mod]), 1_000_000);
        assert!(!codec.decode(&cookie, 1_000_000).0.is_empty());
        let expired = 1_000_000 + SESSION_MAX_AGE_SECS + 1;
        assert!(codec.decode(&cookie, expired).0.is_empty());
        assert!(codec.decode(&cookie, 999_000).0.is_empty());
    }

    #[test]
    fn test_garbage_yields_no_grants() {
        let codec = SessionCodec::new("secret");
        assert!(codec.decode("", 0).0.is_empty());
        assert!(codec.decode("not.a.cookie", 0).0.is_empty());
        assert!(codec.decode("onlyonepart", 0).0.is_empty());
    }
}
