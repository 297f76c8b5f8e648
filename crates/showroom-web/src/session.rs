//! Admin sessions.
//!
//! A successful sign-in issues a random token. Only its SHA-256 digest is
//! kept, mapped to the signed-in admin and an optional expiry. Requests
//! present the token either as the `showroom_admin` cookie or as a bearer
//! header; [`AdminSession`] is the one extractor every admin handler uses.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use showroom_db::AdminAccount;
use tracing::debug;

use crate::server::{ApiError, AppState};

pub const SESSION_COOKIE: &str = "showroom_admin";
const TOKEN_LEN: usize = 48;

#[derive(Debug, Clone)]
struct SessionEntry {
    admin: AdminAccount,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

/// Token handed to the client after sign-in.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    ttl: Option<Duration>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    /// `ttl` of `None` keeps sessions until logout.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn issue(&self, admin: AdminAccount) -> IssuedSession {
        let token = generate_token();
        let issued_at = Utc::now();
        // A lifetime past chrono's range never expires.
        let expires_at = self.ttl.and_then(|ttl| {
            ChronoDuration::from_std(ttl)
                .ok()
                .and_then(|ttl| issued_at.checked_add_signed(ttl))
        });

        let mut sessions = self.sessions.write();
        sessions.retain(|_, entry| !entry.expired(issued_at));
        sessions.insert(
            hash_token(&token),
            SessionEntry {
                admin,
                issued_at,
                expires_at,
            },
        );
        IssuedSession { token, expires_at }
    }

    /// Admin behind `token`, if the session exists and has not expired.
    pub fn resolve(&self, token: &str) -> Option<AdminAccount> {
        let digest = hash_token(token);
        let now = Utc::now();
        {
            let sessions = self.sessions.read();
            match sessions.get(&digest) {
                Some(entry) if !entry.expired(now) => return Some(entry.admin.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        if let Some(entry) = self.sessions.write().remove(&digest) {
            debug!(admin_id = entry.admin.id, issued_at = %entry.issued_at, "session expired");
        }
        None
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.write().remove(&hash_token(token)).is_some()
    }

    /// Replaces the stored identity in every live session of `admin`.
    pub fn refresh_admin(&self, admin: &AdminAccount) -> usize {
        let mut refreshed = 0;
        for entry in self.sessions.write().values_mut() {
            if entry.admin.id == admin.id {
                entry.admin = admin.clone();
                refreshed += 1;
            }
        }
        refreshed
    }
}

impl SessionEntry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Signed-in admin, resolved from the request's session token.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub admin: AdminAccount,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("admin session required"))?;
        let admin = state
            .sessions
            .resolve(&token)
            .ok_or_else(|| ApiError::unauthorized("admin session expired or unknown"))?;
        Ok(Self { admin, token })
    }
}

/// Bearer token when present, otherwise the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(token: &str, ttl: Option<Duration>) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
    if let Some(ttl) = ttl {
        cookie.push_str(&format!("; Max-Age={}", ttl.as_secs()));
    }
    cookie
}

pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn admin(id: i64, username: &str) -> AdminAccount {
        AdminAccount {
            id,
            username: username.into(),
            admin_code: "3N-2024".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issued_tokens_resolve_until_revoked() {
        let store = SessionStore::new(Some(Duration::from_secs(3600)));
        let issued = store.issue(admin(1, "rina"));
        assert_eq!(issued.token.len(), TOKEN_LEN);
        assert!(issued.expires_at.is_some());

        assert_eq!(store.resolve(&issued.token).unwrap().username, "rina");
        assert!(store.resolve("not-a-token").is_none());

        assert!(store.revoke(&issued.token));
        assert!(store.resolve(&issued.token).is_none());
        assert!(!store.revoke(&issued.token));
    }

    #[test]
    fn only_digests_are_stored() {
        let store = SessionStore::new(None);
        let issued = store.issue(admin(1, "rina"));
        let sessions = store.sessions.read();
        assert!(!sessions.contains_key(&issued.token));
        assert!(sessions.contains_key(&hash_token(&issued.token)));
    }

    #[test]
    fn expired_sessions_are_dropped() {
        let store = SessionStore::new(Some(Duration::ZERO));
        let issued = store.issue(admin(1, "rina"));
        assert!(store.resolve(&issued.token).is_none());
        assert!(store.sessions.read().is_empty());
    }

    #[test]
    fn out_of_range_ttl_never_expires() {
        let store = SessionStore::new(Some(Duration::from_secs(u64::MAX / 2)));
        let issued = store.issue(admin(1, "rina"));
        assert_eq!(issued.expires_at, None);
        assert!(store.resolve(&issued.token).is_some());
    }

    #[test]
    fn sessions_without_ttl_never_expire() {
        let store = SessionStore::new(None);
        let issued = store.issue(admin(1, "rina"));
        assert_eq!(issued.expires_at, None);
        assert!(store.resolve(&issued.token).is_some());
    }

    #[test]
    fn refresh_updates_every_session_of_the_admin() {
        let store = SessionStore::new(None);
        let first = store.issue(admin(1, "rina"));
        let second = store.issue(admin(1, "rina"));
        let other = store.issue(admin(2, "budi"));

        assert_eq!(store.refresh_admin(&admin(1, "rina.s")), 2);
        assert_eq!(store.resolve(&first.token).unwrap().username, "rina.s");
        assert_eq!(store.resolve(&second.token).unwrap().username, "rina.s");
        assert_eq!(store.resolve(&other.token).unwrap().username, "budi");
    }

    #[test]
    fn token_from_bearer_or_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; showroom_admin=cookie-token"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("cookie-token"));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("header-token"));

        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn cookie_attributes() {
        assert_eq!(
            session_cookie("abc", Some(Duration::from_secs(43_200))),
            "showroom_admin=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=43200"
        );
        assert_eq!(
            session_cookie("abc", None),
            "showroom_admin=abc; Path=/; HttpOnly; SameSite=Lax"
        );
        assert!(clear_session_cookie().ends_with("Max-Age=0"));
    }
}
