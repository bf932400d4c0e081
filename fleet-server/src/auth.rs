// File: fleet-server/src/auth.rs
//
// The two independent authentication schemes named in the admin/API surface:
// agents authenticate with a static API key, humans with a session cookie.
// Built as axum extractors the way the reference workspace threads its own
// request-scoped state through handler signatures, generalized here because
// this workspace has two distinct principal kinds instead of one.
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::FleetError;

pub const SESSION_COOKIE: &str = "fleet_session";
pub const CSRF_HEADER: &str = "X-CSRF-Token";

#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_seconds as i64),
        }
    }

    pub async fn create(&self, username: &str) -> (String, Session) {
        let token = random_token();
        let session = Session {
            username: username.to_string(),
            csrf_token: random_token(),
            expires_at: Utc::now() + self.ttl,
        };
        self.sessions.write().await.insert(token.clone(), session.clone());
        (token, session)
    }

    pub async fn get(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(token) {
            Some(s) if s.expires_at > Utc::now() => Some(s.clone()),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    pub async fn destroy(&self, token: &str) -> Option<Session> {
        self.sessions.write().await.remove(token)
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

pub fn session_cookie(token: &str, secure: bool, ttl_seconds: u64) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .max_age(time::Duration::seconds(ttl_seconds as i64))
        .path("/")
        .build()
}

pub fn expired_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::seconds(0))
        .build()
}

/// Constant-time comparison without pulling in a dedicated crate: length-check
/// first, then XOR-fold every byte so the loop never exits early.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub struct ApiKeyAuth;

impl<S> FromRequestParts<S> for ApiKeyAuth
where
    Arc<crate::AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = FleetError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<crate::AppState>::from_ref(state);
        let expected = app_state.config.read().await.api_key.clone();
        let provided = parts
            .headers
            .get("X-API-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if expected.is_empty() || !constant_time_eq(provided, &expected) {
            return Err(FleetError::Auth);
        }
        Ok(ApiKeyAuth)
    }
}

pub struct AuthedSession(pub Session);

impl<S> FromRequestParts<S> for AuthedSession
where
    Arc<SessionStore>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = FleetError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let store = Arc::<SessionStore>::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()).ok_or(FleetError::Auth)?;
        let session = store.get(&token).await.ok_or(FleetError::Auth)?;
        Ok(AuthedSession(session))
    }
}

/// Checks the CSRF header against the session's bound token. Called explicitly
/// by state-changing handlers rather than as a blanket extractor, mirroring
/// the reference workspace's preference for explicit checks over hidden layers
/// in handler bodies doing auth-adjacent validation.
pub fn verify_csrf(session: &Session, parts: &Parts) -> Result<(), FleetError> {
    let provided = parts
        .headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(provided, &session.csrf_token) {
        Ok(())
    } else {
        Err(FleetError::Auth)
    }
}

pub fn verify_password(password: &str, hash: &str) -> PasswordVerify {
    if hash.starts_with("$2") {
        if bcrypt::verify(password, hash).unwrap_or(false) {
            PasswordVerify::Ok
        } else {
            PasswordVerify::Mismatch
        }
    } else if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(password.as_bytes());
        let computed = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        if constant_time_eq(&computed, hash) {
            PasswordVerify::OkLegacy
        } else {
            PasswordVerify::Mismatch
        }
    } else {
        PasswordVerify::Mismatch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordVerify {
    Ok,
    /// Verified against a legacy SHA-256 hash; caller must re-hash with bcrypt
    /// and persist before returning success to the client.
    OkLegacy,
    Mismatch,
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn constant_time_eq_matches_equal_strings() {
        assert!(constant_time_eq("abc123", "abc123"));
    }

    #[test]
    fn constant_time_eq_rejects_different_length() {
        assert!(!constant_time_eq("short", "muchlonger"));
    }

    #[test]
    fn constant_time_eq_rejects_different_content_same_length() {
        assert!(!constant_time_eq("aaaaaa", "aaaaab"));
    }

    #[tokio::test]
    async fn session_store_round_trips_and_expires() {
        let store = SessionStore::new(3600);
        let (token, session) = store.create("admin").await;
        let fetched = store.get(&token).await.unwrap();
        assert_eq!(fetched.username, session.username);
        store.destroy(&token).await;
        assert!(store.get(&token).await.is_none());
    }

    #[test]
    fn bcrypt_password_round_trips() {
        let hash = hash_password("correct horse battery staple", 10).unwrap();
        assert_eq!(verify_password("correct horse battery staple", &hash), PasswordVerify::Ok);
        assert_eq!(verify_password("wrong", &hash), PasswordVerify::Mismatch);
    }

    #[test]
    fn legacy_sha256_hash_verifies_as_legacy() {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(b"legacy-pass");
        let hash = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        assert_eq!(verify_password("legacy-pass", &hash), PasswordVerify::OkLegacy);
    }

    #[test]
    fn csrf_mismatch_is_rejected() {
        let session = Session {
            username: "admin".to_string(),
            csrf_token: "expected-token".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        let mut headers = HeaderMap::new();
        headers.insert(CSRF_HEADER, HeaderValue::from_static("wrong-token"));
        let request = axum::http::Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        parts.headers = headers;
        assert!(verify_csrf(&session, &parts).is_err());
    }
}
