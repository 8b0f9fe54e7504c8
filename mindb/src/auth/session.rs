//! C6: session store. Hybrid signed-token-plus-store design (spec.md
//! §4.5): the token is self-contained enough for O(1) signature
//! verification, but a session-id absent from the in-memory store is
//! rejected regardless of the token's own expiry claim, giving immediate
//! revocation without a lookup-per-request database round trip.

use crate::auth::user_store::Principal;
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// The only algorithm this store will ever produce or accept — pinning
/// it here (rather than trusting the token's own header) is what defeats
/// algorithm-confusion attacks (spec.md §4.5 "Validate").
const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone)]
struct SessionRecord {
    principal: Principal,
    created_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    username: String,
    host: String,
    nbf: i64,
    iat: i64,
    exp: i64,
    sid: String,
}

/// Claims returned by a successful validation, with the principal fields
/// already split back out for callers.
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub principal: Principal,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: DashMap<String, SessionRecord>,
    signing_key: Vec<u8>,
    session_timeout: Duration,
}

impl SessionStore {
    pub fn new(signing_key: Vec<u8>, session_timeout: Duration) -> Arc<Self> {
        Arc::new(SessionStore { sessions: DashMap::new(), signing_key, session_timeout })
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    fn mint(&self, principal: &Principal) -> ApiResult<String> {
        let session_id = random_session_id();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(self.session_timeout).unwrap_or(chrono::Duration::zero());

        self.sessions.insert(
            session_id.clone(),
            SessionRecord { principal: principal.clone(), created_at: now, last_access: now, expires_at },
        );

        let claims = Claims {
            username: principal.username.clone(),
            host: principal.host.clone(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            sid: session_id,
        };
        jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &EncodingKey::from_secret(&self.signing_key))
            .map_err(|e| ApiError::Internal(format!("signing session token: {e}")))
    }

    /// `Create(username, host)` — spec.md §4.5.
    pub fn create(&self, principal: &Principal) -> ApiResult<String> {
        self.mint(principal)
    }

    /// `Validate(token)` — spec.md §4.5. Rejects a wrong algorithm, an
    /// absent session-id, or an expired record (removing the stale entry
    /// as it's found, per the same section).
    pub fn validate(&self, token: &str) -> ApiResult<ValidatedSession> {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_required_spec_claims(&["exp", "nbf", "iat"]);
        validation.algorithms = vec![ALGORITHM];

        let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.signing_key), &validation)
            .map_err(|_| ApiError::Unauthorized)?;
        let claims = data.claims;

        let mut record = self.sessions.get_mut(&claims.sid).ok_or(ApiError::Unauthorized)?;
        if record.expires_at < Utc::now() {
            drop(record);
            self.sessions.remove(&claims.sid);
            return Err(ApiError::Unauthorized);
        }
        record.last_access = Utc::now();

        Ok(ValidatedSession {
            principal: Principal::new(claims.username, claims.host),
            session_id: claims.sid,
            expires_at: record.expires_at,
        })
    }

    /// `Refresh(token)` — validates, then mints a fresh session for the
    /// same principal. The old session is left alone; it is the caller's
    /// responsibility to overwrite the cookie (spec.md §4.5).
    pub fn refresh(&self, token: &str) -> ApiResult<String> {
        let validated = self.validate(token)?;
        self.mint(&validated.principal)
    }

    /// `Revoke(token)` — removes the session-id regardless of expiry.
    /// Tolerates an already-invalid token: logout should never fail.
    pub fn revoke(&self, token: &str) {
        if let Ok(claims) = self.peek_claims(token) {
            self.sessions.remove(&claims.sid);
        }
    }

    fn peek_claims(&self, token: &str) -> ApiResult<Claims> {
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.algorithms = vec![ALGORITHM];
        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.signing_key), &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Background sweep target (spec.md §4.5 "CleanupExpired").
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.sessions.retain(|_, record| record.expires_at >= now);
    }
}

fn random_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(timeout: Duration) -> Arc<SessionStore> {
        SessionStore::new(b"test-signing-key".to_vec(), timeout)
    }

    #[test]
    fn create_then_validate_round_trips_principal() {
        let store = store(Duration::from_secs(3600));
        let principal = Principal::new("alice", "10.0.0.1");
        let token = store.create(&principal).unwrap();

        let validated = store.validate(&token).unwrap();
        assert_eq!(validated.principal, principal);
    }

    #[test]
    fn token_signed_with_other_key_does_not_validate() {
        let store_a = store(Duration::from_secs(3600));
        let store_b = SessionStore::new(b"different-key".to_vec(), Duration::from_secs(3600));

        let token = store_a.create(&Principal::root()).unwrap();
        assert!(store_b.validate(&token).is_err());
    }

    #[test]
    fn revoked_token_does_not_validate_even_before_expiry() {
        let store = store(Duration::from_secs(3600));
        let token = store.create(&Principal::root()).unwrap();
        store.revoke(&token);
        assert!(store.validate(&token).is_err());
    }

    #[test]
    fn expired_session_is_rejected_and_swept() {
        let store = store(Duration::from_millis(1));
        let token = store.create(&Principal::root()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(store.validate(&token).is_err());
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn cleanup_expired_removes_stale_records() {
        let store = store(Duration::from_millis(1));
        let _token = store.create(&Principal::root()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        store.cleanup_expired();
        assert_eq!(store.session_count(), 0);
    }
}
