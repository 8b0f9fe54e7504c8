//! User/privilege store: the durable half of authentication. Holds user
//! records, grants, and roles, persisted as `users.json` under the data
//! directory (spec.md §3 "User record" / "Grant" / "Role", §6 "Persistent
//! state on disk"). Password hashing uses PBKDF2-HMAC-SHA256 (`pbkdf2`
//! crate's "simple" scheme, matching the teacher's choice of the same
//! crate for credential digests).

use crate::config::{LOCKOUT_THRESHOLD, LOCKOUT_WINDOW};
use crate::error::{ApiError, ApiResult};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `(username, host)` — the authorization subject (spec.md GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub host: String,
}

impl Principal {
    pub fn new(username: impl Into<String>, host: impl Into<String>) -> Self {
        Principal { username: username.into(), host: host.into() }
    }

    pub fn root() -> Self {
        Principal::new("root", "%")
    }

    fn key(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub database: String,
    pub table: String,
    pub privilege: Privilege,
}

impl Grant {
    fn matches(&self, database: &str, table: &str, privilege: Privilege) -> bool {
        let db_ok = self.database == "*" || self.database == database;
        let tbl_ok = self.table == "*" || self.table == table;
        let priv_ok = self.privilege == Privilege::All || self.privilege == privilege;
        db_ok && tbl_ok && priv_ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub grants: Vec<Grant>,
    pub members: Vec<Principal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub host: String,
    /// PHC-formatted digest; `None` means the account has no password set
    /// and cannot authenticate via Basic auth (SPEC_FULL.md §3, root@%'s
    /// bootstrap state).
    pub password_digest: Option<String>,
    pub locked: bool,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub grants: Vec<Grant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    fn principal(&self) -> Principal {
        Principal::new(self.username.clone(), self.host.clone())
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct PersistedState {
    users: Vec<User>,
    roles: Vec<Role>,
}

/// Holds users, grants, and roles behind a single reader-writer lock;
/// every mutating operation persists the whole file afterward (spec.md
/// §3 Lifecycles: "persisted after every mutation").
pub struct UserStore {
    path: Utf8PathBuf,
    state: RwLock<PersistedState>,
}

impl UserStore {
    /// Load `users.json` from `data_dir`, creating a default `root@%`
    /// record (no password) if the file doesn't exist yet.
    pub fn load(data_dir: &camino::Utf8Path) -> anyhow::Result<Self> {
        let path = data_dir.join("users.json");
        let state = if path.exists() {
            let bytes = std::fs::read(path.as_std_path())?;
            serde_json::from_slice(&bytes)?
        } else {
            let now = Utc::now();
            PersistedState {
                users: vec![User {
                    username: "root".to_string(),
                    host: "%".to_string(),
                    password_digest: None,
                    locked: false,
                    consecutive_failures: 0,
                    last_failure_at: None,
                    grants: vec![Grant { database: "*".to_string(), table: "*".to_string(), privilege: Privilege::All }],
                    created_at: now,
                    updated_at: now,
                }],
                roles: Vec::new(),
            }
        };
        let store = UserStore { path, state: RwLock::new(state) };
        if !store.path.exists() {
            store.persist()?;
        }
        Ok(store)
    }

    fn persist(&self) -> anyhow::Result<()> {
        let state = self.state.read();
        let bytes = serde_json::to_vec_pretty(&*state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(tmp_path.as_std_path(), &bytes)?;
        std::fs::rename(tmp_path.as_std_path(), self.path.as_std_path())?;
        Ok(())
    }

    fn find(&self, username: &str, host: &str) -> Option<User> {
        self.state.read().users.iter().find(|u| u.username == username && u.host == host).cloned()
    }

    /// Resolve a connecting client's host against user records: an exact
    /// `(username, host)` match wins, falling back to the wildcard host
    /// `%` record (MySQL-style host-pattern matching, the only pattern
    /// this store recognizes on the lookup side — `Grant`'s db/table
    /// wildcards are a separate, more general mechanism).
    fn resolve_username_host<'a>(state: &'a PersistedState, username: &str, client_host: &str) -> Option<&'a User> {
        state
            .users
            .iter()
            .find(|u| u.username == username && u.host == client_host)
            .or_else(|| state.users.iter().find(|u| u.username == username && u.host == "%"))
    }

    fn resolve_username_host_mut<'a>(
        state: &'a mut PersistedState,
        username: &str,
        client_host: &str,
    ) -> Option<&'a mut User> {
        let exact = state.users.iter().position(|u| u.username == username && u.host == client_host);
        let idx = exact.or_else(|| state.users.iter().position(|u| u.username == username && u.host == "%"))?;
        state.users.get_mut(idx)
    }

    /// Effective lock state: an explicit admin lock, or the auto-lockout
    /// window from invariant I4.
    fn is_locked(user: &User) -> bool {
        if user.locked {
            return true;
        }
        if user.consecutive_failures >= LOCKOUT_THRESHOLD {
            if let Some(last) = user.last_failure_at {
                return Utc::now().signed_duration_since(last).to_std().unwrap_or_default() < LOCKOUT_WINDOW;
            }
        }
        false
    }

    pub fn is_account_locked(&self, username: &str, host: &str) -> bool {
        let state = self.state.read();
        Self::resolve_username_host(&state, username, host).map(Self::is_locked).unwrap_or(false)
    }

    /// Verify credentials. On success, clears the failure counter and
    /// bumps `updated_at`; on failure, increments the counter and stamps
    /// `last_failure_at`, auto-unlocking first if the previous window has
    /// already elapsed (I4: "must auto-unlock once the window elapses").
    pub fn authenticate(&self, username: &str, password: &str, host: &str) -> ApiResult<Principal> {
        let mut state = self.state.write();
        let user = Self::resolve_username_host_mut(&mut state, username, host).ok_or(ApiError::Unauthorized)?;

        if user.consecutive_failures >= LOCKOUT_THRESHOLD {
            let elapsed = user
                .last_failure_at
                .map(|last| Utc::now().signed_duration_since(last).to_std().unwrap_or_default())
                .unwrap_or_default();
            if elapsed < LOCKOUT_WINDOW {
                return Err(ApiError::AccountLocked);
            }
            user.consecutive_failures = 0;
        }
        if user.locked {
            return Err(ApiError::AccountLocked);
        }

        let digest = user.password_digest.as_deref().ok_or(ApiError::Unauthorized)?;
        let parsed = PasswordHash::new(digest).map_err(|_| ApiError::Internal("corrupt password digest".to_string()))?;
        if Pbkdf2.verify_password(password.as_bytes(), &parsed).is_err() {
            user.consecutive_failures += 1;
            user.last_failure_at = Some(Utc::now());
            user.updated_at = Utc::now();
            drop(state);
            let _ = self.persist();
            return Err(ApiError::Unauthorized);
        }

        user.consecutive_failures = 0;
        user.last_failure_at = None;
        user.updated_at = Utc::now();
        let principal = user.principal();
        drop(state);
        let _ = self.persist();
        Ok(principal)
    }

    pub fn set_password(&self, username: &str, host: &str, password: &str) -> ApiResult<()> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        let digest = Pbkdf2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ApiError::Internal(format!("hashing password: {e}")))?
            .to_string();

        let mut state = self.state.write();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.username == username && u.host == host)
            .ok_or_else(|| ApiError::NotFound(format!("user {username}@{host}")))?;
        user.password_digest = Some(digest);
        user.updated_at = Utc::now();
        drop(state);
        self.persist().map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Direct grants plus every grant inherited from role membership
    /// (spec.md §3 "Role": "union of its direct grants and the grants of
    /// every role it is a member of").
    fn effective_grants(&self, principal: &Principal) -> Vec<Grant> {
        let state = self.state.read();
        let mut grants = state
            .users
            .iter()
            .find(|u| u.username == principal.username && u.host == principal.host)
            .map(|u| u.grants.clone())
            .unwrap_or_default();
        for role in &state.roles {
            if role.members.contains(principal) {
                grants.extend(role.grants.clone());
            }
        }
        grants
    }

    pub fn has_privilege(&self, principal: &Principal, database: &str, table: &str, privilege: Privilege) -> bool {
        self.effective_grants(principal).iter().any(|g| g.matches(database, table, privilege))
    }

    pub fn principal_key(principal: &Principal) -> String {
        principal.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_password(dir: &camino::Utf8Path, password: &str) -> UserStore {
        let store = UserStore::load(dir).unwrap();
        store.set_password("root", "%", password).unwrap();
        store
    }

    #[test]
    fn root_bootstraps_without_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = UserStore::load(&path).unwrap();
        let err = store.authenticate("root", "anything", "%").unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[test]
    fn correct_password_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = store_with_password(&path, "correct horse battery staple");
        let principal = store.authenticate("root", "correct horse battery staple", "%").unwrap();
        assert_eq!(principal, Principal::root());
    }

    #[test]
    fn five_failures_lock_the_account_until_window_elapses() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = store_with_password(&path, "hunter2");

        for _ in 0..5 {
            assert!(store.authenticate("root", "wrong", "%").is_err());
        }
        assert!(store.is_account_locked("root", "%"));

        let err = store.authenticate("root", "hunter2", "%").unwrap_err();
        assert!(matches!(err, ApiError::AccountLocked));
    }

    #[test]
    fn grant_matching_honours_wildcards() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = UserStore::load(&path).unwrap();
        assert!(store.has_privilege(&Principal::root(), "any_db", "any_table", Privilege::Select));
    }
}
