//! Credential checks and the server-side session lifecycle.

mod store;

pub use store::{MemorySessionStore, SessionRecord, SessionStore, SqliteSessionStore};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::AuthConfig;
use crate::db::{find_user_by_username, get_user, DbPool, User};

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user, wrong password and inactive account all look the same
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Authentication credentials were not provided or have expired")]
    Unauthenticated,
    #[error("Password hashing failed: {0}")]
    Hash(String),
    #[error("Invalid session configuration: {0}")]
    Config(String),
    #[error("Session expiry is out of range")]
    ExpiryOutOfRange,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Hash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random 256-bit session token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// A freshly created session. The raw token is only ever handed to the client.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// The caller behind a live session
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    db: DbPool,
    ttl: Duration,
    sliding: bool,
    /// Verified against when the username is unknown, so the miss costs the
    /// same as a wrong password
    dummy_hash: String,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, db: DbPool, config: &AuthConfig) -> Result<Self, AuthError> {
        let ttl = config
            .session_ttl()
            .map_err(|e| AuthError::Config(e.to_string()))?;
        Ok(Self {
            store,
            db,
            ttl,
            sliding: config.sliding_sessions,
            dummy_hash: hash_password(&generate_token())?,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
        now.checked_add_signed(self.ttl)
            .ok_or(AuthError::ExpiryOutOfRange)
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let user = find_user_by_username(&self.db, username).await?;

        let Some(user) = user else {
            verify_password(password, &self.dummy_hash);
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(password, &user.password_hash) || !user.is_active {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(user)
    }

    pub async fn create_session(&self, user: &User) -> Result<IssuedSession, AuthError> {
        let token = generate_token();
        let now = Utc::now();
        let expires_at = self.expiry_from(now)?;

        self.store
            .put(SessionRecord {
                token_hash: hash_token(&token),
                user_id: user.id,
                created_at: now,
                expires_at,
            })
            .await?;

        info!(user_id = user.id, username = %user.username, "Session created");
        Ok(IssuedSession { token, expires_at })
    }

    pub async fn resolve(&self, token: &str) -> Result<ResolvedSession, AuthError> {
        self.resolve_at(token, Utc::now()).await
    }

    /// Resolve a token as of `now`. The user is re-read on every call so role
    /// and active flag changes apply immediately.
    pub async fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> Result<ResolvedSession, AuthError> {
        let token_hash = hash_token(token);
        let renew_to = if self.sliding {
            Some(self.expiry_from(now)?)
        } else {
            None
        };

        let record = self
            .store
            .touch(&token_hash, now, renew_to)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        match get_user(&self.db, record.user_id).await? {
            Some(user) if user.is_active => {
                debug!(user_id = user.id, expires_at = %record.expires_at, "Session resolved");
                Ok(ResolvedSession {
                    user,
                    expires_at: record.expires_at,
                })
            }
            _ => {
                self.store.delete(&token_hash).await?;
                debug!(user_id = record.user_id, "Session dropped for missing or inactive user");
                Err(AuthError::Unauthenticated)
            }
        }
    }

    /// Idempotent
    pub async fn destroy(&self, token: &str) -> Result<(), AuthError> {
        self.store.delete(&hash_token(token)).await?;
        Ok(())
    }

    /// Drop every session belonging to a user
    pub async fn revoke_user(&self, user_id: i64) -> Result<u64, AuthError> {
        let removed = self.store.delete_for_user(user_id).await?;
        if removed > 0 {
            debug!(user_id, removed, "Sessions revoked");
        }
        Ok(removed)
    }

    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        let removed = self.store.purge_expired(Utc::now()).await?;
        debug!(removed, "Expired sessions purged");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory, insert_user, update_user, NewUser, Role, UserChanges};

    async fn setup(sliding: bool) -> (SessionManager, DbPool) {
        let db = init_memory().await.unwrap();
        let config = AuthConfig {
            session_ttl_secs: 3600,
            sliding_sessions: sliding,
            ..AuthConfig::default()
        };
        let manager = SessionManager::new(Arc::new(MemorySessionStore::new()), db.clone(), &config).unwrap();
        (manager, db)
    }

    async fn user(db: &DbPool, username: &str, password: &str, role: Role) -> User {
        insert_user(
            db,
            NewUser {
                username: username.to_string(),
                password_hash: hash_password(password).unwrap(),
                email: None,
                role,
                is_active: true,
            },
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
        assert_ne!(hash, hash_password("correct horse").unwrap());
    }

    #[test]
    fn test_tokens_are_random_and_hashed() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token, generate_token());
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }

    #[tokio::test]
    async fn test_authenticate_failures_are_indistinguishable() {
        let (manager, db) = setup(true).await;
        for (name, role) in [("ada", Role::Admin), ("max", Role::Manager), ("mel", Role::Member)] {
            user(&db, name, "s3cret-pass", role).await;
            let ok = manager.authenticate(name, "s3cret-pass").await.unwrap();
            assert_eq!(ok.username, name);

            let wrong = manager.authenticate(name, "nope").await.unwrap_err();
            let missing = manager.authenticate(&format!("{name}-ghost"), "nope").await.unwrap_err();
            assert!(matches!(wrong, AuthError::InvalidCredentials));
            assert!(matches!(missing, AuthError::InvalidCredentials));
            assert_eq!(wrong.to_string(), missing.to_string());
        }

        // Usernames are case-sensitive
        assert!(matches!(
            manager.authenticate("ADA", "s3cret-pass").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected_and_expiry_never_overflows() {
        let db = init_memory().await.unwrap();
        for ttl in [0, 10_000_000_000_000] {
            let config = AuthConfig {
                session_ttl_secs: ttl,
                ..AuthConfig::default()
            };
            let result = SessionManager::new(Arc::new(MemorySessionStore::new()), db.clone(), &config);
            assert!(matches!(result, Err(AuthError::Config(_))), "ttl {ttl} accepted");
        }

        let (manager, db) = setup(true).await;
        let u = user(&db, "edge", "s3cret-pass", Role::Member).await;
        let issued = manager.create_session(&u).await.unwrap();
        let err = manager
            .resolve_at(&issued.token, DateTime::<Utc>::MAX_UTC)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ExpiryOutOfRange));
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_authenticate() {
        let (manager, db) = setup(true).await;
        let sleeper = user(&db, "sleeper", "s3cret-pass", Role::Member).await;
        update_user(&db, sleeper.id, UserChanges { is_active: Some(false), ..UserChanges::default() })
            .await
            .unwrap();

        let err = manager.authenticate("sleeper", "s3cret-pass").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_sliding_expiry_never_decreases() {
        let (manager, db) = setup(true).await;
        let u = user(&db, "slide", "s3cret-pass", Role::Member).await;
        let issued = manager.create_session(&u).await.unwrap();

        let start = Utc::now();
        let mut last = issued.expires_at;
        for minutes in [0, 10, 5, 30] {
            let resolved = manager
                .resolve_at(&issued.token, start + Duration::minutes(minutes))
                .await
                .unwrap();
            assert!(resolved.expires_at >= last);
            last = resolved.expires_at;
        }
        assert!(last >= start + Duration::minutes(30) + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_fixed_expiry_when_not_sliding() {
        let (manager, db) = setup(false).await;
        let u = user(&db, "fixed", "s3cret-pass", Role::Member).await;
        let issued = manager.create_session(&u).await.unwrap();

        let later = Utc::now() + Duration::minutes(30);
        let resolved = manager.resolve_at(&issued.token, later).await.unwrap();
        assert_eq!(resolved.expires_at, issued.expires_at);
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthenticated() {
        let (manager, db) = setup(true).await;
        let u = user(&db, "late", "s3cret-pass", Role::Member).await;
        let issued = manager.create_session(&u).await.unwrap();

        let after = issued.expires_at + Duration::seconds(1);
        assert!(matches!(
            manager.resolve_at(&issued.token, after).await,
            Err(AuthError::Unauthenticated)
        ));
        // Removed on the failed lookup, so it stays gone
        assert!(matches!(
            manager.resolve(&issued.token).await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_resolve_drops_session_of_deactivated_user() {
        let (manager, db) = setup(true).await;
        let u = user(&db, "gone", "s3cret-pass", Role::Manager).await;
        let issued = manager.create_session(&u).await.unwrap();
        assert_eq!(manager.resolve(&issued.token).await.unwrap().user.id, u.id);

        update_user(&db, u.id, UserChanges { is_active: Some(false), ..UserChanges::default() })
            .await
            .unwrap();
        assert!(matches!(
            manager.resolve(&issued.token).await,
            Err(AuthError::Unauthenticated)
        ));

        // Reactivating does not revive the destroyed session
        update_user(&db, u.id, UserChanges { is_active: Some(true), ..UserChanges::default() })
            .await
            .unwrap();
        assert!(manager.resolve(&issued.token).await.is_err());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_sessions_are_independent() {
        let (manager, db) = setup(true).await;
        let u = user(&db, "multi", "s3cret-pass", Role::Member).await;
        let first = manager.create_session(&u).await.unwrap();
        let second = manager.create_session(&u).await.unwrap();

        manager.destroy(&first.token).await.unwrap();
        manager.destroy(&first.token).await.unwrap();

        assert!(manager.resolve(&first.token).await.is_err());
        assert!(manager.resolve(&second.token).await.is_ok());

        assert_eq!(manager.revoke_user(u.id).await.unwrap(), 1);
        assert!(manager.resolve(&second.token).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_token_is_unauthenticated() {
        let (manager, _) = setup(true).await;
        assert!(matches!(
            manager.resolve("not-a-token").await,
            Err(AuthError::Unauthenticated)
        ));
    }
}
