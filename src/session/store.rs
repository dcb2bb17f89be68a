//! Server-side session storage.
//!
//! Records are keyed by the SHA-256 of the session token. Every operation is
//! atomic per key: renewing a session can never shorten its expiry, and an
//! expired record is never handed back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use sqlx::{FromRow, SqlitePool};

use crate::db::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub token_hash: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, record: SessionRecord) -> Result<(), sqlx::Error>;

    /// Look up a live session as of `now`, raising its expiry to `renew_to`
    /// when that is later. Expired records are removed and reported absent.
    async fn touch(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        renew_to: Option<DateTime<Utc>>,
    ) -> Result<Option<SessionRecord>, sqlx::Error>;

    /// Returns whether a record was removed
    async fn delete(&self, token_hash: &str) -> Result<bool, sqlx::Error>;

    async fn delete_for_user(&self, user_id: i64) -> Result<u64, sqlx::Error>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error>;
}

#[derive(Debug, FromRow)]
struct SessionRow {
    token_hash: String,
    user_id: i64,
    created_at: String,
    expires_at: String,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        Self {
            token_hash: row.token_hash,
            user_id: row.user_id,
            created_at: parse_timestamp(&row.created_at).unwrap_or_default(),
            // An unreadable expiry counts as long expired
            expires_at: parse_timestamp(&row.expires_at).unwrap_or_default(),
        }
    }
}

/// Sessions in the `sessions` table
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn put(&self, record: SessionRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.token_hash)
        .bind(record.user_id)
        .bind(format_timestamp(record.created_at))
        .bind(format_timestamp(record.expires_at))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn touch(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        renew_to: Option<DateTime<Utc>>,
    ) -> Result<Option<SessionRecord>, sqlx::Error> {
        let now = format_timestamp(now);
        // MAX() keeps the expiry monotonic when renewals race
        let floor = renew_to.map(format_timestamp).unwrap_or_else(|| now.clone());

        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            UPDATE sessions SET expires_at = MAX(expires_at, ?)
            WHERE token_hash = ? AND expires_at > ?
            RETURNING token_hash, user_id, created_at, expires_at
            "#,
        )
        .bind(&floor)
        .bind(token_hash)
        .bind(&now)
        .fetch_optional(&self.db)
        .await?;

        if row.is_none() {
            sqlx::query("DELETE FROM sessions WHERE token_hash = ? AND expires_at <= ?")
                .bind(token_hash)
                .bind(&now)
                .execute(&self.db)
                .await?;
        }

        Ok(row.map(SessionRecord::from))
    }

    async fn delete(&self, token_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_user(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(format_timestamp(now))
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Process-local sessions, lost on restart
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, record: SessionRecord) -> Result<(), sqlx::Error> {
        self.sessions.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn touch(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        renew_to: Option<DateTime<Utc>>,
    ) -> Result<Option<SessionRecord>, sqlx::Error> {
        // The entry guard holds the shard lock for the whole check-and-renew
        match self.sessions.entry(token_hash.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at <= now {
                    entry.remove();
                    return Ok(None);
                }
                let record = entry.get_mut();
                if let Some(renew_to) = renew_to {
                    record.expires_at = record.expires_at.max(renew_to);
                }
                Ok(Some(record.clone()))
            }
            Entry::Vacant(_) => Ok(None),
        }
    }

    async fn delete(&self, token_hash: &str) -> Result<bool, sqlx::Error> {
        Ok(self.sessions.remove(token_hash).is_some())
    }

    async fn delete_for_user(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.user_id != user_id);
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.expires_at > now);
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory, insert_user, NewUser, Role};
    use chrono::Duration;

    fn record(hash: &str, user_id: i64, now: DateTime<Utc>, ttl: Duration) -> SessionRecord {
        SessionRecord {
            token_hash: hash.to_string(),
            user_id,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    async fn sqlite_store() -> (SqliteSessionStore, i64, i64) {
        let db = init_memory().await.unwrap();
        let mut ids = Vec::new();
        for name in ["one", "two"] {
            let user = insert_user(
                &db,
                NewUser {
                    username: name.to_string(),
                    password_hash: "x".to_string(),
                    email: None,
                    role: Role::Member,
                    is_active: true,
                },
            )
            .await
            .unwrap();
            ids.push(user.id);
        }
        (SqliteSessionStore::new(db), ids[0], ids[1])
    }

    /// Behaviour every store must share
    async fn exercise(store: &dyn SessionStore, user_a: i64, user_b: i64) {
        let now = Utc::now();
        let hour = Duration::hours(1);

        store.put(record("live", user_a, now, hour)).await.unwrap();
        store.put(record("stale", user_a, now - hour * 3, hour)).await.unwrap();
        store.put(record("other", user_b, now, hour)).await.unwrap();

        // Renewal raises the expiry
        let renewed = store
            .touch("live", now, Some(now + hour * 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renewed.user_id, user_a);
        assert!(renewed.expires_at >= now + hour * 2 - Duration::milliseconds(1));

        // but never lowers it
        let again = store.touch("live", now, Some(now + hour)).await.unwrap().unwrap();
        assert_eq!(again.expires_at, renewed.expires_at);

        // Touch without renewal leaves expiry alone
        let plain = store.touch("live", now, None).await.unwrap().unwrap();
        assert_eq!(plain.expires_at, renewed.expires_at);

        // Expired records are not returned and are removed
        assert!(store.touch("stale", now, Some(now + hour)).await.unwrap().is_none());
        assert!(!store.delete("stale").await.unwrap());

        assert!(store.touch("missing", now, None).await.unwrap().is_none());

        // Deleting is idempotent
        assert!(store.delete("live").await.unwrap());
        assert!(!store.delete("live").await.unwrap());

        assert_eq!(store.delete_for_user(user_b).await.unwrap(), 1);
        assert!(store.touch("other", now, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = MemorySessionStore::new();
        exercise(&store, 1, 2).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let (store, a, b) = sqlite_store().await;
        exercise(&store, a, b).await;
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let now = Utc::now();
        let hour = Duration::hours(1);

        let memory = MemorySessionStore::new();
        let (sqlite, a, _) = sqlite_store().await;

        for store in [&memory as &dyn SessionStore, &sqlite as &dyn SessionStore] {
            store.put(record("old-1", a, now - hour * 5, hour)).await.unwrap();
            store.put(record("old-2", a, now - hour * 5, hour)).await.unwrap();
            store.put(record("fresh", a, now, hour)).await.unwrap();

            assert_eq!(store.purge_expired(now).await.unwrap(), 2);
            assert_eq!(store.purge_expired(now).await.unwrap(), 0);
            assert!(store.touch("fresh", now, None).await.unwrap().is_some());
        }
        assert_eq!(memory.len(), 1);
    }
}
