//! Database seeders for built-in accounts
//!
//! Seeding never overwrites an existing user: a username that is already
//! taken is reported and left as it is.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use super::models::{find_user_by_username, insert_user, NewUser, Role};
use crate::session::hash_password;

/// Demo accounts, one per role
const DEMO_USERS: [(&str, &str, Role); 3] = [
    ("admin", "admin123", Role::Admin),
    ("manager", "manager123", Role::Manager),
    ("member", "member123", Role::Member),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    Created(String),
    Existing(String),
}

async fn ensure_user(pool: &SqlitePool, username: &str, password: &str, role: Role) -> Result<SeedOutcome> {
    if find_user_by_username(pool, username).await?.is_some() {
        return Ok(SeedOutcome::Existing(username.to_string()));
    }

    let password_hash = hash_password(password).context("Failed to hash seed password")?;
    insert_user(
        pool,
        NewUser {
            username: username.to_string(),
            password_hash,
            email: None,
            role,
            is_active: true,
        },
    )
    .await
    .with_context(|| format!("Failed to create user {}", username))?;

    info!(username, role = %role, "Seeded user");
    Ok(SeedOutcome::Created(username.to_string()))
}

/// Make sure the configured bootstrap admin exists
pub async fn ensure_admin_user(pool: &SqlitePool, username: &str, password: &str) -> Result<SeedOutcome> {
    ensure_user(pool, username, password, Role::Admin).await
}

/// Create the demo admin, manager and member accounts when absent
pub async fn seed_demo_users(pool: &SqlitePool) -> Result<Vec<SeedOutcome>> {
    info!("Seeding demo users...");

    let mut outcomes = Vec::with_capacity(DEMO_USERS.len());
    for (username, password, role) in DEMO_USERS {
        outcomes.push(ensure_user(pool, username, password, role).await?);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;
    use crate::session::verify_password;

    #[tokio::test]
    async fn test_seed_demo_users_is_idempotent() {
        let pool = init_memory().await.unwrap();

        let first = seed_demo_users(&pool).await.unwrap();
        assert!(first.iter().all(|o| matches!(o, SeedOutcome::Created(_))));

        let second = seed_demo_users(&pool).await.unwrap();
        assert_eq!(
            second,
            vec![
                SeedOutcome::Existing("admin".to_string()),
                SeedOutcome::Existing("manager".to_string()),
                SeedOutcome::Existing("member".to_string()),
            ]
        );

        let manager = find_user_by_username(&pool, "manager").await.unwrap().unwrap();
        assert_eq!(manager.role(), Role::Manager);
        assert!(verify_password("manager123", &manager.password_hash));
    }

    #[tokio::test]
    async fn test_ensure_admin_keeps_existing_password() {
        let pool = init_memory().await.unwrap();
        ensure_admin_user(&pool, "root", "first-password").await.unwrap();
        let outcome = ensure_admin_user(&pool, "root", "second-password").await.unwrap();

        assert_eq!(outcome, SeedOutcome::Existing("root".to_string()));
        let root = find_user_by_username(&pool, "root").await.unwrap().unwrap();
        assert!(root.is_admin());
        assert!(verify_password("first-password", &root.password_hash));
    }
}
