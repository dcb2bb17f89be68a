//! User model and identity store queries.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use super::common::{now_timestamp, Page, PageWindow};

/// Closed set of user roles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Manager,
    #[default]
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Manager => "Manager",
            Role::Member => "Member",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(Role::Admin),
            "Manager" => Ok(Role::Manager),
            "Member" => Ok(Role::Member),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

impl From<String> for Role {
    /// Unknown stored values fall back to the least privileged role
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Role::Member)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn role(&self) -> Role {
        Role::from(self.role.clone())
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    pub is_active: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            role: user.role(),
            id: user.id,
            username: user.username,
            email: user.email,
            is_active: user.is_active,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserResponse,
}

/// Request to create a user (Admin only)
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Role name (Admin, Manager, Member); defaults to Member
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Request to update a user (Admin only). Absent fields are left unchanged;
/// an empty email clears it.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

/// Validated fields for a new user row
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub role: Role,
    pub is_active: bool,
}

/// Validated changes for an existing user row
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub email: Option<Option<String>>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// Exact, case-sensitive username lookup
pub async fn find_user_by_username(
    db: &SqlitePool,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(db)
        .await
}

pub async fn get_user(db: &SqlitePool, id: i64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Check whether a username is in use by a user other than `except_id`
pub async fn username_taken(
    db: &SqlitePool,
    username: &str,
    except_id: Option<i64>,
) -> Result<bool, sqlx::Error> {
    let found: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM users WHERE username = ? AND id != ?")
            .bind(username)
            .bind(except_id.unwrap_or(0))
            .fetch_optional(db)
            .await?;
    Ok(found.is_some())
}

pub async fn insert_user(db: &SqlitePool, new: NewUser) -> Result<User, sqlx::Error> {
    let now = now_timestamp();

    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, password_hash, email, role, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&new.username)
    .bind(&new.password_hash)
    .bind(&new.email)
    .bind(new.role.as_str())
    .bind(new.is_active)
    .bind(&now)
    .bind(&now)
    .fetch_one(db)
    .await
}

/// Apply changes in a single statement. Returns `None` if the user is absent.
pub async fn update_user(
    db: &SqlitePool,
    id: i64,
    changes: UserChanges,
) -> Result<Option<User>, sqlx::Error> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE users SET updated_at = ");
    query.push_bind(now_timestamp());

    if let Some(username) = changes.username {
        query.push(", username = ").push_bind(username);
    }
    if let Some(password_hash) = changes.password_hash {
        query.push(", password_hash = ").push_bind(password_hash);
    }
    if let Some(email) = changes.email {
        query.push(", email = ").push_bind(email);
    }
    if let Some(role) = changes.role {
        query.push(", role = ").push_bind(role.as_str());
    }
    if let Some(is_active) = changes.is_active {
        query.push(", is_active = ").push_bind(is_active);
    }

    query.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

    query.build_query_as::<User>().fetch_optional(db).await
}

/// Delete a user. Tasks assigned to them become unassigned and their sessions
/// are dropped, all in one transaction. Returns false if the user was absent.
pub async fn delete_user(db: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let mut tx = db.begin().await?;

    let unassigned = sqlx::query("UPDATE tasks SET assignee_id = NULL WHERE assignee_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;

    if deleted > 0 {
        tracing::debug!(user_id = id, unassigned_tasks = unassigned, "User row deleted");
    }
    Ok(deleted > 0)
}

/// List all users ordered by id
pub async fn list_users(db: &SqlitePool, window: PageWindow) -> Result<Page<User>, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(db)
        .await?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id ASC LIMIT ? OFFSET ?")
        .bind(window.page_size)
        .bind(window.offset())
        .fetch_all(db)
        .await?;

    Ok(Page::new(window, count, users))
}
