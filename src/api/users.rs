use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{normalize_email, parse_role, validate_password, validate_username};
use crate::access::{check_role, Action, Resource};
use crate::db::{
    self, CreateUserRequest, NewUser, Page, PageParams, PageWindow, Role, UpdateUserRequest,
    UserChanges, UserResponse,
};
use crate::session::hash_password;
use crate::AppState;

const USERNAME_TAKEN: &str = "A user with that username already exists";

/// List all users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Page<UserResponse>>, ApiError> {
    check_role(current.caller(), Resource::User, Action::List)?;
    let Query(params) = params?;

    let pagination = &state.config.pagination;
    let window = PageWindow::resolve(params, pagination.default_page_size, pagination.max_page_size);
    let page = db::list_users(&state.db, window).await?;

    Ok(Json(page.map(UserResponse::from)))
}

/// Get a single user by ID
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    check_role(current.caller(), Resource::User, Action::Read)?;

    let user = db::get_user(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(UserResponse::from(user)))
}

/// Create a new user
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    check_role(current.caller(), Resource::User, Action::Create)?;
    let Json(req) = body?;

    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_username(&req.username) {
        errors.add("username", e);
    } else if db::username_taken(&state.db, &req.username, None).await? {
        errors.add("username", USERNAME_TAKEN);
    }

    if let Err(e) = validate_password(&req.password, state.config.auth.min_password_length) {
        errors.add("password", e);
    }

    let email = normalize_email(req.email).unwrap_or_else(|e| {
        errors.add("email", e);
        None
    });

    let role = match req.role.as_deref() {
        None => Role::default(),
        Some(r) => parse_role(r).unwrap_or_else(|e| {
            errors.add("role", e);
            Role::default()
        }),
    };

    errors.finish()?;

    let new_user = NewUser {
        username: req.username,
        password_hash: hash_password(&req.password)?,
        email,
        role,
        is_active: req.is_active.unwrap_or(true),
    };
    let user = db::insert_user(&state.db, new_user).await?;

    info!(
        user_id = user.id,
        username = %user.username,
        role = %user.role(),
        created_by = current.user.id,
        "User created"
    );

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Partially update a user
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    apply_update(&state, &current, id, body, false).await.map(Json)
}

/// Replace a user's editable fields; `username` is required
pub async fn replace_user(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    apply_update(&state, &current, id, body, true).await.map(Json)
}

async fn apply_update(
    state: &AppState,
    current: &CurrentUser,
    id: i64,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
    full: bool,
) -> Result<UserResponse, ApiError> {
    check_role(current.caller(), Resource::User, Action::Update)?;

    if db::get_user(&state.db, id).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let Json(req) = body?;

    let mut errors = ValidationErrorBuilder::new();
    let mut changes = UserChanges::default();

    match req.username {
        Some(username) => {
            if let Err(e) = validate_username(&username) {
                errors.add("username", e);
            } else if db::username_taken(&state.db, &username, Some(id)).await? {
                errors.add("username", USERNAME_TAKEN);
            } else {
                changes.username = Some(username);
            }
        }
        None if full => {
            errors.add("username", "Username is required");
        }
        None => {}
    }

    if let Some(password) = req.password {
        match validate_password(&password, state.config.auth.min_password_length) {
            Ok(()) => changes.password_hash = Some(hash_password(&password)?),
            Err(e) => {
                errors.add("password", e);
            }
        }
    }

    if let Some(email) = req.email {
        match normalize_email(Some(email)) {
            Ok(email) => changes.email = Some(email),
            Err(e) => {
                errors.add("email", e);
            }
        }
    }

    if let Some(role) = req.role {
        match parse_role(&role) {
            Ok(role) => changes.role = Some(role),
            Err(e) => {
                errors.add("role", e);
            }
        }
    }

    changes.is_active = req.is_active;

    errors.finish()?;

    let deactivated = changes.is_active == Some(false);
    let user = db::update_user(&state.db, id, changes)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if deactivated {
        state.sessions.revoke_user(user.id).await?;
    }

    info!(user_id = user.id, updated_by = current.user.id, "User updated");
    Ok(UserResponse::from(user))
}

/// Delete a user. Their tasks stay, unassigned.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    check_role(current.caller(), Resource::User, Action::Delete)?;

    if !db::delete_user(&state.db, id).await? {
        return Err(ApiError::not_found("User not found"));
    }
    state.sessions.revoke_user(id).await?;

    info!(user_id = id, deleted_by = current.user.id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}
