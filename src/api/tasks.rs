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
use super::validation::{normalize_deadline, normalize_title, parse_ordering, parse_status};
use crate::access::{authorize_task, check_role, task_visibility, Action, Resource};
use crate::db::{
    self, CreateTaskRequest, DbPool, NewTask, Page, PageWindow, TaskChanges, TaskFilter,
    TaskQuery, TaskResponse, UpdateTaskRequest,
};
use crate::AppState;

/// Check that an assignee exists and can log in
async fn check_assignee(
    db: &DbPool,
    assignee_id: i64,
    errors: &mut ValidationErrorBuilder,
) -> Result<bool, ApiError> {
    match db::get_user(db, assignee_id).await? {
        Some(user) if user.is_active => Ok(true),
        Some(_) => {
            errors.add("assignee", "Assignee must be an active user");
            Ok(false)
        }
        None => {
            errors.add("assignee", format!("User {} does not exist", assignee_id));
            Ok(false)
        }
    }
}

/// List the tasks visible to the caller
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    query: Result<Query<TaskQuery>, QueryRejection>,
) -> Result<Json<Page<TaskResponse>>, ApiError> {
    let caller = current.caller();
    check_role(caller, Resource::Task, Action::List)?;
    let Query(query) = query?;

    let mut errors = ValidationErrorBuilder::new();
    let mut filter = TaskFilter {
        assignee_id: query.assignee,
        search: query.search.clone(),
        ..TaskFilter::default()
    };

    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        match parse_status(status) {
            Ok(status) => filter.status = Some(status),
            Err(e) => {
                errors.add("status", e);
            }
        }
    }

    match parse_ordering(query.ordering.as_deref()) {
        Ok(ordering) => filter.ordering = ordering,
        Err(e) => {
            errors.add("ordering", e);
        }
    }

    errors.finish()?;

    let pagination = &state.config.pagination;
    let window = PageWindow::resolve(
        query.page_params(),
        pagination.default_page_size,
        pagination.max_page_size,
    );

    let page = db::list_tasks(&state.db, task_visibility(caller), &filter, window).await?;
    Ok(Json(page.map(TaskResponse::from)))
}

/// Get a single task by ID
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<TaskResponse>, ApiError> {
    let caller = current.caller();
    check_role(caller, Resource::Task, Action::Read)?;

    let task = db::get_task(&state.db, id).await?;
    authorize_task(caller, Action::Read, task.as_ref().map(|t| t.assignee_id))?;

    let task = task.ok_or_else(|| ApiError::not_found("Not found"))?;
    Ok(Json(TaskResponse::from(task)))
}

/// Create a new task
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    // Role first: a denied caller gets 403 whatever the body holds
    check_role(current.caller(), Resource::Task, Action::Create)?;
    let Json(req) = body?;

    let mut errors = ValidationErrorBuilder::new();
    let mut new_task = NewTask::default();

    match normalize_title(&req.title) {
        Ok(title) => new_task.title = title,
        Err(e) => {
            errors.add("title", e);
        }
    }

    new_task.description = req.description.unwrap_or_default();

    if let Some(status) = req.status.as_deref() {
        match parse_status(status) {
            Ok(status) => new_task.status = status,
            Err(e) => {
                errors.add("status", e);
            }
        }
    }

    if let Some(deadline) = req.deadline.as_deref() {
        match normalize_deadline(deadline) {
            Ok(deadline) => new_task.deadline = Some(deadline),
            Err(e) => {
                errors.add("deadline", e);
            }
        }
    }

    if let Some(assignee_id) = req.assignee {
        if check_assignee(&state.db, assignee_id, &mut errors).await? {
            new_task.assignee_id = Some(assignee_id);
        }
    }

    errors.finish()?;

    let task = db::insert_task(&state.db, new_task).await?;

    info!(
        task_id = task.id,
        assignee_id = ?task.assignee_id,
        created_by = current.user.id,
        "Task created"
    );

    Ok((StatusCode::CREATED, Json(TaskResponse::from(task))))
}

/// Partially update a task
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
    body: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> Result<Json<TaskResponse>, ApiError> {
    apply_update(&state, &current, id, body, false).await.map(Json)
}

/// Replace a task's editable fields; `title` is required
pub async fn replace_task(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
    body: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> Result<Json<TaskResponse>, ApiError> {
    apply_update(&state, &current, id, body, true).await.map(Json)
}

async fn apply_update(
    state: &AppState,
    current: &CurrentUser,
    id: i64,
    body: Result<Json<UpdateTaskRequest>, JsonRejection>,
    full: bool,
) -> Result<TaskResponse, ApiError> {
    let caller = current.caller();
    check_role(caller, Resource::Task, Action::Update)?;

    let existing = db::get_task(&state.db, id).await?;
    authorize_task(caller, Action::Update, existing.as_ref().map(|t| t.assignee_id))?;

    let Json(req) = body?;

    let mut errors = ValidationErrorBuilder::new();
    let mut changes = TaskChanges::default();

    match req.title {
        Some(title) => match normalize_title(&title) {
            Ok(title) => changes.title = Some(title),
            Err(e) => {
                errors.add("title", e);
            }
        },
        None if full => {
            errors.add("title", "Title is required");
        }
        None => {}
    }

    changes.description = req.description;

    if let Some(status) = req.status.as_deref() {
        match parse_status(status) {
            Ok(status) => changes.status = Some(status),
            Err(e) => {
                errors.add("status", e);
            }
        }
    }

    match req.deadline {
        Some(Some(deadline)) => match normalize_deadline(&deadline) {
            Ok(deadline) => changes.deadline = Some(Some(deadline)),
            Err(e) => {
                errors.add("deadline", e);
            }
        },
        Some(None) => changes.deadline = Some(None),
        None => {}
    }

    match req.assignee {
        Some(Some(assignee_id)) => {
            if check_assignee(&state.db, assignee_id, &mut errors).await? {
                changes.assignee_id = Some(Some(assignee_id));
            }
        }
        Some(None) => changes.assignee_id = Some(None),
        None => {}
    }

    errors.finish()?;

    let task = db::update_task(&state.db, id, changes)
        .await?
        .ok_or_else(|| ApiError::not_found("Not found"))?;

    info!(
        task_id = task.id,
        status = %task.status(),
        updated_by = current.user.id,
        "Task updated"
    );

    Ok(TaskResponse::from(task))
}

/// Delete a task
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let caller = current.caller();
    // Denied roles get 403 before the task is looked up
    check_role(caller, Resource::Task, Action::Delete)?;

    let existing = db::get_task(&state.db, id).await?;
    authorize_task(caller, Action::Delete, existing.map(|t| t.assignee_id))?;

    if !db::delete_task(&state.db, id).await? {
        return Err(ApiError::not_found("Not found"));
    }

    info!(task_id = id, deleted_by = current.user.id, "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}
