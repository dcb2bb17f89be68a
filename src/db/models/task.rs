//! Task model and the caller-scoped task view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use super::common::{now_timestamp, nullable, parse_timestamp, Page, PageParams, PageWindow};
use crate::access::Visibility;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Todo,
    #[serde(rename = "In Progress")]
    InProgress,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "Todo",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Status must be one of: {}",
                    TaskStatus::ALL.map(|s| s.as_str()).join(", ")
                )
            })
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// Task row joined with its assignee's public fields
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: String,
    pub deadline: Option<String>,
    pub assignee_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub assignee_username: Option<String>,
    pub assignee_email: Option<String>,
    pub assignee_role: Option<String>,
}

impl Task {
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from(self.status.clone())
    }

    /// Overdue means a deadline in the past on a task that is not done
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        if self.status() == TaskStatus::Done {
            return false;
        }
        self.deadline
            .as_deref()
            .and_then(parse_timestamp)
            .map(|deadline| now > deadline)
            .unwrap_or(false)
    }

    pub fn is_overdue(&self) -> bool {
        self.is_overdue_at(Utc::now())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub deadline: Option<String>,
    pub assignee: Option<i64>,
    pub assignee_username: Option<String>,
    pub assignee_email: Option<String>,
    pub assignee_role: Option<String>,
    pub is_overdue: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            status: task.status(),
            is_overdue: task.is_overdue(),
            id: task.id,
            title: task.title,
            description: task.description,
            deadline: task.deadline,
            assignee: task.assignee_id,
            assignee_username: task.assignee_username,
            assignee_email: task.assignee_email,
            assignee_role: task.assignee_role,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Request to create a task (Manager or Admin)
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub assignee: Option<i64>,
}

/// Request to update a task. Absent fields are left unchanged; `null` clears
/// `deadline` and `assignee`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub deadline: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub assignee: Option<Option<i64>>,
}

/// Validated fields for a new task row
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub deadline: Option<String>,
    pub assignee_id: Option<i64>,
}

/// Validated changes for an existing task row
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub deadline: Option<Option<String>>,
    pub assignee_id: Option<Option<i64>>,
}

/// Query string for task listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    pub status: Option<String>,
    pub assignee: Option<i64>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl TaskQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSortKey {
    CreatedAt,
    UpdatedAt,
    Deadline,
    Title,
}

impl TaskSortKey {
    fn column(&self) -> &'static str {
        match self {
            TaskSortKey::CreatedAt => "t.created_at",
            TaskSortKey::UpdatedAt => "t.updated_at",
            TaskSortKey::Deadline => "t.deadline",
            TaskSortKey::Title => "t.title",
        }
    }
}

/// Sort key plus direction, parsed from `created_at` / `-created_at` style input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOrdering {
    pub key: TaskSortKey,
    pub descending: bool,
}

impl Default for TaskOrdering {
    /// Newest first
    fn default() -> Self {
        Self {
            key: TaskSortKey::CreatedAt,
            descending: true,
        }
    }
}

impl std::str::FromStr for TaskOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descending, name) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let key = match name {
            "created_at" => TaskSortKey::CreatedAt,
            "updated_at" => TaskSortKey::UpdatedAt,
            "deadline" => TaskSortKey::Deadline,
            "title" => TaskSortKey::Title,
            _ => {
                return Err(
                    "Ordering must be one of: created_at, updated_at, deadline, title (prefix '-' for descending)"
                        .to_string(),
                )
            }
        };
        Ok(Self { key, descending })
    }
}

/// Validated caller-supplied filters, AND-ed together
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<i64>,
    pub search: Option<String>,
    pub ordering: TaskOrdering,
}

const TASK_SELECT: &str = r#"
    SELECT t.id, t.title, t.description, t.status, t.deadline, t.assignee_id,
           t.created_at, t.updated_at,
           u.username AS assignee_username,
           u.email AS assignee_email,
           u.role AS assignee_role
    FROM tasks t
    LEFT JOIN users u ON u.id = t.assignee_id
"#;

/// Escape LIKE wildcards so search terms match literally
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Visibility first, then the caller's filters
fn push_conditions<'a>(
    query: &mut QueryBuilder<'a, Sqlite>,
    visibility: Visibility,
    filter: &'a TaskFilter,
) {
    query.push(" WHERE 1 = 1");

    match visibility {
        Visibility::All => {}
        Visibility::AssignedTo(user_id) => {
            query.push(" AND t.assignee_id = ").push_bind(user_id);
        }
        Visibility::Nothing => {
            query.push(" AND 1 = 0");
        }
    }

    if let Some(status) = filter.status {
        query.push(" AND t.status = ").push_bind(status.as_str());
    }
    if let Some(assignee_id) = filter.assignee_id {
        query.push(" AND t.assignee_id = ").push_bind(assignee_id);
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.is_empty()) {
        let pattern = like_pattern(term);
        query
            .push(" AND (t.title LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR t.description LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

/// List the tasks a caller can see, filtered, sorted and paged.
///
/// Ties on the sort key are broken by id so paging is stable. A page past
/// the end is empty rather than an error.
pub async fn list_tasks(
    db: &SqlitePool,
    visibility: Visibility,
    filter: &TaskFilter,
    window: PageWindow,
) -> Result<Page<Task>, sqlx::Error> {
    let mut count_query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT COUNT(*) FROM tasks t");
    push_conditions(&mut count_query, visibility, filter);
    let count: i64 = count_query.build_query_scalar().fetch_one(db).await?;

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(TASK_SELECT);
    push_conditions(&mut query, visibility, filter);
    query
        .push(" ORDER BY ")
        .push(filter.ordering.key.column())
        .push(if filter.ordering.descending { " DESC" } else { " ASC" })
        .push(", t.id ASC LIMIT ")
        .push_bind(window.page_size)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let tasks = query.build_query_as::<Task>().fetch_all(db).await?;
    Ok(Page::new(window, count, tasks))
}

/// Fetch a task regardless of caller; visibility is decided by the caller's
/// access check
pub async fn get_task(db: &SqlitePool, id: i64) -> Result<Option<Task>, sqlx::Error> {
    let sql = format!("{} WHERE t.id = ?", TASK_SELECT);
    sqlx::query_as::<_, Task>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn insert_task(db: &SqlitePool, new: NewTask) -> Result<Task, sqlx::Error> {
    let now = now_timestamp();

    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO tasks (title, description, status, deadline, assignee_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&new.title)
    .bind(&new.description)
    .bind(new.status.as_str())
    .bind(&new.deadline)
    .bind(new.assignee_id)
    .bind(&now)
    .bind(&now)
    .fetch_one(db)
    .await?;

    get_task(db, id).await?.ok_or(sqlx::Error::RowNotFound)
}

/// Apply changes in a single statement. Returns `None` if the task is absent.
pub async fn update_task(
    db: &SqlitePool,
    id: i64,
    changes: TaskChanges,
) -> Result<Option<Task>, sqlx::Error> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tasks SET updated_at = ");
    query.push_bind(now_timestamp());

    if let Some(title) = changes.title {
        query.push(", title = ").push_bind(title);
    }
    if let Some(description) = changes.description {
        query.push(", description = ").push_bind(description);
    }
    if let Some(status) = changes.status {
        query.push(", status = ").push_bind(status.as_str());
    }
    if let Some(deadline) = changes.deadline {
        query.push(", deadline = ").push_bind(deadline);
    }
    if let Some(assignee_id) = changes.assignee_id {
        query.push(", assignee_id = ").push_bind(assignee_id);
    }

    query.push(" WHERE id = ").push_bind(id).push(" RETURNING id");

    let updated: Option<i64> = query.build_query_scalar().fetch_optional(db).await?;
    match updated {
        Some(id) => get_task(db, id).await,
        None => Ok(None),
    }
}

pub async fn delete_task(db: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{delete_user, format_timestamp, get_user, insert_user, NewUser, Role};
    use chrono::Duration;

    async fn user(db: &SqlitePool, username: &str, role: Role) -> i64 {
        insert_user(
            db,
            NewUser {
                username: username.to_string(),
                password_hash: "x".to_string(),
                email: None,
                role,
                is_active: true,
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn task(db: &SqlitePool, title: &str, assignee_id: Option<i64>) -> Task {
        insert_task(
            db,
            NewTask {
                title: title.to_string(),
                assignee_id,
                ..NewTask::default()
            },
        )
        .await
        .unwrap()
    }

    fn window() -> PageWindow {
        PageWindow { page: 1, page_size: 50 }
    }

    fn sample(status: TaskStatus, deadline: Option<DateTime<Utc>>) -> Task {
        Task {
            id: 1,
            title: "t".to_string(),
            description: String::new(),
            status: status.as_str().to_string(),
            deadline: deadline.map(format_timestamp),
            assignee_id: None,
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
            assignee_username: None,
            assignee_email: None,
            assignee_role: None,
        }
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!("In Progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert!("InProgress".parse::<TaskStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"In Progress\""
        );
    }

    #[test]
    fn test_overdue_rules() {
        let now = Utc::now();
        let past = Some(now - Duration::days(1));
        let future = Some(now + Duration::days(1));

        assert!(sample(TaskStatus::Todo, past).is_overdue_at(now));
        assert!(sample(TaskStatus::InProgress, past).is_overdue_at(now));
        assert!(!sample(TaskStatus::Todo, future).is_overdue_at(now));
        assert!(!sample(TaskStatus::Todo, None).is_overdue_at(now));
        // Done is never overdue, however old the deadline
        assert!(!sample(TaskStatus::Done, past).is_overdue_at(now));
        assert!(!sample(TaskStatus::Done, Some(now - Duration::days(3650))).is_overdue_at(now));
    }

    #[test]
    fn test_ordering_parse() {
        assert_eq!(TaskOrdering::default(), "-created_at".parse().unwrap());
        let by_title: TaskOrdering = "title".parse().unwrap();
        assert_eq!(by_title.key, TaskSortKey::Title);
        assert!(!by_title.descending);
        assert!("priority".parse::<TaskOrdering>().is_err());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[tokio::test]
    async fn test_insert_defaults_to_todo() {
        let db = crate::db::init_memory().await.unwrap();
        let created = task(&db, "Write report", None).await;
        assert_eq!(created.status(), TaskStatus::Todo);
        assert_eq!(created.created_at, created.updated_at);
        assert!(created.assignee_id.is_none());
    }

    #[tokio::test]
    async fn test_member_visibility_narrows_before_filters() {
        let db = crate::db::init_memory().await.unwrap();
        let alice = user(&db, "alice", Role::Member).await;
        let bob = user(&db, "bob", Role::Member).await;

        task(&db, "alice report", Some(alice)).await;
        task(&db, "bob report", Some(bob)).await;
        task(&db, "unassigned report", None).await;

        let mine = list_tasks(&db, Visibility::AssignedTo(alice), &TaskFilter::default(), window())
            .await
            .unwrap();
        assert_eq!(mine.count, 1);
        assert_eq!(mine.results[0].assignee_id, Some(alice));

        // Filtering on someone else's tasks cannot widen the visible set
        let filter = TaskFilter {
            assignee_id: Some(bob),
            ..TaskFilter::default()
        };
        let widened = list_tasks(&db, Visibility::AssignedTo(alice), &filter, window())
            .await
            .unwrap();
        assert_eq!(widened.count, 0);

        let all = list_tasks(&db, Visibility::All, &TaskFilter::default(), window())
            .await
            .unwrap();
        assert_eq!(all.count, 3);
    }

    #[tokio::test]
    async fn test_filters_intersect() {
        let db = crate::db::init_memory().await.unwrap();
        let alice = user(&db, "alice", Role::Member).await;

        let done = task(&db, "Deploy staging", Some(alice)).await;
        update_task(
            &db,
            done.id,
            TaskChanges {
                status: Some(TaskStatus::Done),
                ..TaskChanges::default()
            },
        )
        .await
        .unwrap();
        task(&db, "Deploy production", Some(alice)).await;
        task(&db, "Write docs", None).await;

        let filter = TaskFilter {
            status: Some(TaskStatus::Todo),
            search: Some("deploy".to_string()),
            ..TaskFilter::default()
        };
        let page = list_tasks(&db, Visibility::All, &filter, window()).await.unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.results[0].title, "Deploy production");
    }

    #[tokio::test]
    async fn test_search_matches_description() {
        let db = crate::db::init_memory().await.unwrap();
        insert_task(
            &db,
            NewTask {
                title: "Quarterly".to_string(),
                description: "Summarize the 100% uptime".to_string(),
                ..NewTask::default()
            },
        )
        .await
        .unwrap();
        task(&db, "100 things", None).await;

        let filter = TaskFilter {
            search: Some("100%".to_string()),
            ..TaskFilter::default()
        };
        let page = list_tasks(&db, Visibility::All, &filter, window()).await.unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.results[0].title, "Quarterly");
    }

    #[tokio::test]
    async fn test_sort_ties_broken_by_id_and_pages_are_stable() {
        let db = crate::db::init_memory().await.unwrap();
        for title in ["same", "same", "same", "other"] {
            task(&db, title, None).await;
        }

        let filter = TaskFilter {
            ordering: "title".parse().unwrap(),
            ..TaskFilter::default()
        };
        let first = list_tasks(&db, Visibility::All, &filter, PageWindow { page: 1, page_size: 2 })
            .await
            .unwrap();
        let second = list_tasks(&db, Visibility::All, &filter, PageWindow { page: 2, page_size: 2 })
            .await
            .unwrap();
        let past_end = list_tasks(&db, Visibility::All, &filter, PageWindow { page: 9, page_size: 2 })
            .await
            .unwrap();

        let titles: Vec<_> = first.results.iter().chain(&second.results).map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["other", "same", "same", "same"]);
        assert!(second.results[0].id < second.results[1].id);
        assert_eq!(first.total_pages, 2);
        assert!(past_end.results.is_empty());
        assert_eq!(past_end.count, 4);
    }

    #[tokio::test]
    async fn test_default_order_is_newest_first() {
        let db = crate::db::init_memory().await.unwrap();
        let older = task(&db, "older", None).await;
        let newer = task(&db, "newer", None).await;

        let page = list_tasks(&db, Visibility::All, &TaskFilter::default(), window())
            .await
            .unwrap();
        let ids: Vec<i64> = page.results.iter().map(|t| t.id).collect();
        if older.created_at == newer.created_at {
            // Same microsecond: tie-break on id ascending
            assert_eq!(ids, vec![older.id, newer.id]);
        } else {
            assert_eq!(ids, vec![newer.id, older.id]);
        }
    }

    #[tokio::test]
    async fn test_update_can_clear_assignee_and_deadline() {
        let db = crate::db::init_memory().await.unwrap();
        let alice = user(&db, "alice", Role::Member).await;
        let created = insert_task(
            &db,
            NewTask {
                title: "Plan".to_string(),
                deadline: Some(now_timestamp()),
                assignee_id: Some(alice),
                ..NewTask::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(created.assignee_username.as_deref(), Some("alice"));

        let updated = update_task(
            &db,
            created.id,
            TaskChanges {
                deadline: Some(None),
                assignee_id: Some(None),
                ..TaskChanges::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

        assert!(updated.deadline.is_none());
        assert!(updated.assignee_id.is_none());
        assert!(updated.assignee_username.is_none());
        assert_eq!(updated.title, "Plan");
        assert!(updated.updated_at >= updated.created_at);
    }

    #[tokio::test]
    async fn test_deleting_user_unassigns_tasks() {
        let db = crate::db::init_memory().await.unwrap();
        let alice = user(&db, "alice", Role::Member).await;
        let first = task(&db, "first", Some(alice)).await;
        let second = task(&db, "second", Some(alice)).await;

        assert!(delete_user(&db, alice).await.unwrap());
        assert!(get_user(&db, alice).await.unwrap().is_none());

        for id in [first.id, second.id] {
            let remaining = get_task(&db, id).await.unwrap().unwrap();
            assert!(remaining.assignee_id.is_none());
        }
        assert!(!delete_user(&db, alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_task() {
        let db = crate::db::init_memory().await.unwrap();
        let created = task(&db, "gone soon", None).await;
        assert!(delete_task(&db, created.id).await.unwrap());
        assert!(!delete_task(&db, created.id).await.unwrap());
        assert!(get_task(&db, created.id).await.unwrap().is_none());
    }
}
