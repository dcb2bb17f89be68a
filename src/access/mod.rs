//! Role-based access rules for users and tasks.
//!
//! Every decision is evaluated in the same order: admin bypass, then the
//! role-for-verb table, then visibility of the target record, then the
//! object-level assignee check. Nothing here touches storage; callers load the
//! target record and pass in the fields the rules need.

use thiserror::Error;

use crate::db::{Role, User};

/// Resource kinds covered by the rule table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    User,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Read,
    Create,
    Update,
    Delete,
}

/// What a role is granted for a (resource, action) pair before any record is
/// consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// Allowed on every record
    All,
    /// Allowed only on records assigned to the caller
    Assigned,
    Deny,
}

/// Why an authenticated caller was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("You do not have permission to perform this action")]
    Forbidden,
    /// The record is absent or outside the caller's visible set
    #[error("Not found")]
    NotFound,
}

/// Identity the rules are evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: i64,
    pub role: Role,
}

impl From<&User> for Caller {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role(),
        }
    }
}

/// The rows of the task table a caller may query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    All,
    AssignedTo(i64),
    Nothing,
}

impl Visibility {
    pub fn admits(&self, assignee_id: Option<i64>) -> bool {
        match self {
            Visibility::All => true,
            Visibility::AssignedTo(id) => assignee_id == Some(*id),
            Visibility::Nothing => false,
        }
    }
}

/// The rule table. Admin is listed for completeness even though
/// [`check_role`] short-circuits admins before consulting it.
pub fn grant(role: Role, resource: Resource, action: Action) -> Grant {
    use Action::*;

    match (resource, action, role) {
        (_, _, Role::Admin) => Grant::All,

        (Resource::User, _, Role::Manager | Role::Member) => Grant::Deny,

        (Resource::Task, List | Read, Role::Manager) => Grant::All,
        (Resource::Task, List | Read, Role::Member) => Grant::Assigned,
        (Resource::Task, Create, Role::Manager) => Grant::All,
        (Resource::Task, Create, Role::Member) => Grant::Deny,
        (Resource::Task, Update, Role::Manager | Role::Member) => Grant::Assigned,
        (Resource::Task, Delete, Role::Manager | Role::Member) => Grant::Deny,
    }
}

/// Role-only check, made before any record is loaded.
pub fn check_role(caller: Caller, resource: Resource, action: Action) -> Result<(), AccessError> {
    if caller.role == Role::Admin {
        return Ok(());
    }
    match grant(caller.role, resource, action) {
        Grant::Deny => Err(AccessError::Forbidden),
        Grant::All | Grant::Assigned => Ok(()),
    }
}

/// Which tasks the caller can see. Listing narrows to this set before any
/// filter, sort or page is applied.
pub fn task_visibility(caller: Caller) -> Visibility {
    if caller.role == Role::Admin {
        return Visibility::All;
    }
    match grant(caller.role, Resource::Task, Action::Read) {
        Grant::All => Visibility::All,
        Grant::Assigned => Visibility::AssignedTo(caller.id),
        Grant::Deny => Visibility::Nothing,
    }
}

/// Full decision for an action on one task.
///
/// `target` is the task's assignee column if the record exists, `None` if it
/// does not. A record outside the caller's visible set is reported as
/// `NotFound` so its existence is not confirmed.
pub fn authorize_task(
    caller: Caller,
    action: Action,
    target: Option<Option<i64>>,
) -> Result<(), AccessError> {
    check_role(caller, Resource::Task, action)?;

    let assignee_id = target.ok_or(AccessError::NotFound)?;
    if !task_visibility(caller).admits(assignee_id) {
        return Err(AccessError::NotFound);
    }

    if caller.role == Role::Admin {
        return Ok(());
    }
    match grant(caller.role, Resource::Task, action) {
        Grant::All => Ok(()),
        Grant::Assigned if assignee_id == Some(caller.id) => Ok(()),
        Grant::Assigned | Grant::Deny => Err(AccessError::Forbidden),
    }
}
