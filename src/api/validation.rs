//! Input validation for API requests.
//!
//! Field validators return the normalized value or a message for the field.
//! Handlers collect messages with the `ValidationErrorBuilder` from the
//! `error` module so one response reports every bad field.

use lazy_static::lazy_static;
use regex::Regex;

use crate::db::{format_timestamp, parse_timestamp, Role, TaskOrdering, TaskStatus};

pub const USERNAME_MAX_LEN: usize = 150;
pub const TITLE_MAX_LEN: usize = 200;
pub const EMAIL_MAX_LEN: usize = 254;
pub const PASSWORD_MAX_LEN: usize = 128;

lazy_static! {
    /// Letters, digits and @ . + - _
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9@.+_-]+$").unwrap();

    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)+$"
    ).unwrap();
}

/// Validate a username
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }

    if username.chars().count() > USERNAME_MAX_LEN {
        return Err(format!(
            "Username is too long (max {} characters)",
            USERNAME_MAX_LEN
        ));
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Username may contain only letters, digits and @/./+/-/_ characters".to_string(),
        );
    }

    Ok(())
}

/// Validate a new password
pub fn validate_password(password: &str, min_len: usize) -> Result<(), String> {
    let len = password.chars().count();
    if len < min_len {
        return Err(format!("Password must be at least {} characters", min_len));
    }
    if len > PASSWORD_MAX_LEN {
        return Err(format!(
            "Password is too long (max {} characters)",
            PASSWORD_MAX_LEN
        ));
    }
    if password.trim().is_empty() {
        return Err("Password cannot be blank".to_string());
    }
    Ok(())
}

/// Validate an optional email. Blank values normalize to no email.
pub fn normalize_email(email: Option<String>) -> Result<Option<String>, String> {
    let email = match email {
        Some(e) if !e.trim().is_empty() => e.trim().to_string(),
        _ => return Ok(None),
    };

    if email.len() > EMAIL_MAX_LEN {
        return Err(format!("Email is too long (max {} characters)", EMAIL_MAX_LEN));
    }
    if !EMAIL_REGEX.is_match(&email) {
        return Err("Enter a valid email address".to_string());
    }
    Ok(Some(email))
}

pub fn parse_role(role: &str) -> Result<Role, String> {
    role.parse::<Role>()
        .map_err(|_| "Role must be one of: Admin, Manager, Member".to_string())
}

/// Validate a task title, returning it trimmed
pub fn normalize_title(title: &str) -> Result<String, String> {
    let title = title.trim();
    if title.is_empty() {
        return Err("Title is required".to_string());
    }
    if title.chars().count() > TITLE_MAX_LEN {
        return Err(format!("Title is too long (max {} characters)", TITLE_MAX_LEN));
    }
    Ok(title.to_string())
}

pub fn parse_status(status: &str) -> Result<TaskStatus, String> {
    status.parse()
}

/// Parse an RFC 3339 deadline into the stored UTC form
pub fn normalize_deadline(deadline: &str) -> Result<String, String> {
    parse_timestamp(deadline.trim())
        .map(format_timestamp)
        .ok_or_else(|| "Deadline must be an RFC 3339 timestamp, e.g. 2026-01-31T17:00:00Z".to_string())
}

pub fn parse_ordering(ordering: Option<&str>) -> Result<TaskOrdering, String> {
    match ordering.map(str::trim) {
        None | Some("") => Ok(TaskOrdering::default()),
        Some(value) => value.parse(),
    }
}
