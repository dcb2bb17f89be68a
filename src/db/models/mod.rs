//! Database models split into domain-specific modules.

pub mod common;
pub mod task;
pub mod user;

pub use common::*;
pub use task::*;
pub use user::*;
