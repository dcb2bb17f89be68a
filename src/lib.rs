pub mod access;
pub mod api;
pub mod cli;
pub mod config;
pub mod csrf;
pub mod db;
pub mod session;

pub use db::DbPool;

use anyhow::{anyhow, Result};
use config::Config;
use std::sync::Arc;

use crate::api::cookies::CookiePolicy;
use crate::csrf::CsrfIssuer;
use crate::session::{SessionManager, SessionStore};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub sessions: SessionManager,
    pub csrf: CsrfIssuer,
    pub cookies: CookiePolicy,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, store: Arc<dyn SessionStore>) -> Result<Self> {
        let sessions = SessionManager::new(store, db.clone(), &config.auth)?;
        let csrf = CsrfIssuer::new(&config.auth.signing_key())
            .map_err(|e| anyhow!("Invalid CSRF signing key: {}", e))?;
        // CSRF cookie lives as long as a fresh session
        let cookies = CookiePolicy::new(&config.cookies, sessions.ttl().num_seconds());
        Ok(Self {
            config,
            db,
            sessions,
            csrf,
            cookies,
        })
    }
}
