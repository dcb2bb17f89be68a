use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cookies: CookieConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Key for signing CSRF tokens. Generated per process when not configured,
    /// which invalidates outstanding CSRF tokens on restart.
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Session lifetime in seconds (default: 24 hours)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Extend the session expiry on every authenticated request
    #[serde(default = "default_true")]
    pub sliding_sessions: bool,
    /// Bootstrap admin account ensured at startup when both are set
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            session_ttl_secs: default_session_ttl(),
            sliding_sessions: true,
            admin_username: None,
            admin_password: None,
            min_password_length: default_min_password_length(),
        }
    }
}

impl AuthConfig {
    /// Session lifetime, checked against `1..=MAX_SESSION_TTL_SECS`
    pub fn session_ttl(&self) -> Result<chrono::Duration> {
        if !(1..=MAX_SESSION_TTL_SECS).contains(&self.session_ttl_secs) {
            bail!(
                "auth.session_ttl_secs must be between 1 and {} (got {})",
                MAX_SESSION_TTL_SECS,
                self.session_ttl_secs
            );
        }
        // Within range, so the cast cannot truncate
        Ok(chrono::Duration::seconds(self.session_ttl_secs as i64))
    }

    /// Resolve the signing key, generating a random one if none is configured
    pub fn signing_key(&self) -> String {
        match &self.secret_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => {
                warn!("No auth.secret_key configured, generating an ephemeral key");
                let bytes: [u8; 32] = rand::random();
                hex::encode(bytes)
            }
        }
    }
}

/// Longest accepted session lifetime: one year
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 86_400;

fn default_session_ttl() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

fn default_min_password_length() -> usize {
    8
}

/// Attributes shared by the session cookie and the CSRF cookie
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_session_cookie")]
    pub session_name: String,
    #[serde(default = "default_csrf_cookie")]
    pub csrf_name: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    pub domain: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: SameSitePolicy,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            session_name: default_session_cookie(),
            csrf_name: default_csrf_cookie(),
            path: default_cookie_path(),
            domain: None,
            secure: false,
            same_site: SameSitePolicy::default(),
        }
    }
}

fn default_session_cookie() -> String {
    "sessionid".to_string()
}

fn default_csrf_cookie() -> String {
    "csrftoken".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    #[default]
    Lax,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_page_size() -> i64 {
    10
}

fn default_max_page_size() -> i64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            config.validate()?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    /// Reject values that would make sessions or paging unusable
    pub fn validate(&self) -> Result<()> {
        self.auth.session_ttl()?;
        if self.pagination.default_page_size < 1 || self.pagination.max_page_size < 1 {
            bail!("pagination page sizes must be at least 1");
        }
        Ok(())
    }
}
