//! Session and CSRF cookie attributes.
//!
//! Both cookies are built from the same policy so their path, domain,
//! secure flag, SameSite and lifetime always agree.

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};

use crate::config::{CookieConfig, SameSitePolicy};

#[derive(Debug, Clone)]
pub struct CookiePolicy {
    session_name: String,
    csrf_name: String,
    path: String,
    domain: Option<String>,
    secure: bool,
    same_site: SameSite,
    max_age_secs: i64,
}

impl CookiePolicy {
    pub fn new(config: &CookieConfig, max_age_secs: i64) -> Self {
        let same_site = match config.same_site {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::None => SameSite::None,
        };
        Self {
            session_name: config.session_name.clone(),
            csrf_name: config.csrf_name.clone(),
            path: config.path.clone(),
            domain: config.domain.clone(),
            // Browsers drop SameSite=None cookies that are not Secure
            secure: config.secure || same_site == SameSite::None,
            same_site,
            max_age_secs,
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn csrf_name(&self) -> &str {
        &self.csrf_name
    }

    /// Session cookie living until the session's own expiry
    pub fn session_cookie(&self, token: String, expires_at: DateTime<Utc>) -> Cookie<'static> {
        let remaining = (expires_at - Utc::now()).num_seconds().max(0);
        self.build(self.session_name.clone(), token, true, remaining)
    }

    /// CSRF cookie, readable by page scripts
    pub fn csrf_cookie(&self, token: String) -> Cookie<'static> {
        self.build(self.csrf_name.clone(), token, false, self.max_age_secs)
    }

    /// Expired session cookie that makes the browser drop it
    pub fn clear_session_cookie(&self) -> Cookie<'static> {
        self.build(self.session_name.clone(), String::new(), true, 0)
    }

    fn build(&self, name: String, value: String, http_only: bool, max_age_secs: i64) -> Cookie<'static> {
        let mut builder = Cookie::build((name, value))
            .path(self.path.clone())
            .http_only(http_only)
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(time::Duration::seconds(max_age_secs));

        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }

        builder.build()
    }
}
