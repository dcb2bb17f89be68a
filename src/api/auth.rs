use axum::{
    async_trait,
    body::Body,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{header::SET_COOKIE, request::Parts, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::ApiError;
use crate::access::Caller;
use crate::csrf::{CsrfIssuer, CSRF_HEADER};
use crate::db::{LoginRequest, MeResponse, User, UserResponse};
use crate::session::AuthError;
use crate::AppState;

/// The authenticated caller, placed in request extensions by
/// [`session_middleware`]
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    /// Raw session token from the cookie
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CurrentUser {
    pub fn caller(&self) -> Caller {
        Caller::from(&self.user)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::from(AuthError::Unauthenticated))
    }
}

#[derive(Debug, Serialize)]
pub struct CsrfResponse {
    pub csrf_token: String,
}

/// Resolve the session cookie into a [`CurrentUser`].
///
/// Requests without a live session pass through anonymously; handlers that
/// need a caller reject them. With sliding sessions the cookie is re-sent
/// with the renewed lifetime unless the handler already set it.
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let jar = CookieJar::from_headers(request.headers());
    let token = jar
        .get(state.cookies.session_name())
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty());

    let mut resolved = None;
    if let Some(token) = token {
        match state.sessions.resolve(&token).await {
            Ok(session) => {
                let current = CurrentUser {
                    user: session.user,
                    token,
                    expires_at: session.expires_at,
                };
                request.extensions_mut().insert(current.clone());
                resolved = Some(current);
            }
            Err(AuthError::Unauthenticated) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let mut response = next.run(request).await;

    if let Some(current) = resolved.filter(|_| state.config.auth.sliding_sessions) {
        let prefix = format!("{}=", state.cookies.session_name());
        let already_set = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .any(|v| v.to_str().map(|s| s.starts_with(&prefix)).unwrap_or(false));

        if !already_set {
            let cookie = state.cookies.session_cookie(current.token, current.expires_at);
            if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
    }

    Ok(response)
}

/// Reject state-changing requests made with a session but without a valid
/// CSRF token header
pub async fn csrf_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if request.method().is_safe() {
        return Ok(next.run(request).await);
    }

    if let Some(current) = request.extensions().get::<CurrentUser>() {
        let provided = request
            .headers()
            .get(CSRF_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::forbidden("CSRF Failed: CSRF token missing"))?;

        let binding = CsrfIssuer::binding_for(Some(&current.token));
        if !state.csrf.verify(&binding, provided) {
            warn!(user_id = current.user.id, "Rejected request with bad CSRF token");
            return Err(ApiError::forbidden("CSRF Failed: CSRF token incorrect"));
        }
    }

    Ok(next.run(request).await)
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<MeResponse>), ApiError> {
    let Json(request) = body?;
    let user = match state
        .sessions
        .authenticate(&request.username, &request.password)
        .await
    {
        Ok(user) => user,
        Err(AuthError::InvalidCredentials) => {
            warn!(username = %request.username, "Failed login attempt");
            return Err(ApiError::invalid_credentials());
        }
        Err(e) => return Err(e.into()),
    };

    // A previous session carried by this browser ends here
    if let Some(previous) = jar.get(state.cookies.session_name()) {
        state.sessions.destroy(previous.value()).await?;
    }

    let issued = state.sessions.create_session(&user).await?;
    let csrf_token = state
        .csrf
        .issue(&CsrfIssuer::binding_for(Some(&issued.token)));

    info!(user_id = user.id, username = %user.username, "User logged in");

    let jar = jar
        .add(state.cookies.session_cookie(issued.token, issued.expires_at))
        .add(state.cookies.csrf_cookie(csrf_token));

    Ok((
        jar,
        Json(MeResponse {
            user: UserResponse::from(user),
        }),
    ))
}

/// Logout endpoint
pub async fn logout(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), ApiError> {
    state.sessions.destroy(&current.token).await?;
    info!(user_id = current.user.id, username = %current.user.username, "User logged out");

    let jar = jar.add(state.cookies.clear_session_cookie());
    Ok((jar, StatusCode::NO_CONTENT))
}

/// Get the current user
pub async fn me(current: CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        user: UserResponse::from(current.user),
    })
}

/// Issue a CSRF token bound to the caller's session, if any
pub async fn csrf_token(
    State(state): State<Arc<AppState>>,
    current: Option<CurrentUser>,
    jar: CookieJar,
) -> (CookieJar, Json<CsrfResponse>) {
    let binding = CsrfIssuer::binding_for(current.as_ref().map(|c| c.token.as_str()));
    let token = state.csrf.issue(&binding);

    let jar = jar.add(state.cookies.csrf_cookie(token.clone()));
    (jar, Json(CsrfResponse { csrf_token: token }))
}
