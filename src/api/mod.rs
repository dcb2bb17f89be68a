pub mod auth;
pub mod cookies;
pub mod error;
mod tasks;
mod users;
pub mod validation;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Routes that change state with a session must carry a CSRF token
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        // Users (Admin only)
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/:id",
            get(users::get_user)
                .put(users::replace_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        // Tasks
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/tasks/:id",
            get(tasks::get_task)
                .put(tasks::replace_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::csrf_middleware,
        ));

    let api_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/csrf", get(auth::csrf_token))
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::session_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(cors_layer(&state.config.cors.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS for the configured front-end origins
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-csrftoken"),
        ])
        .allow_credentials(true)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csrf::CSRF_HEADER;

    #[test]
    fn test_csrf_header_name_matches_cors_allow_list() {
        assert_eq!(
            HeaderName::from_static("x-csrftoken"),
            HeaderName::from_bytes(CSRF_HEADER.as_bytes()).unwrap()
        );
    }
}
