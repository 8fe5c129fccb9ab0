//! Admin HTTP/JSON surface.
//!
//! Session-cookie-authenticated CRUD and control endpoints consumed by the
//! operator UI. Everything except login and the auth check requires a valid
//! session.

pub mod auth;
pub mod bots;
pub mod commands;
pub mod dashboard;
pub mod databases;
pub mod debug;
pub mod history;
pub mod server;
pub mod settings;
pub mod support;

use crate::state::AppContext;
use crate::supervisor::Supervisor;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{middleware, Json, Router};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AdminState {
    pub ctx: Arc<AppContext>,
    pub sup: Arc<Supervisor>,
    pub sessions: Arc<auth::Sessions>,
}

impl AdminState {
    pub fn new(ctx: Arc<AppContext>, sup: Arc<Supervisor>) -> Self {
        Self {
            ctx,
            sup,
            sessions: Arc::new(auth::Sessions::new()),
        }
    }
}

/// API error mapped to a JSON body with a Russian operator-facing message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Internal(e) => {
                tracing::error!("admin API internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Внутренняя ошибка сервера".to_string(),
                )
            }
        };

        (status, Json(json!({"success": false, "message": message}))).into_response()
    }
}

pub fn router(state: AdminState) -> Router {
    let public = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/check", get(auth::check));

    let protected = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/bots", get(bots::list).post(bots::create))
        .route("/api/bots/{id}", put(bots::update).delete(bots::remove))
        .route("/api/bots/{id}/toggle", post(bots::toggle))
        .route("/api/bots/{id}/refresh-info", post(bots::refresh_info))
        .route(
            "/api/databases",
            get(databases::list).post(databases::create),
        )
        .route(
            "/api/databases/{id}",
            get(databases::get_one)
                .put(databases::update)
                .delete(databases::remove),
        )
        .route(
            "/api/bots/{id}/commands",
            get(commands::list).post(commands::create),
        )
        .route(
            "/api/bots/{id}/commands/{cmd_id}",
            put(commands::update).delete(commands::remove),
        )
        .route(
            "/api/bots/{id}/multi-command-context/{cmd_id}",
            delete(commands::clear_context),
        )
        .route(
            "/api/bots/{id}/chat-history",
            get(history::list).delete(history::clear),
        )
        .route(
            "/api/bots/{id}/chat-history/{entry_id}",
            delete(history::remove),
        )
        .route("/api/dashboard/stats", get(dashboard::stats))
        .route(
            "/api/dashboard/charts/messages",
            get(dashboard::messages_chart),
        )
        .route(
            "/api/dashboard/charts/ai-requests",
            get(dashboard::ai_requests_chart),
        )
        .route("/api/dashboard/charts/system", get(dashboard::system_chart))
        .route("/api/debug/logs", get(debug::logs))
        .route("/api/debug/stats", get(debug::stats))
        .route("/api/settings", get(settings::list).put(settings::update))
        .route("/api/support/chat", post(support::chat))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    public
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
