//! Session-cookie authentication.
//!
//! Sessions live in memory: a uuid token in an httpOnly cookie maps to the
//! logged-in email. Passwords are hashed with Argon2id.

use super::{AdminState, ApiError};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::logbuf::LogCategory;

pub const SESSION_COOKIE: &str = "botfleet_session";

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// In-memory session table: token -> email.
pub struct Sessions {
    tokens: RwLock<HashMap<String, String>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, email: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens.write().insert(token.clone(), email.to_string());
        token
    }

    pub fn validate(&self, token: &str) -> bool {
        self.tokens.read().contains_key(token)
    }

    pub fn destroy(&self, token: &str) {
        self.tokens.write().remove(token);
    }
}

impl Default for Sessions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AdminState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    let user = state
        .ctx
        .store
        .find_user_by_email(&body.email)
        .map_err(ApiError::Internal)?;

    let valid = user
        .as_ref()
        .map(|u| verify_password(&body.password, &u.password_hash))
        .unwrap_or(false);

    if !valid {
        state.ctx.logs.warning(
            LogCategory::Auth,
            format!("failed login attempt for {}", body.email),
        );
        return Err(ApiError::Unauthorized(
            "Неверный email или пароль".to_string(),
        ));
    }

    let token = state.sessions.create(&body.email);
    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    state
        .ctx
        .logs
        .success(LogCategory::Auth, format!("{} logged in", body.email));

    Ok((
        jar.add(cookie),
        Json(json!({"success": true, "message": "Вход выполнен"})),
    ))
}

pub async fn logout(
    State(state): State<AdminState>,
    jar: CookieJar,
) -> (CookieJar, Json<Value>) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.destroy(cookie.value());
    }

    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());
    (jar, Json(json!({"success": true})))
}

pub async fn check(State(state): State<AdminState>, jar: CookieJar) -> Json<Value> {
    let authenticated = jar
        .get(SESSION_COOKIE)
        .map(|c| state.sessions.validate(c.value()))
        .unwrap_or(false);

    Json(json!({"authenticated": authenticated}))
}

/// Middleware for everything behind the login wall.
pub async fn require_auth(
    State(state): State<AdminState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authenticated = jar
        .get(SESSION_COOKIE)
        .map(|c| state.sessions.validate(c.value()))
        .unwrap_or(false);

    if !authenticated {
        return Err(ApiError::Unauthorized("Требуется авторизация".to_string()));
    }

    Ok(next.run(req).await)
}
