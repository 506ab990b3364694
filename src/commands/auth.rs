use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::{required, Payload};
use crate::auth::{self, BusinessSession, SESSION_COOKIE};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(session))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPayload {
    #[serde(alias = "name", alias = "business_name")]
    business_name: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: Option<String>,
    password: Option<String>,
}

fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}")
}

/// Runs bcrypt off the async workers.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("auth task failed: {e}")))?
}

async fn register(
    State(state): State<AppState>,
    Payload(payload): Payload<RegisterPayload>,
) -> AppResult<Response> {
    let name = required(payload.business_name, "business name")?;
    let email = required(payload.email, "email")?;
    let password = payload.password.unwrap_or_default();
    let hours = state.config.session_hours;

    let db = state.db.clone();
    let (registered, login) = blocking(move || {
        let registered = auth::register_business(&db, &name, &email, &password)?;
        let login = auth::login(&db, &registered.email, &password, hours)?;
        Ok((registered, login))
    })
    .await?;

    let cookie = session_cookie(&login.token, hours * 3600);
    let body = json!({
        "success": true,
        "business": registered,
        "token": login.token,
        "session": login.session,
    });
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

async fn login(
    State(state): State<AppState>,
    Payload(payload): Payload<LoginPayload>,
) -> AppResult<Response> {
    let email = required(payload.email, "email")?;
    let password = payload.password.unwrap_or_default();
    let hours = state.config.session_hours;

    let db = state.db.clone();
    let result = blocking(move || auth::login(&db, &email, &password, hours)).await?;

    let cookie = session_cookie(&result.token, hours * 3600);
    let body = json!({ "success": true, "token": result.token, "session": result.session });
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

async fn logout(
    State(state): State<AppState>,
    session: Option<BusinessSession>,
) -> AppResult<Response> {
    let signed_out = match session {
        Some(session) => auth::logout(&state.db, &session.token)?,
        None => false,
    };
    let body = json!({ "success": true, "signedOut": signed_out });
    Ok(([(header::SET_COOKIE, session_cookie("", 0))], Json(body)).into_response())
}

async fn session(session: BusinessSession) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "session": session.session }))
}
