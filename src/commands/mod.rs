//! HTTP handlers. Each submodule owns one area of the `/api` surface and
//! exposes a `routes()` fragment; `router` stitches them together.
//!
//! Handlers stay thin: parse the payload, resolve the session, call into
//! the domain module and wrap the result in `{ "success": true, ... }`.

use axum::{
    async_trait,
    extract::{FromRequest, Request, State},
    http::Method,
    routing::get,
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::data_helpers::non_empty;
use crate::diagnostics;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub mod analytics;
pub mod auth;
pub mod catalog;
pub mod mapping;
pub mod nayax;
pub mod promotions;
pub mod voting;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .merge(auth::routes())
        .merge(catalog::routes())
        .merge(voting::routes())
        .merge(promotions::routes())
        .merge(nayax::routes())
        .merge(mapping::routes())
        .merge(analytics::routes())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let about = diagnostics::about(&state.db)?;
    let version = about.version;
    Ok(Json(json!({ "success": true, "version": version, "about": about })))
}

async fn not_found() -> AppError {
    AppError::NotFound("No such endpoint".into())
}

// ---------------------------------------------------------------------------
// Payload extraction
// ---------------------------------------------------------------------------

/// JSON body whose rejection renders as the standard error body.
pub struct Payload<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Trimmed, non-empty string field.
pub(crate) fn required(value: Option<String>, label: &str) -> AppResult<String> {
    non_empty(value).ok_or_else(|| AppError::BadRequest(format!("Missing {label}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::state::AppState;

    pub struct TestApp {
        pub state: AppState,
        pub router: Router,
    }

    impl TestApp {
        pub fn new() -> Self {
            let state = AppState::for_test();
            let router = super::router(state.clone());
            Self { state, router }
        }

        pub async fn call(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let body = match body {
                Some(json) => {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let response = self
                .router
                .clone()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, json)
        }

        /// Register a business and return its session token.
        pub async fn sign_up(&self, email: &str) -> String {
            let (status, body) = self
                .call(
                    "POST",
                    "/api/auth/register",
                    None,
                    Some(serde_json::json!({
                        "businessName": "Snack Co",
                        "email": email,
                        "password": "correct-horse",
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            body["token"].as_str().unwrap().to_string()
        }
    }
}
