use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required, Payload};
use crate::auth::BusinessSession;
use crate::error::{AppError, AppResult};
use crate::nayax::{credentials, inventory, machines};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/nayax/credentials",
            get(credential_status)
                .put(save_credentials)
                .delete(delete_credentials),
        )
        .route("/api/nayax/credentials/test", post(test_credentials))
        .route("/api/nayax/machines", get(list_machines))
        .route("/api/nayax/machines/sync", post(sync_machines))
        .route("/api/nayax/machines/:id/refresh", post(refresh_machine))
        .route("/api/nayax/machines/:id/inventory", get(machine_inventory))
        .route("/api/nayax/refresh-all", post(refresh_all))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsPayload {
    #[serde(alias = "base_url", alias = "apiUrl")]
    base_url: Option<String>,
    #[serde(alias = "api_token", alias = "apiToken", alias = "token")]
    api_token: Option<String>,
}

async fn credential_status(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let status =
        credentials::credential_status(&state.db, state.secrets.as_ref(), session.business_id())?;
    Ok(Json(json!({ "success": true, "credentials": status })))
}

async fn save_credentials(
    State(state): State<AppState>,
    session: BusinessSession,
    Payload(payload): Payload<CredentialsPayload>,
) -> AppResult<Json<Value>> {
    let token = required(payload.api_token, "Nayax API token")?;
    let base_url = payload
        .base_url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| state.config.nayax_base_url.clone());
    let status = credentials::save_credentials(
        &state.db,
        state.secrets.as_ref(),
        session.business_id(),
        &base_url,
        &token,
    )?;
    Ok(Json(json!({ "success": true, "credentials": status })))
}

async fn delete_credentials(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let removed =
        credentials::delete_credentials(&state.db, state.secrets.as_ref(), session.business_id())?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}

async fn test_credentials(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let result = credentials::test_credentials(
        &state.db,
        state.secrets.as_ref(),
        &state.nayax,
        session.business_id(),
    )
    .await?;
    Ok(Json(json!({ "success": result.success, "connection": result })))
}

async fn list_machines(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let machines = machines::list_machines(&state.db, session.business_id())?;
    Ok(Json(json!({ "success": true, "machines": machines })))
}

async fn sync_machines(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let machines = machines::sync_machines(
        &state.db,
        state.secrets.as_ref(),
        &state.nayax,
        session.business_id(),
    )
    .await?;
    Ok(Json(json!({ "success": true, "count": machines.len(), "machines": machines })))
}

async fn refresh_machine(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(nayax_machine_id): Path<String>,
) -> AppResult<Json<Value>> {
    let outcome = inventory::refresh_machine_inventory(
        &state.db,
        state.secrets.as_ref(),
        &state.nayax,
        session.business_id(),
        &nayax_machine_id,
    )
    .await?;
    Ok(Json(json!({ "success": outcome.refreshed, "outcome": outcome })))
}

async fn machine_inventory(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(nayax_machine_id): Path<String>,
) -> AppResult<Json<Value>> {
    let cache = inventory::read_cache(&state.db, session.business_id(), &nayax_machine_id)?
        .ok_or_else(|| AppError::NotFound("No cached inventory for this machine".into()))?;
    Ok(Json(json!({ "success": true, "inventory": cache })))
}

async fn refresh_all(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let outcomes = inventory::refresh_all_mapped(
        &state.db,
        state.secrets.as_ref(),
        &state.nayax,
        session.business_id(),
    )
    .await?;
    let failed = outcomes.iter().filter(|o| !o.refreshed).count();
    Ok(Json(json!({ "success": true, "failed": failed, "outcomes": outcomes })))
}
