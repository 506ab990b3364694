use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required, Payload};
use crate::auth::BusinessSession;
use crate::error::AppResult;
use crate::mapping::{detector, store, suggest, MappingType, NewMapping};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/mappings/suggestions", get(suggestions))
        .route("/api/mappings", get(list_mappings).post(create_mapping))
        .route("/api/mappings/:id", delete(delete_mapping))
        .route("/api/sync/status", get(sync_status))
        .route("/api/sync/run", post(run_sync))
        .route("/api/sync/reconcile", post(reconcile))
        .route("/api/inventory/unified", get(unified_inventory))
        .route("/api/system", get(system_profile))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineFilter {
    #[serde(alias = "machine_id")]
    machine_id: Option<String>,
    #[serde(alias = "min_confidence")]
    min_confidence: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingPayload {
    #[serde(alias = "machine_item_id", alias = "itemId")]
    machine_item_id: Option<String>,
    #[serde(alias = "nayax_machine_id")]
    nayax_machine_id: Option<String>,
    #[serde(alias = "selection_code", alias = "nayaxSelection")]
    selection_code: Option<String>,
    #[serde(alias = "mapping_type", alias = "type")]
    mapping_type: Option<MappingType>,
    confidence: Option<u8>,
}

async fn suggestions(
    State(state): State<AppState>,
    session: BusinessSession,
    Query(filter): Query<MachineFilter>,
) -> AppResult<Json<Value>> {
    let suggestions = suggest::suggest_mappings(
        &state.db,
        session.business_id(),
        filter.machine_id.as_deref(),
        filter.min_confidence,
    )?;
    Ok(Json(json!({
        "success": true,
        "count": suggestions.len(),
        "suggestions": suggestions,
    })))
}

async fn list_mappings(
    State(state): State<AppState>,
    session: BusinessSession,
    Query(filter): Query<MachineFilter>,
) -> AppResult<Json<Value>> {
    let mappings = store::list_mappings(
        &state.db,
        session.business_id(),
        filter.machine_id.as_deref(),
        state.config.cache_fresh_minutes,
    )?;
    Ok(Json(json!({ "success": true, "mappings": mappings })))
}

async fn create_mapping(
    State(state): State<AppState>,
    session: BusinessSession,
    Payload(payload): Payload<MappingPayload>,
) -> AppResult<Json<Value>> {
    let new = NewMapping {
        machine_item_id: required(payload.machine_item_id, "machine item")?,
        nayax_machine_id: required(payload.nayax_machine_id, "Nayax machine")?,
        selection_code: required(payload.selection_code, "selection code")?,
        mapping_type: payload.mapping_type.unwrap_or(MappingType::Direct),
        confidence: payload.confidence,
    };
    let write = store::create_mapping(
        &state.db,
        session.business_id(),
        &new,
        state.config.cache_fresh_minutes,
    )?;
    Ok(Json(json!({
        "success": true,
        "created": write.created,
        "updated": write.updated,
        "mapping": write.mapping,
    })))
}

async fn delete_mapping(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(mapping_id): Path<String>,
) -> AppResult<Json<Value>> {
    store::delete_mapping(&state.db, session.business_id(), &mapping_id)?;
    Ok(Json(json!({ "success": true })))
}

async fn sync_status(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let summary = state.engine().status_summary(session.business_id())?;
    Ok(Json(json!({ "success": true, "summary": summary })))
}

async fn run_sync(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let report = state.engine().run_sync(session.business_id()).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

async fn reconcile(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let report = store::reconcile_business(
        &state.db,
        session.business_id(),
        state.config.cache_fresh_minutes,
        Utc::now(),
    )?;
    Ok(Json(json!({ "success": true, "report": report })))
}

async fn unified_inventory(
    State(state): State<AppState>,
    session: BusinessSession,
    Query(filter): Query<MachineFilter>,
) -> AppResult<Json<Value>> {
    let items = state
        .engine()
        .unified_inventory(session.business_id(), filter.machine_id.as_deref())?;
    Ok(Json(json!({ "success": true, "items": items })))
}

async fn system_profile(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let profile = detector::detect(&state.db, state.secrets.as_ref(), session.business_id())?;
    if profile.machine_count == 0 && profile.manual_item_count == 0 && !profile.nayax_configured {
        return Ok(Json(json!({
            "success": true,
            "system": profile,
            "hint": "Add a machine or connect Nayax to get started",
        })));
    }
    Ok(Json(json!({ "success": true, "system": profile })))
}

#[cfg(test)]
mod tests {
    use crate::commands::test_support::TestApp;
    use crate::db::fixtures;
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;

    /// Signed-in business with one machine item and a cached Nayax inventory.
    async fn seeded() -> (TestApp, String, String) {
        let app = TestApp::new();
        let token = app.sign_up("owner@example.com").await;
        let (_, body) = app
            .call(
                "POST",
                "/api/machines",
                Some(&token),
                Some(json!({ "name": "Lobby", "nayaxMachineId": "501" })),
            )
            .await;
        let machine_id = body["machine"]["id"].as_str().unwrap().to_string();
        let (_, body) = app
            .call(
                "POST",
                &format!("/api/machines/{machine_id}/items"),
                Some(&token),
                Some(json!({ "name": "Coca Cola 330ml", "price": 2.0, "stock": 5 })),
            )
            .await;
        let item_id = body["item"]["id"].as_str().unwrap().to_string();

        let (_, body) = app.call("GET", "/api/auth/session", Some(&token), None).await;
        let business_id = body["session"]["businessId"].as_str().unwrap().to_string();
        {
            let conn = app.state.db.conn.lock().unwrap();
            fixtures::inventory_cache(
                &conn,
                &business_id,
                "501",
                json!([
                    { "selectionCode": "A1", "name": "Coca-Cola 330ml", "price": 2.0, "stock": 7 },
                    { "selectionCode": "B4", "name": "Sour Gummies", "price": 1.2 },
                ]),
                &Utc::now().to_rfc3339(),
            );
        }
        (app, token, item_id)
    }

    #[tokio::test]
    async fn suggest_then_map_then_view_unified() {
        let (app, token, item_id) = seeded().await;

        let (status, body) = app
            .call("GET", "/api/mappings/suggestions", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let best = &body["suggestions"][0]["candidates"][0];
        assert_eq!(best["selectionCode"], "A1");

        let mapping = json!({
            "machineItemId": item_id,
            "nayaxMachineId": "501",
            "selectionCode": "A1",
            "mappingType": "smart",
        });
        let (status, body) = app
            .call("POST", "/api/mappings", Some(&token), Some(mapping.clone()))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["created"], true);
        let (_, body) = app
            .call("POST", "/api/mappings", Some(&token), Some(mapping))
            .await;
        assert_eq!(body["created"], false);

        let (_, body) = app.call("GET", "/api/mappings", Some(&token), None).await;
        assert_eq!(body["mappings"].as_array().unwrap().len(), 1);
        assert_eq!(body["mappings"][0]["syncStatus"], "synced");

        let (_, body) = app
            .call("GET", "/api/inventory/unified", Some(&token), None)
            .await;
        assert_eq!(body["items"][0]["nayax"]["stock"], 7);

        let (_, body) = app.call("GET", "/api/sync/status", Some(&token), None).await;
        assert_eq!(body["summary"]["mappedItems"], 1);

        let (status, body) = app.call("POST", "/api/sync/reconcile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["checked"], 1);
    }

    #[tokio::test]
    async fn selection_taken_by_another_item_conflicts() {
        let (app, token, item_id) = seeded().await;
        let (_, body) = app.call("GET", "/api/machines", Some(&token), None).await;
        let machine_id = body["machines"][0]["id"].as_str().unwrap().to_string();
        let (_, body) = app
            .call(
                "POST",
                &format!("/api/machines/{machine_id}/items"),
                Some(&token),
                Some(json!({ "name": "Diet Cola", "price": 2.0 })),
            )
            .await;
        let other_id = body["item"]["id"].as_str().unwrap().to_string();

        let map = |item: &str| {
            json!({ "machineItemId": item, "nayaxMachineId": "501", "selectionCode": "A1" })
        };
        let (status, _) = app
            .call("POST", "/api/mappings", Some(&token), Some(map(&item_id)))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = app
            .call("POST", "/api/mappings", Some(&token), Some(map(&other_id)))
            .await;
        assert_eq!(status, StatusCode::CONFLICT, "{body}");
    }

    #[tokio::test]
    async fn system_profile_reports_kind() {
        let (app, token, _) = seeded().await;
        let (status, body) = app.call("GET", "/api/system", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["system"]["kind"], "manual");
    }
}
