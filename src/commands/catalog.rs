use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required, Payload};
use crate::auth::BusinessSession;
use crate::catalog::{self, MachineItemUpdate, NewMachine, NewMachineItem, NewMasterItem};
use crate::error::AppResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/master-items",
            get(list_master_items).post(create_master_item),
        )
        .route("/api/categories", get(list_categories))
        .route("/api/machines", get(list_machines).post(create_machine))
        .route("/api/machines/:id/nayax", put(link_machine))
        .route(
            "/api/machines/:id/items",
            get(list_machine_items).post(add_machine_item),
        )
        .route(
            "/api/machine-items/:id",
            put(update_machine_item).delete(remove_machine_item),
        )
}

#[derive(Debug, Deserialize)]
struct CategoryQuery {
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterItemPayload {
    name: Option<String>,
    category: Option<String>,
    #[serde(alias = "suggested_price", alias = "price")]
    suggested_price: Option<f64>,
    #[serde(alias = "suggested_cost", alias = "cost")]
    suggested_cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachinePayload {
    name: Option<String>,
    location: Option<String>,
    #[serde(alias = "nayax_machine_id")]
    nayax_machine_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkPayload {
    #[serde(alias = "nayax_machine_id")]
    nayax_machine_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineItemPayload {
    #[serde(alias = "master_item_id")]
    master_item_id: Option<String>,
    name: Option<String>,
    category: Option<String>,
    price: Option<f64>,
    cost: Option<f64>,
    stock: Option<i64>,
}

async fn list_master_items(
    State(state): State<AppState>,
    _session: BusinessSession,
    Query(query): Query<CategoryQuery>,
) -> AppResult<Json<Value>> {
    let items = catalog::list_master_items(&state.db, query.category.as_deref())?;
    Ok(Json(json!({ "success": true, "items": items })))
}

async fn create_master_item(
    State(state): State<AppState>,
    _session: BusinessSession,
    Payload(payload): Payload<MasterItemPayload>,
) -> AppResult<Json<Value>> {
    let new = NewMasterItem {
        name: required(payload.name, "item name")?,
        category: payload.category,
        suggested_price: payload.suggested_price,
        suggested_cost: payload.suggested_cost,
    };
    let item = catalog::create_master_item(&state.db, &new)?;
    Ok(Json(json!({ "success": true, "item": item })))
}

async fn list_categories(
    State(state): State<AppState>,
    _session: BusinessSession,
) -> AppResult<Json<Value>> {
    let categories = catalog::list_categories(&state.db)?;
    Ok(Json(json!({ "success": true, "categories": categories })))
}

async fn list_machines(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let machines = catalog::list_machines(&state.db, session.business_id())?;
    Ok(Json(json!({ "success": true, "machines": machines })))
}

async fn create_machine(
    State(state): State<AppState>,
    session: BusinessSession,
    Payload(payload): Payload<MachinePayload>,
) -> AppResult<Json<Value>> {
    let new = NewMachine {
        name: required(payload.name, "machine name")?,
        location: payload.location,
        nayax_machine_id: payload.nayax_machine_id,
    };
    let machine = catalog::create_machine(&state.db, session.business_id(), &new)?;
    Ok(Json(json!({ "success": true, "machine": machine })))
}

async fn link_machine(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(machine_id): Path<String>,
    Payload(payload): Payload<LinkPayload>,
) -> AppResult<Json<Value>> {
    let machine = catalog::link_machine_to_nayax(
        &state.db,
        session.business_id(),
        &machine_id,
        payload.nayax_machine_id.as_deref(),
    )?;
    Ok(Json(json!({ "success": true, "machine": machine })))
}

async fn list_machine_items(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(machine_id): Path<String>,
) -> AppResult<Json<Value>> {
    let items = catalog::list_machine_items(&state.db, session.business_id(), &machine_id)?;
    Ok(Json(json!({ "success": true, "items": items })))
}

async fn add_machine_item(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(machine_id): Path<String>,
    Payload(payload): Payload<MachineItemPayload>,
) -> AppResult<Json<Value>> {
    let new = NewMachineItem {
        master_item_id: payload.master_item_id,
        name: payload.name,
        category: payload.category,
        price: payload.price,
        cost: payload.cost,
        stock: payload.stock.unwrap_or(0),
    };
    let item = catalog::add_item_to_machine(&state.db, session.business_id(), &machine_id, &new)?;
    Ok(Json(json!({ "success": true, "item": item })))
}

async fn update_machine_item(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(item_id): Path<String>,
    Payload(payload): Payload<MachineItemPayload>,
) -> AppResult<Json<Value>> {
    let update = MachineItemUpdate {
        name: payload.name,
        category: payload.category,
        price: payload.price,
        cost: payload.cost,
        stock: payload.stock,
    };
    let item = catalog::update_machine_item(&state.db, session.business_id(), &item_id, &update)?;
    Ok(Json(json!({ "success": true, "item": item })))
}

async fn remove_machine_item(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(item_id): Path<String>,
) -> AppResult<Json<Value>> {
    catalog::remove_machine_item(&state.db, session.business_id(), &item_id)?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use crate::commands::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn machine_item_lifecycle() {
        let app = TestApp::new();
        let token = app.sign_up("owner@example.com").await;

        let (status, body) = app
            .call(
                "POST",
                "/api/machines",
                Some(&token),
                Some(json!({ "name": "Lobby", "location": "Ground floor" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let machine_id = body["machine"]["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .call(
                "POST",
                &format!("/api/machines/{machine_id}/items"),
                Some(&token),
                Some(json!({ "name": "Cola 330ml", "category": "Drinks", "price": 2.5, "stock": 12 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let item_id = body["item"]["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .call(
                "PUT",
                &format!("/api/machine-items/{item_id}"),
                Some(&token),
                Some(json!({ "price": 2.75 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["item"]["price"], 2.75);

        let (_, body) = app
            .call("GET", &format!("/api/machines/{machine_id}/items"), Some(&token), None)
            .await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);

        let (status, _) = app
            .call("DELETE", &format!("/api/machine-items/{item_id}"), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn machines_are_scoped_to_the_session_business() {
        let app = TestApp::new();
        let owner = app.sign_up("owner@example.com").await;
        let rival = app.sign_up("rival@example.com").await;

        let (_, body) = app
            .call("POST", "/api/machines", Some(&owner), Some(json!({ "name": "Lobby" })))
            .await;
        let machine_id = body["machine"]["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .call("GET", &format!("/api/machines/{machine_id}/items"), Some(&rival), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = app.call("GET", "/api/machines", Some(&rival), None).await;
        assert!(body["machines"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn catalog_requires_a_session() {
        let app = TestApp::new();
        let (status, body) = app.call("GET", "/api/machines", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }
}
