use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::analytics;
use crate::auth::BusinessSession;
use crate::error::AppResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/dashboard", get(dashboard))
}

async fn dashboard(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let dashboard = analytics::dashboard(
        &state.db,
        state.secrets.as_ref(),
        session.business_id(),
        state.config.cache_fresh_minutes,
    )?;
    Ok(Json(json!({ "success": true, "dashboard": dashboard })))
}

#[cfg(test)]
mod tests {
    use crate::commands::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn dashboard_reflects_the_business_only() {
        let app = TestApp::new();
        let owner = app.sign_up("owner@example.com").await;
        let rival = app.sign_up("rival@example.com").await;
        let (_, body) = app
            .call("POST", "/api/machines", Some(&owner), Some(json!({ "name": "Lobby" })))
            .await;
        let machine_id = body["machine"]["id"].as_str().unwrap().to_string();
        app.call(
            "POST",
            &format!("/api/machines/{machine_id}/items"),
            Some(&owner),
            Some(json!({ "name": "Water", "price": 1.25, "stock": 4 })),
        )
        .await;

        let (status, body) = app.call("GET", "/api/dashboard", Some(&owner), None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["dashboard"]["machineCount"], 1);
        assert_eq!(body["dashboard"]["inventoryValue"], 5.0);
        assert_eq!(body["dashboard"]["systemKind"], "manual");

        let (_, body) = app.call("GET", "/api/dashboard", Some(&rival), None).await;
        assert_eq!(body["dashboard"]["machineCount"], 0);
        assert_eq!(body["dashboard"]["systemKind"], "empty");
    }
}
