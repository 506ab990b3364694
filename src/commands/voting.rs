use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required, Payload};
use crate::auth::BusinessSession;
use crate::error::{AppError, AppResult};
use crate::promotions;
use crate::state::AppState;
use crate::voting::{self, VoteType};

const DEFAULT_ANALYTICS_DAYS: i64 = 30;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/machines/:id/voting-list", get(voting_list))
        .route("/api/voting/analytics", get(analytics))
        .route("/api/public/machines/:id/voting-list", get(public_voting_list))
        .route("/api/public/machines/:id/ads", get(public_ads))
        .route("/api/public/vote", post(vote))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VotePayload {
    #[serde(alias = "voting_list_item_id", alias = "itemId", alias = "item_id")]
    voting_list_item_id: Option<String>,
    #[serde(alias = "vote_type", alias = "vote")]
    vote_type: Option<VoteType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsQuery {
    days: Option<i64>,
    #[serde(alias = "machine_id")]
    machine_id: Option<String>,
}

async fn voting_list(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(machine_id): Path<String>,
) -> AppResult<Json<Value>> {
    let list = voting::get_voting_list(&state.db, session.business_id(), &machine_id)?;
    Ok(Json(json!({ "success": true, "votingList": list })))
}

async fn public_voting_list(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
) -> AppResult<Json<Value>> {
    let list = voting::public_voting_list(&state.db, &machine_id)?;
    Ok(Json(json!({ "success": true, "votingList": list })))
}

async fn public_ads(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
) -> AppResult<Json<Value>> {
    let ads = promotions::ads_for_machine(&state.db, &machine_id)?;
    Ok(Json(json!({ "success": true, "ads": ads })))
}

async fn vote(
    State(state): State<AppState>,
    Payload(payload): Payload<VotePayload>,
) -> AppResult<Json<Value>> {
    let item_id = required(payload.voting_list_item_id, "voting item")?;
    let vote_type = payload
        .vote_type
        .ok_or_else(|| AppError::BadRequest("Missing vote type".into()))?;
    let totals = voting::record_vote(&state.db, &item_id, vote_type)?;
    Ok(Json(json!({ "success": true, "totals": totals })))
}

async fn analytics(
    State(state): State<AppState>,
    session: BusinessSession,
    Query(query): Query<AnalyticsQuery>,
) -> AppResult<Json<Value>> {
    let report = voting::vote_analytics(
        &state.db,
        session.business_id(),
        query.days.unwrap_or(DEFAULT_ANALYTICS_DAYS),
        query.machine_id.as_deref(),
    )?;
    Ok(Json(json!({ "success": true, "analytics": report })))
}

#[cfg(test)]
mod tests {
    use crate::commands::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn customers_vote_without_a_session() {
        let app = TestApp::new();
        let token = app.sign_up("owner@example.com").await;
        let (_, body) = app
            .call("POST", "/api/machines", Some(&token), Some(json!({ "name": "Lobby" })))
            .await;
        let machine_id = body["machine"]["id"].as_str().unwrap().to_string();
        app.call(
            "POST",
            &format!("/api/machines/{machine_id}/items"),
            Some(&token),
            Some(json!({ "name": "Gum", "price": 1.0 })),
        )
        .await;

        let (status, body) = app
            .call("GET", &format!("/api/public/machines/{machine_id}/voting-list"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let item_id = body["votingList"]["items"][0]["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .call(
                "POST",
                "/api/public/vote",
                None,
                Some(json!({ "votingListItemId": item_id, "voteType": "vote_in" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["totals"]["voteIn"], 1);

        let (status, body) = app
            .call("GET", "/api/voting/analytics?days=7", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["analytics"]["totalIn"], 1);
    }

    #[tokio::test]
    async fn vote_on_unknown_item_is_not_found() {
        let app = TestApp::new();
        let (status, _) = app
            .call(
                "POST",
                "/api/public/vote",
                None,
                Some(json!({ "itemId": "missing", "vote": "vote_out" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
