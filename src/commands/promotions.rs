use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required, Payload};
use crate::auth::BusinessSession;
use crate::error::{AppError, AppResult};
use crate::promotions::{self, DiscountKind, NewAd, NewDiscount};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/promotions/ads", get(list_ads).post(create_ad))
        .route("/api/promotions/ads/:id", delete(delete_ad))
        .route("/api/promotions/ads/:id/active", put(set_ad_active))
        .route("/api/discounts", get(list_discounts).post(create_discount))
        .route("/api/discounts/:id", delete(delete_discount))
        .route("/api/public/discounts/validate", post(validate_discount))
        .route("/api/public/discounts/redeem", post(redeem_discount))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdsQuery {
    #[serde(default, alias = "active_only", alias = "active")]
    active_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdPayload {
    #[serde(alias = "machine_id")]
    machine_id: Option<String>,
    title: Option<String>,
    #[serde(alias = "content", alias = "message")]
    body: Option<String>,
    #[serde(alias = "is_active", alias = "active")]
    is_active: Option<bool>,
    #[serde(alias = "starts_at", alias = "startDate")]
    starts_at: Option<String>,
    #[serde(alias = "ends_at", alias = "endDate")]
    ends_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivePayload {
    #[serde(alias = "is_active", alias = "isActive")]
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscountPayload {
    #[serde(alias = "machine_id")]
    machine_id: Option<String>,
    #[serde(alias = "machine_item_id", alias = "itemId")]
    machine_item_id: Option<String>,
    code: Option<String>,
    #[serde(alias = "type", alias = "discountType")]
    kind: Option<DiscountKind>,
    #[serde(alias = "value")]
    amount: Option<f64>,
    #[serde(alias = "max_uses")]
    max_uses: Option<i64>,
    #[serde(alias = "starts_at")]
    starts_at: Option<String>,
    #[serde(alias = "expires_at", alias = "endDate")]
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodePayload {
    #[serde(alias = "machine_id")]
    machine_id: Option<String>,
    code: Option<String>,
    #[serde(alias = "machine_item_id", alias = "itemId")]
    machine_item_id: Option<String>,
    price: Option<f64>,
}

async fn list_ads(
    State(state): State<AppState>,
    session: BusinessSession,
    Query(query): Query<AdsQuery>,
) -> AppResult<Json<Value>> {
    let ads = promotions::list_ads(&state.db, session.business_id(), query.active_only)?;
    Ok(Json(json!({ "success": true, "ads": ads })))
}

async fn create_ad(
    State(state): State<AppState>,
    session: BusinessSession,
    Payload(payload): Payload<AdPayload>,
) -> AppResult<Json<Value>> {
    let new = NewAd {
        machine_id: payload.machine_id,
        title: required(payload.title, "ad title")?,
        body: payload.body,
        is_active: payload.is_active,
        starts_at: payload.starts_at,
        ends_at: payload.ends_at,
    };
    let ad = promotions::create_ad(&state.db, session.business_id(), &new)?;
    Ok(Json(json!({ "success": true, "ad": ad })))
}

async fn set_ad_active(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(ad_id): Path<String>,
    Payload(payload): Payload<ActivePayload>,
) -> AppResult<Json<Value>> {
    let active = payload
        .active
        .ok_or_else(|| AppError::BadRequest("Missing active flag".into()))?;
    let ad = promotions::set_ad_active(&state.db, session.business_id(), &ad_id, active)?;
    Ok(Json(json!({ "success": true, "ad": ad })))
}

async fn delete_ad(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(ad_id): Path<String>,
) -> AppResult<Json<Value>> {
    promotions::delete_ad(&state.db, session.business_id(), &ad_id)?;
    Ok(Json(json!({ "success": true })))
}

async fn list_discounts(
    State(state): State<AppState>,
    session: BusinessSession,
) -> AppResult<Json<Value>> {
    let discounts = promotions::list_discounts(&state.db, session.business_id())?;
    Ok(Json(json!({ "success": true, "discounts": discounts })))
}

async fn create_discount(
    State(state): State<AppState>,
    session: BusinessSession,
    Payload(payload): Payload<DiscountPayload>,
) -> AppResult<Json<Value>> {
    let new = NewDiscount {
        machine_id: payload.machine_id,
        machine_item_id: payload.machine_item_id,
        code: required(payload.code, "discount code")?,
        kind: payload.kind.unwrap_or(DiscountKind::Percent),
        amount: payload
            .amount
            .ok_or_else(|| AppError::BadRequest("Missing discount amount".into()))?,
        max_uses: payload.max_uses,
        starts_at: payload.starts_at,
        expires_at: payload.expires_at,
    };
    let discount = promotions::create_discount(&state.db, session.business_id(), &new)?;
    Ok(Json(json!({ "success": true, "discount": discount })))
}

async fn delete_discount(
    State(state): State<AppState>,
    session: BusinessSession,
    Path(discount_id): Path<String>,
) -> AppResult<Json<Value>> {
    promotions::delete_discount(&state.db, session.business_id(), &discount_id)?;
    Ok(Json(json!({ "success": true })))
}

async fn validate_discount(
    State(state): State<AppState>,
    Payload(payload): Payload<CodePayload>,
) -> AppResult<Json<Value>> {
    let machine_id = required(payload.machine_id, "machine")?;
    let code = required(payload.code, "discount code")?;
    let quote = promotions::validate_discount(
        &state.db,
        &machine_id,
        &code,
        payload.machine_item_id.as_deref(),
        payload.price,
    )?;
    Ok(Json(json!({ "success": true, "valid": true, "quote": quote })))
}

async fn redeem_discount(
    State(state): State<AppState>,
    Payload(payload): Payload<CodePayload>,
) -> AppResult<Json<Value>> {
    let machine_id = required(payload.machine_id, "machine")?;
    let code = required(payload.code, "discount code")?;
    let quote = promotions::redeem_discount(
        &state.db,
        &machine_id,
        &code,
        payload.machine_item_id.as_deref(),
        payload.price,
    )?;
    Ok(Json(json!({ "success": true, "quote": quote })))
}
