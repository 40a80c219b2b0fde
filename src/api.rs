//! HTTP surface (axum).
//!
//! Shopper routes (quote, checkout, coupon check) are open; staff routes resolve a
//! session from the `Authorization: Bearer <token>` header and leave gating to the core.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use crate::authz::{Authorizer, PageDescriptor, StaffSession};
use crate::domain::aggregates::{Cart, CouponError, DiscountType, Order, OrderStatus};
use crate::domain::repository::{OrderFilter, SessionProvider};
use crate::domain::value_objects::{CouponCode, Money, OrderNumber};
use crate::lifecycle::{CheckoutRequest, DeleteConfirmation, DetailsUpdate, OrderLifecycleManager};
use crate::pricing::{PriceBreakdown, PricingEngine};
use crate::FulfillmentError;

#[derive(Clone)]
pub struct AppState {
    pub pricing: Arc<PricingEngine>,
    pub orders: Arc<OrderLifecycleManager>,
    pub authz: Arc<Authorizer>,
    pub sessions: Arc<dyn SessionProvider>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "storefront-fulfillment"})) }))
        .route("/api/v1/checkout/quote", post(quote))
        .route("/api/v1/orders", get(list_orders).post(create_order))
        .route("/api/v1/orders/:id", get(get_order).patch(update_details).delete(delete_order))
        .route("/api/v1/orders/:id/status", put(update_status))
        .route("/api/v1/coupons/:code", get(check_coupon))
        .route("/api/v1/staff/pages", get(staff_pages))
        .route("/api/v1/staff/stats", get(staff_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub struct ApiError(pub FulfillmentError);

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self { Self(err) }
}

fn status_of(err: &FulfillmentError) -> StatusCode {
    match err {
        FulfillmentError::Validation(_) => StatusCode::BAD_REQUEST,
        FulfillmentError::NotFound { .. } => StatusCode::NOT_FOUND,
        FulfillmentError::InvalidTransition { .. } | FulfillmentError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        FulfillmentError::Coupon(CouponError::Expired) => StatusCode::GONE,
        FulfillmentError::Coupon(CouponError::Inactive) => StatusCode::FORBIDDEN,
        FulfillmentError::Coupon(CouponError::UsageExceeded) => StatusCode::CONFLICT,
        FulfillmentError::Coupon(CouponError::BelowMinimum { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        FulfillmentError::Unauthenticated => StatusCode::UNAUTHORIZED,
        FulfillmentError::Unauthorized(_) => StatusCode::FORBIDDEN,
        FulfillmentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        let message = match &self.0 {
            FulfillmentError::Storage(reason) => {
                tracing::error!("storage failure: {}", reason);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": self.0.kind(), "message": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Staff session extraction
// =============================================================================

/// The staff member behind a request.
pub struct Staff(pub StaffSession);

#[async_trait]
impl FromRequestParts<AppState> for Staff {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        Ok(Staff(state.sessions.resolve_current_staff(token).await?))
    }
}

// =============================================================================
// Checkout
// =============================================================================

async fn price_checkout(state: &AppState, req: &CheckoutRequest) -> ApiResult<PriceBreakdown> {
    req.validate().map_err(FulfillmentError::from)?;
    let cart = Cart::from_items(req.items.iter().cloned());
    Ok(state.pricing.price(&cart, &req.address.region, req.delivery_type, req.coupon()).await?)
}

async fn quote(State(s): State<AppState>, Json(req): Json<CheckoutRequest>) -> ApiResult<Json<PriceBreakdown>> {
    Ok(Json(price_checkout(&s, &req).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub id: Uuid,
    pub order_number: OrderNumber,
    pub total: Money,
}

async fn create_order(State(s): State<AppState>, Json(req): Json<CheckoutRequest>) -> ApiResult<(StatusCode, Json<OrderCreated>)> {
    let pricing = price_checkout(&s, &req).await?;
    let order = s.orders.create(req.into_order_input(pricing)).await?;
    Ok((StatusCode::CREATED, Json(OrderCreated { id: order.id(), order_number: order.order_number().clone(), total: order.total() })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CouponCheck {
    pub subtotal: Option<Money>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponSummary {
    pub code: CouponCode,
    pub discount: Decimal,
    pub discount_type: DiscountType,
    pub min_amount: Option<Money>,
    /// Present when the check was made against a subtotal.
    pub discount_amount: Option<Money>,
}

async fn check_coupon(State(s): State<AppState>, Path(code): Path<String>, Query(q): Query<CouponCheck>) -> ApiResult<Json<CouponSummary>> {
    let validator = s.pricing.coupons();
    let coupon = match q.subtotal {
        Some(subtotal) => validator.validate_for(&code, subtotal).await?,
        None => validator.validate(&code).await?,
    };
    Ok(Json(CouponSummary {
        discount_amount: q.subtotal.map(|sub| coupon.discount_for(sub)),
        code: coupon.code,
        discount: coupon.discount,
        discount_type: coupon.discount_type,
        min_amount: coupon.min_amount,
    }))
}

// =============================================================================
// Staff order management
// =============================================================================

async fn list_orders(State(s): State<AppState>, Staff(staff): Staff, Query(filter): Query<OrderFilter>) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(s.orders.list(&staff, &filter).await?))
}

async fn get_order(State(s): State<AppState>, Staff(staff): Staff, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.get(&staff, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
}

async fn update_status(
    State(s): State<AppState>, Staff(staff): Staff, Path(id): Path<Uuid>, Json(r): Json<StatusChange>,
) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.update_status(&staff, id, r.status).await?))
}

async fn update_details(
    State(s): State<AppState>, Staff(staff): Staff, Path(id): Path<Uuid>, Json(r): Json<DetailsUpdate>,
) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.update_details(&staff, id, r).await?))
}

async fn delete_order(
    State(s): State<AppState>, Staff(staff): Staff, Path(id): Path<Uuid>, Query(confirm): Query<DeleteConfirmation>,
) -> ApiResult<StatusCode> {
    s.orders.remove(&staff, id, confirm).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn staff_pages(State(s): State<AppState>, Staff(staff): Staff) -> Json<Vec<PageDescriptor>> {
    Json(s.authz.pages_for(&staff))
}

async fn staff_stats(State(s): State<AppState>, Staff(staff): Staff) -> Json<BTreeSet<String>> {
    Json(s.authz.stats_for(&staff))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::Coupon;
    use crate::domain::shipping::{ShippingDefaults, ShippingRate};
    use crate::infrastructure::memory::{EventLog, InMemoryCouponStore, InMemoryOrderStore, StaticSessionProvider, StaticShippingTable};
    use crate::pricing::CouponValidator;
    use crate::resilience::StoreGuard;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> Router {
        let guard = StoreGuard::default();
        let coupon = Coupon::new(CouponCode::new("SAVE10").unwrap(), Decimal::from(10), DiscountType::Percentage)
            .unwrap()
            .with_min_amount(Money::from_units(2000));
        let coupons = CouponValidator::new(Arc::new(InMemoryCouponStore::new([coupon])), guard);
        let shipping = StaticShippingTable::new([(
            "وهران".to_string(),
            ShippingRate { home_price: Money::from_units(700), office_price: Money::from_units(500) },
        )]);
        let authz = Arc::new(Authorizer::default());
        let pricing = Arc::new(PricingEngine::new(Arc::new(shipping), coupons, ShippingDefaults::default(), guard));
        let orders = Arc::new(OrderLifecycleManager::new(
            Arc::new(InMemoryOrderStore::new()), pricing.clone(), authz.clone(), Arc::new(EventLog::new()), guard,
        ));
        let sessions = StaticSessionProvider::parse("root=admin;desk=employee:products").unwrap();
        router(AppState { pricing, orders, authz, sessions: Arc::new(sessions) })
    }

    fn checkout(coupon: Option<&str>) -> Value {
        json!({
            "customer": { "name": "Amina", "phone": "0550000000" },
            "address": { "region": "وهران", "subRegion": "Es Senia", "address": "12 rue des Oliviers" },
            "deliveryType": "office",
            "items": [{ "productId": "P1", "productName": "Caftan", "listPrice": 1500, "quantity": 2 }],
            "couponCode": coupon,
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        let req = match body {
            Some(b) => req.header(header::CONTENT_TYPE, "application/json").body(Body::from(b.to_string())).unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    fn amount(v: &Value) -> Decimal { v.as_str().unwrap().parse().unwrap() }

    #[tokio::test]
    async fn quote_prices_cart_with_coupon() {
        let app = app();
        let (status, body) = send(&app, "POST", "/api/v1/checkout/quote", None, Some(checkout(Some("save10")))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(amount(&body["subtotal"]), Decimal::from(3000));
        assert_eq!(amount(&body["shippingCost"]), Decimal::from(500));
        assert_eq!(amount(&body["discount"]), Decimal::from(300));
        assert_eq!(amount(&body["total"]), Decimal::from(3200));
    }

    #[tokio::test]
    async fn checkout_then_staff_lifecycle() {
        let app = app();
        let (status, created) = send(&app, "POST", "/api/v1/orders", None, Some(checkout(None))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(amount(&created["total"]), Decimal::from(3500));
        let id = created["id"].as_str().unwrap().to_string();
        let number = created["orderNumber"].as_str().unwrap().to_string();

        let (status, listed) = send(&app, "GET", "/api/v1/orders?status=pending", Some("root"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let uri = format!("/api/v1/orders/{}/status", id);
        let (status, order) = send(&app, "PUT", &uri, Some("root"), Some(json!({"status": "processing"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["status"], "processing");

        let (status, body) = send(&app, "PUT", &uri, Some("root"), Some(json!({"status": "delivered"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_transition");

        let (status, _) = send(&app, "DELETE", &format!("/api/v1/orders/{}?orderNumber=ORD-WRONG", id), Some("root"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, "DELETE", &format!("/api/v1/orders/{}?orderNumber={}", id, number), Some("root"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/api/v1/orders/{}", id), Some("root"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn checkout_rejects_missing_phone() {
        let mut req = checkout(None);
        req["customer"]["phone"] = json!("  ");
        let (status, body) = send(&app(), "POST", "/api/v1/orders", None, Some(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn coupon_below_minimum_is_unprocessable() {
        let (status, body) = send(&app(), "GET", "/api/v1/coupons/save10?subtotal=1500", None, None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "coupon_below_minimum");
        let (status, body) = send(&app(), "GET", "/api/v1/coupons/save10?subtotal=2500", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(amount(&body["discountAmount"]), Decimal::from(250));
    }

    #[tokio::test]
    async fn staff_routes_need_session_and_permission() {
        let app = app();
        let (status, _) = send(&app, "GET", "/api/v1/orders", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = send(&app, "GET", "/api/v1/orders", Some("desk"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "unauthorized");

        let (_, pages) = send(&app, "GET", "/api/v1/staff/pages", Some("desk"), None).await;
        let ids: Vec<&str> = pages.as_array().unwrap().iter().map(|p| p["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["products"]);
        let (_, stats) = send(&app, "GET", "/api/v1/staff/stats", Some("root"), None).await;
        assert_eq!(stats.as_array().unwrap().len(), 5);
    }
}
