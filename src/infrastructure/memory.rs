//! In-process stores, used when no database is configured and in tests.
//!
//! Each store keeps its records behind a single tokio lock, so a read-check-write on one
//! record is one critical section.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::authz::{Role, StaffSession};
use crate::domain::aggregates::{Coupon, Order, OrderPatch};
use crate::domain::events::OrderEvent;
use crate::domain::repository::{CouponStore, EventPublisher, OrderFilter, OrderStore, SessionProvider, ShippingTable};
use crate::domain::shipping::{normalize_region, ShippingRate};
use crate::domain::value_objects::CouponCode;
use crate::{FulfillmentError, Result};

#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self { Self::default() }

    pub async fn len(&self) -> usize { self.orders.read().await.len() }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: &Order) -> Result<Order> {
        let mut orders = self.orders.write().await;
        if orders.values().any(|o| o.order_number() == order.order_number()) {
            return Err(FulfillmentError::Validation(format!("order number {} already exists", order.order_number())));
        }
        orders.insert(order.id(), order.clone());
        Ok(order.clone())
    }

    async fn get_order(&self, id: Uuid) -> Result<Order> {
        self.orders.read().await.get(&id).cloned().ok_or_else(|| FulfillmentError::not_found("order", id))
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut found: Vec<Order> = self.orders.read().await.values().filter(|o| filter.matches(o)).cloned().collect();
        found.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then_with(|| b.id().cmp(&a.id())));
        Ok(found)
    }

    async fn update_order(&self, id: Uuid, patch: &OrderPatch, expected_version: u64) -> Result<Order> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or_else(|| FulfillmentError::not_found("order", id))?;
        if order.version() != expected_version {
            return Err(FulfillmentError::ConcurrencyConflict(order.order_number().to_string()));
        }
        order.apply(patch, Utc::now());
        Ok(order.clone())
    }

    async fn delete_order(&self, id: Uuid) -> Result<()> {
        self.orders.write().await.remove(&id).map(|_| ()).ok_or_else(|| FulfillmentError::not_found("order", id))
    }
}

#[derive(Debug, Default)]
struct CouponBook {
    coupons: HashMap<CouponCode, Coupon>,
    /// Order id to the coupon it used.
    redemptions: HashMap<Uuid, CouponCode>,
}

#[derive(Debug, Default)]
pub struct InMemoryCouponStore {
    book: Mutex<CouponBook>,
}

impl InMemoryCouponStore {
    pub fn new(coupons: impl IntoIterator<Item = Coupon>) -> Self {
        let coupons = coupons.into_iter().map(|c| (c.code.clone(), c)).collect();
        Self { book: Mutex::new(CouponBook { coupons, redemptions: HashMap::new() }) }
    }
}

#[async_trait]
impl CouponStore for InMemoryCouponStore {
    async fn get_by_code(&self, code: &CouponCode) -> Result<Coupon> {
        self.book.lock().await.coupons.get(code).cloned().ok_or_else(|| FulfillmentError::not_found("coupon", code))
    }

    async fn increment_usage(&self, code: &CouponCode, order_id: Uuid) -> Result<Coupon> {
        let mut book = self.book.lock().await;
        let CouponBook { coupons, redemptions } = &mut *book;
        let coupon = coupons.get_mut(code).ok_or_else(|| FulfillmentError::not_found("coupon", code))?;
        if redemptions.get(&order_id) == Some(code) {
            return Ok(coupon.clone());
        }
        coupon.redeem(Utc::now())?;
        redemptions.insert(order_id, code.clone());
        Ok(coupon.clone())
    }

    async fn release_usage(&self, code: &CouponCode, order_id: Uuid) -> Result<()> {
        let mut book = self.book.lock().await;
        if book.redemptions.get(&order_id) != Some(code) {
            return Ok(());
        }
        book.redemptions.remove(&order_id);
        if let Some(coupon) = book.coupons.get_mut(code) {
            coupon.release();
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticShippingTable {
    rates: HashMap<String, ShippingRate>,
}

impl StaticShippingTable {
    pub fn new(rates: impl IntoIterator<Item = (String, ShippingRate)>) -> Self {
        Self { rates: rates.into_iter().map(|(region, rate)| (normalize_region(&region), rate)).collect() }
    }
}

#[async_trait]
impl ShippingTable for StaticShippingTable {
    async fn get_rate(&self, region: &str) -> Result<Option<ShippingRate>> {
        Ok(self.rates.get(&normalize_region(region)).copied())
    }
}

/// Bearer-token table of staff sessions.
///
/// Authentication itself happens upstream; this only maps an already-issued token to
/// the role and grants it carries.
#[derive(Debug, Default, Clone)]
pub struct StaticSessionProvider {
    sessions: HashMap<String, StaffSession>,
}

impl StaticSessionProvider {
    pub fn new(sessions: impl IntoIterator<Item = (String, StaffSession)>) -> Self {
        Self { sessions: sessions.into_iter().collect() }
    }

    /// Parses `token=role[:perm,perm];token=role...`.
    pub fn parse(table: &str) -> std::result::Result<Self, String> {
        let mut sessions = HashMap::new();
        for entry in table.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, grant) = entry.split_once('=').ok_or_else(|| format!("missing '=' in staff token entry '{}'", entry))?;
            let (role, perms) = grant.split_once(':').unwrap_or((grant, ""));
            let role: Role = role.parse()?;
            let session = StaffSession::from_grants(role, perms.split(',').filter(|p| !p.trim().is_empty()));
            sessions.insert(token.trim().to_string(), session);
        }
        Ok(Self { sessions })
    }

    pub fn len(&self) -> usize { self.sessions.len() }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn resolve_current_staff(&self, token: Option<&str>) -> Result<StaffSession> {
        token.and_then(|t| self.sessions.get(t)).cloned().ok_or(FulfillmentError::Unauthenticated)
    }
}

/// Keeps published events in memory; handy for assertions.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<OrderEvent>>,
}

impl EventLog {
    pub fn new() -> Self { Self::default() }

    pub async fn events(&self) -> Vec<OrderEvent> { self.events.lock().await.clone() }
}

#[async_trait]
impl EventPublisher for EventLog {
    async fn publish(&self, event: &OrderEvent) -> Result<()> {
        tracing::debug!(kind = event.kind(), "order event");
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Permission;
    use crate::domain::aggregates::{CouponError, DiscountType};
    use crate::domain::value_objects::Money;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_redemptions_respect_limit() {
        let coupon = Coupon::new(CouponCode::new("LAST").unwrap(), Decimal::from(100), DiscountType::Fixed).unwrap().with_max_uses(3);
        let store = Arc::new(InMemoryCouponStore::new([coupon]));
        let code = CouponCode::new("last").unwrap();
        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move { store.increment_usage(&code, Uuid::now_v7()).await }));
        }
        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, FulfillmentError::Coupon(CouponError::UsageExceeded))),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(store.get_by_code(&code).await.unwrap().used_count, 3);
    }

    #[tokio::test]
    async fn redemption_is_recorded_once_per_order() {
        let coupon = Coupon::new(CouponCode::new("ONCE").unwrap(), Decimal::from(50), DiscountType::Fixed).unwrap();
        let store = InMemoryCouponStore::new([coupon]);
        let code = CouponCode::new("ONCE").unwrap();
        let order = Uuid::now_v7();
        store.increment_usage(&code, order).await.unwrap();
        assert_eq!(store.increment_usage(&code, order).await.unwrap().used_count, 1);

        store.release_usage(&code, order).await.unwrap();
        store.release_usage(&code, order).await.unwrap();
        assert_eq!(store.get_by_code(&code).await.unwrap().used_count, 0);
        store.release_usage(&code, Uuid::now_v7()).await.unwrap();
        assert_eq!(store.get_by_code(&code).await.unwrap().used_count, 0);
    }

    #[tokio::test]
    async fn shipping_lookup_trims_region() {
        let table = StaticShippingTable::new([(
            " Alger ".to_string(),
            ShippingRate { home_price: Money::from_units(400), office_price: Money::from_units(300) },
        )]);
        assert!(table.get_rate("Alger").await.unwrap().is_some());
        assert!(table.get_rate("Blida").await.unwrap().is_none());
    }

    #[test]
    fn parses_staff_token_table() {
        let provider = StaticSessionProvider::parse("root=admin; desk=employee:orders,customers ;").unwrap();
        assert_eq!(provider.len(), 2);
        let desk = provider.sessions.get("desk").unwrap();
        assert_eq!(desk.role, Role::Employee);
        assert!(desk.holds(Permission::Customers));
        assert!(!desk.holds(Permission::Staff));
        assert!(StaticSessionProvider::parse("broken").is_err());
        assert!(StaticSessionProvider::parse("t=owner").is_err());
    }

    #[tokio::test]
    async fn unknown_token_is_unauthenticated() {
        let provider = StaticSessionProvider::parse("root=admin").unwrap();
        assert!(provider.resolve_current_staff(Some("root")).await.is_ok());
        assert!(matches!(provider.resolve_current_staff(Some("guess")).await, Err(FulfillmentError::Unauthenticated)));
        assert!(matches!(provider.resolve_current_staff(None).await, Err(FulfillmentError::Unauthenticated)));
    }
}
