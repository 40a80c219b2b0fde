//! Store contracts the core is written against.
//!
//! Every call is an I/O suspension point and may fail or time out; implementations
//! report those failures as [`FulfillmentError::Storage`](crate::FulfillmentError::Storage).

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::authz::StaffSession;
use crate::domain::aggregates::{Coupon, Order, OrderPatch, OrderStatus, Priority};
use crate::domain::events::OrderEvent;
use crate::domain::shipping::ShippingRate;
use crate::domain::value_objects::CouponCode;
use crate::Result;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub priority: Option<Priority>,
    /// Matches order number, customer name or phone.
    pub search: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.map_or(true, |s| order.status() == s)
            && self.priority.map_or(true, |p| order.priority() == p)
            && self.search.as_deref().map_or(true, |q| order.matches_search(q))
    }
}

/// Durable order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with `Validation` if the order number is already taken.
    async fn create_order(&self, order: &Order) -> Result<Order>;

    async fn get_order(&self, id: Uuid) -> Result<Order>;

    /// Newest first.
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>>;

    /// Applies `patch` only if the stored version still equals `expected_version`,
    /// otherwise fails with `ConcurrencyConflict`.
    async fn update_order(&self, id: Uuid, patch: &OrderPatch, expected_version: u64) -> Result<Order>;

    async fn delete_order(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn get_by_code(&self, code: &CouponCode) -> Result<Coupon>;

    /// Re-checks usability and bumps `used_count` as one atomic step, recording the use
    /// against `order_id`. Repeating the call for an already recorded order changes nothing.
    async fn increment_usage(&self, code: &CouponCode, order_id: Uuid) -> Result<Coupon>;

    /// Gives back the use recorded for `order_id`, if any. Repeatable.
    async fn release_usage(&self, code: &CouponCode, order_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait ShippingTable: Send + Sync {
    async fn get_rate(&self, region: &str) -> Result<Option<ShippingRate>>;
}

/// Resolves the staff member behind a request credential.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Fails with `Unauthenticated` when the credential is missing or unknown.
    async fn resolve_current_staff(&self, token: Option<&str>) -> Result<StaffSession>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<()>;
}
