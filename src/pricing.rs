//! Checkout pricing: subtotal, region shipping, coupon discount and total.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, Coupon};
use crate::domain::repository::{CouponStore, ShippingTable};
use crate::domain::shipping::{normalize_region, DeliveryType, ShippingDefaults};
use crate::domain::value_objects::{CouponCode, Money};
use crate::resilience::StoreGuard;
use crate::{FulfillmentError, Result};

/// Final price of a checkout. `total = max(0, subtotal + shipping_cost - discount)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub subtotal: Money,
    pub shipping_cost: Money,
    pub discount: Money,
    pub total: Money,
}

impl PriceBreakdown {
    pub fn new(subtotal: Money, shipping_cost: Money, discount: Money) -> Self {
        let total = subtotal.add(shipping_cost).saturating_sub(discount);
        Self { subtotal, shipping_cost, discount, total }
    }
}

/// Validates coupon codes against the coupon store.
#[derive(Clone)]
pub struct CouponValidator {
    store: Arc<dyn CouponStore>,
    guard: StoreGuard,
}

impl CouponValidator {
    pub fn new(store: Arc<dyn CouponStore>, guard: StoreGuard) -> Self { Self { store, guard } }

    /// Looks the code up case-insensitively and checks it is active, unexpired and not used up.
    #[instrument(skip(self))]
    pub async fn validate(&self, code: &str) -> Result<Coupon> {
        let code = lookup_code(code)?;
        let coupon = self.guard.retrying("coupon lookup", || self.store.get_by_code(&code)).await?;
        coupon.check_usable(Utc::now())?;
        Ok(coupon)
    }

    /// [`validate`](Self::validate) plus the minimum-subtotal rule.
    pub async fn validate_for(&self, code: &str, subtotal: Money) -> Result<Coupon> {
        let coupon = self.validate(code).await?;
        coupon.check_minimum(subtotal)?;
        Ok(coupon)
    }

    /// Consumes one use on behalf of `order_id`. The store re-checks the limit atomically,
    /// so two concurrent redemptions of the last use cannot both succeed, and it records the
    /// order, so repeating a redemption whose reply was lost does not count twice.
    #[instrument(skip(self))]
    pub async fn redeem(&self, code: &CouponCode, subtotal: Money, order_id: Uuid) -> Result<Coupon> {
        self.validate_for(code.as_str(), subtotal).await?;
        let coupon = self.guard.retrying("coupon redemption", || self.store.increment_usage(code, order_id)).await?;
        tracing::info!(code = %coupon.code, used = coupon.used_count, %order_id, "coupon redeemed");
        Ok(coupon)
    }

    /// Gives back the use taken for an order that was never stored.
    #[instrument(skip(self))]
    pub async fn release(&self, code: &CouponCode, order_id: Uuid) -> Result<()> {
        self.guard.retrying("coupon release", || self.store.release_usage(code, order_id)).await?;
        tracing::info!(%code, %order_id, "coupon use released");
        Ok(())
    }
}

/// Parses a shopper-typed code. A code that cannot exist is reported as not found.
pub(crate) fn lookup_code(code: &str) -> Result<CouponCode> {
    CouponCode::new(code).map_err(|_| FulfillmentError::not_found("coupon", code.trim()))
}

pub struct PricingEngine {
    shipping: Arc<dyn ShippingTable>,
    coupons: CouponValidator,
    defaults: ShippingDefaults,
    guard: StoreGuard,
}

impl PricingEngine {
    pub fn new(shipping: Arc<dyn ShippingTable>, coupons: CouponValidator, defaults: ShippingDefaults, guard: StoreGuard) -> Self {
        Self { shipping, coupons, defaults, guard }
    }

    pub fn coupons(&self) -> &CouponValidator { &self.coupons }

    /// Shipping cost for a region, falling back to the configured defaults.
    pub async fn shipping_cost(&self, region: &str, delivery: DeliveryType) -> Result<Money> {
        let region = normalize_region(region);
        let rate = self.guard.retrying("shipping lookup", || self.shipping.get_rate(&region)).await?;
        if rate.is_none() {
            tracing::debug!(%region, "no shipping rate configured, using default");
        }
        Ok(self.defaults.resolve(rate.as_ref(), delivery))
    }

    /// Prices a cart. Reads only; a coupon is checked here but redeemed at order creation.
    #[instrument(skip(self, cart), fields(items = cart.item_count()))]
    pub async fn price(&self, cart: &Cart, region: &str, delivery: DeliveryType, coupon_code: Option<&str>) -> Result<PriceBreakdown> {
        if cart.is_empty() {
            return Err(FulfillmentError::Validation("cart is empty".into()));
        }
        let subtotal = cart.subtotal();
        let shipping_cost = self.shipping_cost(region, delivery).await?;
        let discount = match coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => self.coupons.validate_for(code, subtotal).await?.discount_for(subtotal),
            None => Money::ZERO,
        };
        Ok(PriceBreakdown::new(subtotal, shipping_cost, discount))
    }
}
