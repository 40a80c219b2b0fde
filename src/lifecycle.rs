//! Order lifecycle: creation from a priced checkout, status transitions, detail edits and deletion.
//!
//! Staff mutations go through [`Authorizer`] first. Every write carries the version the
//! caller read, so two concurrent edits of one order cannot silently overwrite each other.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::authz::{Authorizer, Operation, StaffSession};
use crate::domain::aggregates::{
    CartItem, CustomerSnapshot, DeliveryAddress, Order, OrderItem, OrderPatch, OrderStatus, PaymentMethod, PlaceOrder, Priority,
};
use crate::domain::events::OrderEvent;
use crate::domain::repository::{EventPublisher, OrderFilter, OrderStore};
use crate::domain::shipping::DeliveryType;
use crate::domain::value_objects::{CouponCode, Money, OrderNumber};
use crate::pricing::{lookup_code, PriceBreakdown, PricingEngine};
use crate::resilience::StoreGuard;
use crate::{FulfillmentError, Result};

/// What a shopper submits at checkout. Prices are computed server side from this.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate]
    pub customer: CustomerSnapshot,
    #[validate]
    pub address: DeliveryAddress,
    #[serde(default)]
    pub delivery_type: DeliveryType,
    #[validate(length(min = 1, message = "cart is empty"))]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

impl CheckoutRequest {
    pub fn coupon(&self) -> Option<&str> {
        self.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    pub fn into_order_input(self, pricing: PriceBreakdown) -> CreateOrderInput {
        let coupon_code = self.coupon().map(str::to_string);
        CreateOrderInput {
            customer: self.customer,
            address: self.address,
            delivery_type: self.delivery_type,
            items: self.items.iter().map(CartItem::snapshot).collect(),
            pricing,
            coupon_code,
            priority: None,
            notes: self.notes,
            payment_method: self.payment_method,
        }
    }
}

/// A priced order ready to be stored.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderInput {
    #[validate]
    pub customer: CustomerSnapshot,
    #[validate]
    pub address: DeliveryAddress,
    #[serde(default)]
    pub delivery_type: DeliveryType,
    #[validate(length(min = 1, message = "order has no items"))]
    pub items: Vec<OrderItem>,
    pub pricing: PriceBreakdown,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

/// Partial edit of an order's handling details. Status is changed only through
/// [`OrderLifecycleManager::update_status`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DetailsUpdate {
    pub priority: Option<Priority>,
    pub notes: Option<String>,
}

/// Explicit confirmation for a hard delete: the caller must restate the order number.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConfirmation {
    pub order_number: OrderNumber,
}

impl DeleteConfirmation {
    pub fn of(order_number: &OrderNumber) -> Self { Self { order_number: order_number.clone() } }
}

pub struct OrderLifecycleManager {
    orders: Arc<dyn OrderStore>,
    pricing: Arc<PricingEngine>,
    authz: Arc<Authorizer>,
    events: Arc<dyn EventPublisher>,
    guard: StoreGuard,
}

/// Outcome of a single insert attempt.
enum Insert {
    Stored(Order),
    NotStored(FulfillmentError),
    /// The store failed and the order could not be read back either.
    Unknown(FulfillmentError),
}

impl OrderLifecycleManager {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        pricing: Arc<PricingEngine>,
        authz: Arc<Authorizer>,
        events: Arc<dyn EventPublisher>,
        guard: StoreGuard,
    ) -> Self {
        Self { orders, pricing, authz, events, guard }
    }

    /// Stores a new pending order.
    ///
    /// Every amount in `input.pricing` is checked against the items, the shipping table and
    /// the coupon before anything is written. A coupon is redeemed against the new order's
    /// id and given back if the order ends up not stored.
    #[instrument(skip(self, input), fields(items = input.items.len()))]
    pub async fn create(&self, input: CreateOrderInput) -> Result<Order> {
        input.validate()?;
        let subtotal: Money = input.items.iter().map(OrderItem::line_total).sum();
        if subtotal != input.pricing.subtotal {
            return Err(FulfillmentError::Validation(format!(
                "subtotal {} does not match items total {}", input.pricing.subtotal, subtotal
            )));
        }
        let shipping_cost = self.pricing.shipping_cost(&input.address.region, input.delivery_type).await?;
        if shipping_cost != input.pricing.shipping_cost {
            return Err(FulfillmentError::Validation(format!(
                "shipping cost {} should be {}", input.pricing.shipping_cost, shipping_cost
            )));
        }

        let coupons = self.pricing.coupons();
        let coupon_code = input.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty()).map(lookup_code).transpose()?;
        let discount = match &coupon_code {
            Some(code) => coupons.validate_for(code.as_str(), subtotal).await?.discount_for(subtotal),
            None => Money::ZERO,
        };
        if discount != input.pricing.discount {
            return Err(FulfillmentError::Validation(match &coupon_code {
                Some(code) => format!("discount does not match coupon {}", code),
                None => "discount given without a coupon".into(),
            }));
        }
        let pricing = PriceBreakdown::new(subtotal, shipping_cost, discount);
        if pricing.total != input.pricing.total {
            return Err(FulfillmentError::Validation(format!("total {} should be {}", input.pricing.total, pricing.total)));
        }

        let order = Order::place(PlaceOrder {
            customer: input.customer,
            address: input.address,
            delivery_type: input.delivery_type,
            items: input.items,
            pricing,
            coupon_code,
            priority: input.priority,
            notes: input.notes,
            payment_method: input.payment_method,
        });
        let redeemed = match order.coupon_code() {
            Some(code) => match coupons.redeem(code, subtotal, order.id()).await {
                Ok(coupon) => Some(coupon),
                Err(e) => {
                    if matches!(e, FulfillmentError::Storage(_)) {
                        self.give_back(code, order.id()).await;
                    }
                    return Err(e);
                }
            },
            None => None,
        };

        let stored = match self.insert(&order).await {
            Insert::Stored(stored) => stored,
            Insert::NotStored(e) => {
                if let Some(code) = order.coupon_code() {
                    self.give_back(code, order.id()).await;
                }
                return Err(e);
            }
            Insert::Unknown(e) => {
                if redeemed.is_some() {
                    tracing::error!(order_id = %order.id(), error = %e, "order outcome unknown, coupon use kept");
                }
                return Err(e);
            }
        };
        tracing::info!(order_number = %stored.order_number(), total = %stored.total(), "order created");

        let at = stored.created_at();
        self.emit(OrderEvent::Created {
            order_id: stored.id(), order_number: stored.order_number().clone(), total: stored.total(), at,
        }).await;
        if let Some(coupon) = redeemed {
            self.emit(OrderEvent::CouponRedeemed {
                order_number: stored.order_number().clone(), code: coupon.code, used_count: coupon.used_count, at,
            }).await;
        }
        Ok(stored)
    }

    /// Inserts once; after a storage failure the id is read back to learn whether the
    /// insert committed before its reply was lost.
    async fn insert(&self, order: &Order) -> Insert {
        match self.guard.once("create order", || self.orders.create_order(order)).await {
            Ok(stored) => Insert::Stored(stored),
            Err(FulfillmentError::Storage(reason)) => {
                match self.guard.retrying("get order", || self.orders.get_order(order.id())).await {
                    Ok(stored) => {
                        tracing::warn!(order_number = %stored.order_number(), %reason, "order insert reply lost, order is stored");
                        Insert::Stored(stored)
                    }
                    Err(FulfillmentError::NotFound { .. }) => Insert::NotStored(FulfillmentError::Storage(reason)),
                    Err(_) => Insert::Unknown(FulfillmentError::Storage(reason)),
                }
            }
            Err(e) => Insert::NotStored(e),
        }
    }

    async fn give_back(&self, code: &CouponCode, order_id: Uuid) {
        if let Err(e) = self.pricing.coupons().release(code, order_id).await {
            tracing::error!(%code, %order_id, error = %e, "failed to give back coupon use");
        }
    }

    pub async fn get(&self, session: &StaffSession, id: Uuid) -> Result<Order> {
        self.authz.authorize(session, Operation::ViewOrders)?;
        self.guard.retrying("get order", || self.orders.get_order(id)).await
    }

    pub async fn list(&self, session: &StaffSession, filter: &OrderFilter) -> Result<Vec<Order>> {
        self.authz.authorize(session, Operation::ViewOrders)?;
        self.guard.retrying("list orders", || self.orders.list_orders(filter)).await
    }

    /// Moves an order along the transition table. On a version conflict the order is
    /// re-read and the transition re-checked once before giving up.
    #[instrument(skip(self, session))]
    pub async fn update_status(&self, session: &StaffSession, id: Uuid, to: OrderStatus) -> Result<Order> {
        self.authz.authorize(session, Operation::UpdateOrderStatus)?;
        let patch = OrderPatch::status(to);
        let mut retried = false;
        loop {
            let current = self.guard.retrying("get order", || self.orders.get_order(id)).await?;
            current.check_transition(to)?;
            match self.guard.once("update order", || self.orders.update_order(id, &patch, current.version())).await {
                Ok(updated) => {
                    tracing::info!(order_number = %updated.order_number(), from = %current.status(), %to, "order status changed");
                    self.emit(OrderEvent::StatusChanged { order_id: id, from: current.status(), to, at: updated.updated_at() }).await;
                    return Ok(updated);
                }
                Err(FulfillmentError::ConcurrencyConflict(_)) if !retried => {
                    tracing::warn!(%id, "order changed underneath status update, re-reading");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[instrument(skip(self, session, update))]
    pub async fn update_details(&self, session: &StaffSession, id: Uuid, update: DetailsUpdate) -> Result<Order> {
        self.authz.authorize(session, Operation::UpdateOrderDetails)?;
        let patch = OrderPatch { status: None, priority: update.priority, notes: update.notes };
        if patch.is_empty() {
            return Err(FulfillmentError::Validation("nothing to update".into()));
        }
        let mut retried = false;
        loop {
            let current = self.guard.retrying("get order", || self.orders.get_order(id)).await?;
            match self.guard.once("update order", || self.orders.update_order(id, &patch, current.version())).await {
                Ok(updated) => {
                    self.emit(OrderEvent::DetailsUpdated {
                        order_id: id, priority: updated.priority(), notes: updated.notes().to_string(), at: updated.updated_at(),
                    }).await;
                    return Ok(updated);
                }
                Err(FulfillmentError::ConcurrencyConflict(_)) if !retried => retried = true,
                Err(e) => return Err(e),
            }
        }
    }

    /// Hard delete. Irreversible; refuses unless `confirmation` names this order.
    #[instrument(skip(self, session, confirmation))]
    pub async fn remove(&self, session: &StaffSession, id: Uuid, confirmation: DeleteConfirmation) -> Result<()> {
        self.authz.authorize(session, Operation::DeleteOrder)?;
        let order = self.guard.retrying("get order", || self.orders.get_order(id)).await?;
        if &confirmation.order_number != order.order_number() {
            return Err(FulfillmentError::Validation(format!(
                "confirmation {} does not match order {}", confirmation.order_number, order.order_number()
            )));
        }
        self.guard.once("delete order", || self.orders.delete_order(id)).await?;
        tracing::info!(order_number = %order.order_number(), "order deleted");
        self.emit(OrderEvent::Deleted { order_id: id, order_number: order.order_number().clone(), at: Utc::now() }).await;
        Ok(())
    }

    async fn emit(&self, event: OrderEvent) {
        if let Err(e) = self.events.publish(&event).await {
            tracing::warn!(kind = event.kind(), error = %e, "failed to publish order event");
        }
    }
}
