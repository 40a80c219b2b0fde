//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::domain::shipping::DeliveryType;
use crate::domain::value_objects::{CouponCode, Money, OrderNumber, Quantity};
use crate::pricing::PriceBreakdown;
use crate::FulfillmentError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub(crate) id: Uuid,
    pub(crate) order_number: OrderNumber,
    pub(crate) customer: CustomerSnapshot,
    pub(crate) address: DeliveryAddress,
    pub(crate) delivery_type: DeliveryType,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) subtotal: Money,
    pub(crate) shipping_cost: Money,
    pub(crate) discount: Money,
    pub(crate) total: Money,
    pub(crate) coupon_code: Option<CouponCode>,
    pub(crate) status: OrderStatus,
    pub(crate) priority: Priority,
    pub(crate) notes: String,
    pub(crate) payment_method: PaymentMethod,
    pub(crate) version: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub unit_price: Money,
    pub quantity: Quantity,
    #[serde(default)]
    pub variant: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

/// Customer details as given at checkout, never re-read from a profile.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSnapshot {
    #[validate(custom = "not_blank")]
    pub name: String,
    #[validate(custom = "not_blank")]
    pub phone: String,
    #[validate(email)]
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAddress {
    #[validate(custom = "not_blank")]
    pub region: String,
    #[validate(custom = "not_blank")]
    pub sub_region: String,
    #[serde(default)]
    pub address: String,
}

pub(crate) fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() { return Err(ValidationError::new("blank")); }
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Processing, Shipped, Delivered, Cancelled }

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [Self::Pending, Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    /// Forward path pending → processing → shipped → delivered; cancellable until delivered.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Processing) | (Processing, Shipped) | (Shipped, Delivered)
                | (Pending, Cancelled) | (Processing, Cancelled) | (Shipped, Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|st| st.as_str() == s).ok_or_else(|| format!("unknown order status '{}'", s))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority { Low, #[default] Medium, High, Urgent }

impl Priority {
    pub const ALL: [Priority; 4] = [Self::Low, Self::Medium, Self::High, Self::Urgent];

    pub fn as_str(&self) -> &'static str {
        match self { Self::Low => "low", Self::Medium => "medium", Self::High => "high", Self::Urgent => "urgent" }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|p| p.as_str() == s).ok_or_else(|| format!("unknown priority '{}'", s))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { #[default] CashOnDelivery, BankTransfer }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::CashOnDelivery => "cash_on_delivery", Self::BankTransfer => "bank_transfer" }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash_on_delivery" => Ok(Self::CashOnDelivery),
            "bank_transfer" => Ok(Self::BankTransfer),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}

/// Partial update applied by the order store. `status` is only ever set after the transition check.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub priority: Option<Priority>,
    pub notes: Option<String>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self { Self { status: Some(status), ..Self::default() } }
    pub fn is_empty(&self) -> bool { self.status.is_none() && self.priority.is_none() && self.notes.is_none() }
}

/// Everything needed to place an order, already priced.
#[derive(Clone, Debug)]
pub struct PlaceOrder {
    pub customer: CustomerSnapshot,
    pub address: DeliveryAddress,
    pub delivery_type: DeliveryType,
    pub items: Vec<OrderItem>,
    pub pricing: PriceBreakdown,
    pub coupon_code: Option<CouponCode>,
    pub priority: Option<Priority>,
    pub notes: Option<String>,
    pub payment_method: PaymentMethod,
}

impl Order {
    pub fn place(order: PlaceOrder) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            order_number: OrderNumber::generate(),
            customer: trim_customer(order.customer),
            address: order.address,
            delivery_type: order.delivery_type,
            items: order.items,
            subtotal: order.pricing.subtotal,
            shipping_cost: order.pricing.shipping_cost,
            discount: order.pricing.discount,
            total: order.pricing.total,
            coupon_code: order.coupon_code,
            status: OrderStatus::Pending,
            priority: order.priority.unwrap_or_default(),
            notes: order.notes.unwrap_or_default(),
            payment_method: order.payment_method,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &OrderNumber { &self.order_number }
    pub fn customer(&self) -> &CustomerSnapshot { &self.customer }
    pub fn address(&self) -> &DeliveryAddress { &self.address }
    pub fn delivery_type(&self) -> DeliveryType { self.delivery_type }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn subtotal(&self) -> Money { self.subtotal }
    pub fn shipping_cost(&self) -> Money { self.shipping_cost }
    pub fn discount(&self) -> Money { self.discount }
    pub fn total(&self) -> Money { self.total }
    pub fn coupon_code(&self) -> Option<&CouponCode> { self.coupon_code.as_ref() }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn priority(&self) -> Priority { self.priority }
    pub fn notes(&self) -> &str { &self.notes }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn version(&self) -> u64 { self.version }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn check_transition(&self, to: OrderStatus) -> Result<(), FulfillmentError> {
        if !self.status.can_transition_to(to) {
            return Err(FulfillmentError::InvalidTransition { from: self.status, to });
        }
        Ok(())
    }

    /// Applies a patch and bumps the version. Callers check transitions first.
    pub fn apply(&mut self, patch: &OrderPatch, at: DateTime<Utc>) {
        if let Some(status) = patch.status { self.status = status; }
        if let Some(priority) = patch.priority { self.priority = priority; }
        if let Some(notes) = &patch.notes { self.notes = notes.clone(); }
        self.version += 1;
        self.updated_at = at;
    }

    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        needle.is_empty()
            || self.order_number.as_str().to_lowercase().contains(&needle)
            || self.customer.name.to_lowercase().contains(&needle)
            || self.customer.phone.contains(&needle)
    }
}

fn trim_customer(customer: CustomerSnapshot) -> CustomerSnapshot {
    CustomerSnapshot {
        name: customer.name.trim().to_string(),
        phone: customer.phone.trim().to_string(),
        email: customer.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
    }
}
