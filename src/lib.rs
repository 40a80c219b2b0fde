//! Storefront Fulfillment Core
//!
//! Turns a shopping cart into a priced order and governs that order through its
//! fulfillment lifecycle, with staff access resolved from role and granted permissions.
//!
//! ## Features
//! - Cart pricing with region-dependent shipping and coupon discounts
//! - Order lifecycle with an explicit status transition table
//! - Staff page and statistic visibility, operation gating
//! - Postgres and in-memory stores, NATS event publishing
//! - HTTP surface (axum)

use thiserror::Error;

pub mod api;
pub mod authz;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod lifecycle;
pub mod pricing;
pub mod resilience;

pub use authz::{AuthorizationCatalog, Authorizer, Operation, Permission, Role, StaffSession};
pub use domain::aggregates::{Cart, CartItem, Coupon, CouponError, DiscountType, Order, OrderItem, OrderStatus, Priority};
pub use lifecycle::{CreateOrderInput, DeleteConfirmation, OrderLifecycleManager};
pub use pricing::{PriceBreakdown, PricingEngine};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum FulfillmentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error("order {0} was modified concurrently")]
    ConcurrencyConflict(String),

    #[error("no authenticated staff session")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Unauthorized(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl FulfillmentError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound { entity, key: key.to_string() }
    }

    /// Stable machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Coupon(CouponError::Expired) => "coupon_expired",
            Self::Coupon(CouponError::Inactive) => "coupon_inactive",
            Self::Coupon(CouponError::UsageExceeded) => "coupon_usage_exceeded",
            Self::Coupon(CouponError::BelowMinimum { .. }) => "coupon_below_minimum",
            Self::ConcurrencyConflict(_) => "concurrency_conflict",
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized(_) => "unauthorized",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<sqlx::Error> for FulfillmentError {
    fn from(err: sqlx::Error) -> Self { Self::Storage(err.to_string()) }
}

impl From<validator::ValidationErrors> for FulfillmentError {
    fn from(err: validator::ValidationErrors) -> Self { Self::Validation(err.to_string()) }
}

impl From<domain::value_objects::CouponCodeError> for FulfillmentError {
    fn from(err: domain::value_objects::CouponCodeError) -> Self { Self::Validation(err.to_string()) }
}

impl From<domain::value_objects::MoneyError> for FulfillmentError {
    fn from(err: domain::value_objects::MoneyError) -> Self { Self::Validation(err.to_string()) }
}

pub type Result<T> = std::result::Result<T, FulfillmentError>;
