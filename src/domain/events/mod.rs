//! Domain events
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{OrderStatus, Priority};
use crate::domain::value_objects::{CouponCode, Money, OrderNumber};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, order_number: OrderNumber, total: Money, at: DateTime<Utc> },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus, at: DateTime<Utc> },
    DetailsUpdated { order_id: Uuid, priority: Priority, notes: String, at: DateTime<Utc> },
    Deleted { order_id: Uuid, order_number: OrderNumber, at: DateTime<Utc> },
    CouponRedeemed { order_number: OrderNumber, code: CouponCode, used_count: u32, at: DateTime<Utc> },
}

impl OrderEvent {
    /// Subject suffix for the message bus.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::StatusChanged { .. } => "status_changed",
            Self::DetailsUpdated { .. } => "details_updated",
            Self::Deleted { .. } => "deleted",
            Self::CouponRedeemed { .. } => "coupon_redeemed",
        }
    }
}
