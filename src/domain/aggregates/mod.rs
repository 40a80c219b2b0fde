//! Aggregates module
pub mod cart;
pub mod coupon;
pub mod order;

pub use cart::{Cart, CartError, CartItem};
pub use coupon::{Coupon, CouponError, DiscountType};
pub use order::{CustomerSnapshot, DeliveryAddress, Order, OrderItem, OrderPatch, OrderStatus, PaymentMethod, PlaceOrder, Priority};
