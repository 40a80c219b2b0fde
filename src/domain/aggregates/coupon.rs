//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::value_objects::{CouponCode, Money};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Percentage => "percentage", Self::Fixed => "fixed" }
    }
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for DiscountType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(Self::Percentage),
            "fixed" => Ok(Self::Fixed),
            other => Err(format!("unknown discount type '{}'", other)),
        }
    }
}

/// Reasons a coupon cannot be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CouponError {
    #[error("coupon has expired")]
    Expired,

    #[error("coupon is not active")]
    Inactive,

    #[error("coupon usage limit reached")]
    UsageExceeded,

    #[error("order subtotal {subtotal} is below the coupon minimum of {minimum}")]
    BelowMinimum { minimum: Money, subtotal: Money },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub code: CouponCode,
    /// Percent in `[0, 100]` for percentage coupons, an amount for fixed ones.
    pub discount: Decimal,
    pub discount_type: DiscountType,
    pub min_amount: Option<Money>,
    pub max_uses: Option<u32>,
    pub used_count: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Coupon {
    /// Builds a coupon record, rejecting discount values its type cannot carry.
    pub fn new(code: CouponCode, discount: Decimal, discount_type: DiscountType) -> Result<Self, String> {
        let coupon = Self {
            code, discount, discount_type,
            min_amount: None, max_uses: None, used_count: 0, expires_at: None, is_active: true,
        };
        coupon.check_shape()?;
        Ok(coupon)
    }

    pub fn with_min_amount(mut self, min: Money) -> Self { self.min_amount = Some(min); self }
    pub fn with_max_uses(mut self, max: u32) -> Self { self.max_uses = Some(max); self }
    pub fn with_expiry(mut self, at: DateTime<Utc>) -> Self { self.expires_at = Some(at); self }
    pub fn deactivated(mut self) -> Self { self.is_active = false; self }

    /// Discount must be non-negative; a percentage may not exceed 100.
    pub fn check_shape(&self) -> Result<(), String> {
        if self.discount.is_sign_negative() && !self.discount.is_zero() {
            return Err(format!("coupon {} has a negative discount", self.code));
        }
        if self.discount_type == DiscountType::Percentage && self.discount > Decimal::ONE_HUNDRED {
            return Err(format!("coupon {} has a percentage above 100", self.code));
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at < now)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.map_or(false, |max| self.used_count >= max)
    }

    /// Checks active state, expiry and usage, in that order.
    pub fn check_usable(&self, now: DateTime<Utc>) -> Result<(), CouponError> {
        if !self.is_active { return Err(CouponError::Inactive); }
        if self.is_expired(now) { return Err(CouponError::Expired); }
        if self.is_exhausted() { return Err(CouponError::UsageExceeded); }
        Ok(())
    }

    pub fn check_minimum(&self, subtotal: Money) -> Result<(), CouponError> {
        match self.min_amount {
            Some(minimum) if subtotal < minimum => Err(CouponError::BelowMinimum { minimum, subtotal }),
            _ => Ok(()),
        }
    }

    /// Discount against the subtotal only; never larger than the subtotal.
    pub fn discount_for(&self, subtotal: Money) -> Money {
        let raw = match self.discount_type {
            DiscountType::Percentage => subtotal.percent(self.discount.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)),
            DiscountType::Fixed => Money::new(self.discount).unwrap_or(Money::ZERO),
        };
        raw.min(subtotal)
    }

    /// Records one successful redemption.
    pub fn redeem(&mut self, now: DateTime<Utc>) -> Result<(), CouponError> {
        self.check_usable(now)?;
        self.used_count += 1;
        Ok(())
    }

    /// Undoes one redemption whose order was never stored.
    pub fn release(&mut self) { self.used_count = self.used_count.saturating_sub(1); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn code(s: &str) -> CouponCode { CouponCode::new(s).unwrap() }

    #[test]
    fn test_usage_exceeded() {
        let mut coupon = Coupon::new(code("WELCOME"), Decimal::from(10), DiscountType::Percentage).unwrap().with_max_uses(3);
        coupon.used_count = 3;
        assert_eq!(coupon.check_usable(Utc::now()), Err(CouponError::UsageExceeded));
    }

    #[test]
    fn test_inactive_and_expired() {
        let now = Utc::now();
        let expired = Coupon::new(code("OLD"), Decimal::from(5), DiscountType::Fixed).unwrap().with_expiry(now - Duration::days(1));
        assert_eq!(expired.check_usable(now), Err(CouponError::Expired));
        let inactive = Coupon::new(code("OFF"), Decimal::from(5), DiscountType::Fixed).unwrap().deactivated();
        assert_eq!(inactive.check_usable(now), Err(CouponError::Inactive));
        let future = Coupon::new(code("NEW"), Decimal::from(5), DiscountType::Fixed).unwrap().with_expiry(now + Duration::days(1));
        assert!(future.check_usable(now).is_ok());
    }

    #[test]
    fn test_below_minimum() {
        let coupon = Coupon::new(code("BIG"), Decimal::from(10), DiscountType::Percentage).unwrap()
            .with_min_amount(Money::from_units(2000));
        assert_eq!(
            coupon.check_minimum(Money::from_units(1999)),
            Err(CouponError::BelowMinimum { minimum: Money::from_units(2000), subtotal: Money::from_units(1999) })
        );
        assert!(coupon.check_minimum(Money::from_units(2000)).is_ok());
    }

    #[test]
    fn test_shape_rejected() {
        assert!(Coupon::new(code("HUGE"), Decimal::from(150), DiscountType::Percentage).is_err());
        assert!(Coupon::new(code("NEG"), Decimal::from(-1), DiscountType::Fixed).is_err());
        assert!(Coupon::new(code("FLAT"), Decimal::from(150), DiscountType::Fixed).is_ok());
    }

    #[test]
    fn test_redeem_increments_until_limit() {
        let mut coupon = Coupon::new(code("TWICE"), Decimal::from(100), DiscountType::Fixed).unwrap().with_max_uses(2);
        coupon.redeem(Utc::now()).unwrap();
        coupon.redeem(Utc::now()).unwrap();
        assert_eq!(coupon.redeem(Utc::now()), Err(CouponError::UsageExceeded));
        assert_eq!(coupon.used_count, 2);
        coupon.release();
        assert!(coupon.check_usable(Utc::now()).is_ok());
    }

    proptest! {
        #[test]
        fn fixed_discount_never_exceeds_subtotal(units in 0u64..1_000_000, discount in 0u64..2_000_000) {
            let coupon = Coupon::new(code("FIXED"), Decimal::from(discount), DiscountType::Fixed).unwrap();
            let subtotal = Money::from_units(units);
            let applied = coupon.discount_for(subtotal);
            prop_assert!(applied <= subtotal);
            prop_assert_eq!(applied, Money::from_units(discount.min(units)));
        }

        #[test]
        fn percentage_discount_is_proportional(subtotal in 0u64..1_000_000, p in 0u32..=100) {
            let coupon = Coupon::new(code("PCT"), Decimal::from(p), DiscountType::Percentage).unwrap();
            let subtotal = Money::from_units(subtotal);
            let expected = subtotal.amount() * Decimal::from(p) / Decimal::ONE_HUNDRED;
            prop_assert_eq!(coupon.discount_for(subtotal).amount(), expected);
        }
    }
}
