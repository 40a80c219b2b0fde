//! Postgres stores (sqlx).
//!
//! Enumerations are stored as text and parsed on the way out; a row that does not parse
//! into the typed model is reported as a storage error rather than passed on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::aggregates::{
    Coupon, CouponError, CustomerSnapshot, DeliveryAddress, Order, OrderItem, OrderPatch,
};
use crate::domain::repository::{CouponStore, OrderFilter, OrderStore, ShippingTable};
use crate::domain::shipping::{normalize_region, ShippingRate};
use crate::domain::value_objects::{CouponCode, Money, OrderNumber};
use crate::{FulfillmentError, Result};

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    customer_name: String,
    customer_phone: String,
    customer_email: Option<String>,
    region: String,
    sub_region: String,
    address: String,
    delivery_type: String,
    items: Json<Vec<OrderItem>>,
    subtotal: Decimal,
    shipping_cost: Decimal,
    discount: Decimal,
    total: Decimal,
    coupon_code: Option<String>,
    status: String,
    priority: String,
    notes: String,
    payment_method: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> FulfillmentError {
    FulfillmentError::Storage(format!("unrecognised {} in store: {}", what, detail))
}

impl TryFrom<OrderRow> for Order {
    type Error = FulfillmentError;

    fn try_from(row: OrderRow) -> Result<Self> {
        let money = |v: Decimal| Money::new(v).map_err(|e| corrupt("amount", e));
        Ok(Order {
            id: row.id,
            order_number: OrderNumber::parse(row.order_number),
            customer: CustomerSnapshot { name: row.customer_name, phone: row.customer_phone, email: row.customer_email },
            address: DeliveryAddress { region: row.region, sub_region: row.sub_region, address: row.address },
            delivery_type: row.delivery_type.parse().map_err(|e| corrupt("delivery type", e))?,
            items: row.items.0,
            subtotal: money(row.subtotal)?,
            shipping_cost: money(row.shipping_cost)?,
            discount: money(row.discount)?,
            total: money(row.total)?,
            coupon_code: row.coupon_code.map(CouponCode::new).transpose().map_err(|e| corrupt("coupon code", e))?,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            priority: row.priority.parse().map_err(|e| corrupt("priority", e))?,
            notes: row.notes,
            payment_method: row.payment_method.parse().map_err(|e| corrupt("payment method", e))?,
            version: u64::try_from(row.version).map_err(|e| corrupt("version", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// `ILIKE` pattern matching `needle` anywhere, with backslash, `%` and `_` taken literally.
fn contains_pattern(needle: &str) -> Option<String> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    Some(format!("%{}%", escaped))
}

#[derive(Clone)]
pub struct PgOrderStore {
    db: PgPool,
}

impl PgOrderStore {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_order(&self, o: &Order) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(
            "INSERT INTO orders (id, order_number, customer_name, customer_phone, customer_email, region, sub_region, address, delivery_type, items, subtotal, shipping_cost, discount, total, coupon_code, status, priority, notes, payment_method, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22) RETURNING *",
        )
        .bind(o.id).bind(o.order_number.as_str()).bind(&o.customer.name).bind(&o.customer.phone).bind(&o.customer.email)
        .bind(&o.address.region).bind(&o.address.sub_region).bind(&o.address.address).bind(o.delivery_type.as_str())
        .bind(Json(&o.items)).bind(o.subtotal.amount()).bind(o.shipping_cost.amount()).bind(o.discount.amount()).bind(o.total.amount())
        .bind(o.coupon_code.as_ref().map(CouponCode::as_str)).bind(o.status.as_str()).bind(o.priority.as_str()).bind(&o.notes)
        .bind(o.payment_method.as_str()).bind(o.version as i64).bind(o.created_at).bind(o.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                FulfillmentError::Validation(format!("order number {} already exists", o.order_number))
            }
            other => other.into(),
        })?;
        row.try_into()
    }

    async fn get_order(&self, id: Uuid) -> Result<Order> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&self.db).await?
            .ok_or_else(|| FulfillmentError::not_found("order", id))?
            .try_into()
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let search = filter.search.as_deref().and_then(contains_pattern);
        sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE ($1::text IS NULL OR status = $1) AND ($2::text IS NULL OR priority = $2) \
             AND ($3::text IS NULL OR order_number ILIKE $3 ESCAPE '\\' OR customer_name ILIKE $3 ESCAPE '\\' \
             OR customer_phone ILIKE $3 ESCAPE '\\') \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(filter.status.map(|s| s.as_str())).bind(filter.priority.map(|p| p.as_str())).bind(search)
        .fetch_all(&self.db).await?
        .into_iter()
        .map(Order::try_from)
        .collect()
    }

    async fn update_order(&self, id: Uuid, patch: &OrderPatch, expected_version: u64) -> Result<Order> {
        let updated = sqlx::query_as::<_, OrderRow>(
            "UPDATE orders SET status = COALESCE($3, status), priority = COALESCE($4, priority), notes = COALESCE($5, notes), \
             version = version + 1, updated_at = NOW() WHERE id = $1 AND version = $2 RETURNING *",
        )
        .bind(id).bind(expected_version as i64)
        .bind(patch.status.map(|s| s.as_str())).bind(patch.priority.map(|p| p.as_str())).bind(&patch.notes)
        .fetch_optional(&self.db).await?;
        match updated {
            Some(row) => row.try_into(),
            None => {
                let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)").bind(id).fetch_one(&self.db).await?;
                if exists.0 { Err(FulfillmentError::ConcurrencyConflict(id.to_string())) } else { Err(FulfillmentError::not_found("order", id)) }
            }
        }
    }

    async fn delete_order(&self, id: Uuid) -> Result<()> {
        let done = sqlx::query("DELETE FROM orders WHERE id = $1").bind(id).execute(&self.db).await?;
        if done.rows_affected() == 0 { return Err(FulfillmentError::not_found("order", id)); }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CouponRow {
    code: String,
    discount: Decimal,
    discount_type: String,
    min_amount: Option<Decimal>,
    max_uses: Option<i32>,
    used_count: i32,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = FulfillmentError;

    fn try_from(row: CouponRow) -> Result<Self> {
        let coupon = Coupon {
            code: CouponCode::new(row.code).map_err(|e| corrupt("coupon code", e))?,
            discount: row.discount,
            discount_type: row.discount_type.parse().map_err(|e| corrupt("discount type", e))?,
            min_amount: row.min_amount.map(Money::new).transpose().map_err(|e| corrupt("minimum amount", e))?,
            max_uses: row.max_uses.map(u32::try_from).transpose().map_err(|e| corrupt("max uses", e))?,
            used_count: u32::try_from(row.used_count).map_err(|e| corrupt("used count", e))?,
            expires_at: row.expires_at,
            is_active: row.is_active,
        };
        coupon.check_shape().map_err(|e| corrupt("coupon", e))?;
        Ok(coupon)
    }
}

#[derive(Clone)]
pub struct PgCouponStore {
    db: PgPool,
}

impl PgCouponStore {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

#[async_trait]
impl CouponStore for PgCouponStore {
    async fn get_by_code(&self, code: &CouponCode) -> Result<Coupon> {
        sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE code = $1")
            .bind(code.as_str()).fetch_optional(&self.db).await?
            .ok_or_else(|| FulfillmentError::not_found("coupon", code))?
            .try_into()
    }

    async fn increment_usage(&self, code: &CouponCode, order_id: Uuid) -> Result<Coupon> {
        let mut tx = self.db.begin().await?;
        let recorded = sqlx::query(
            "INSERT INTO coupon_redemptions (order_id, code, redeemed_at) VALUES ($1, $2, NOW()) ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(order_id).bind(code.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => FulfillmentError::not_found("coupon", code),
            other => other.into(),
        })?;
        if recorded.rows_affected() == 0 {
            // Already redeemed for this order.
            tx.rollback().await?;
            return self.get_by_code(code).await;
        }

        let updated = sqlx::query_as::<_, CouponRow>(
            "UPDATE coupons SET used_count = used_count + 1 \
             WHERE code = $1 AND is_active AND (expires_at IS NULL OR expires_at >= NOW()) \
             AND (max_uses IS NULL OR used_count < max_uses) RETURNING *",
        )
        .bind(code.as_str()).fetch_optional(&mut *tx).await?;
        match updated {
            Some(row) => {
                tx.commit().await?;
                row.try_into()
            }
            None => {
                tx.rollback().await?;
                // Nothing matched: report why.
                let coupon = self.get_by_code(code).await?;
                coupon.check_usable(Utc::now())?;
                Err(CouponError::UsageExceeded.into())
            }
        }
    }

    async fn release_usage(&self, code: &CouponCode, order_id: Uuid) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let removed = sqlx::query("DELETE FROM coupon_redemptions WHERE order_id = $1 AND code = $2")
            .bind(order_id).bind(code.as_str()).execute(&mut *tx).await?;
        if removed.rows_affected() > 0 {
            sqlx::query("UPDATE coupons SET used_count = used_count - 1 WHERE code = $1 AND used_count > 0")
                .bind(code.as_str()).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgShippingTable {
    db: PgPool,
}

impl PgShippingTable {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

#[async_trait]
impl ShippingTable for PgShippingTable {
    async fn get_rate(&self, region: &str) -> Result<Option<ShippingRate>> {
        let row: Option<(Decimal, Decimal)> = sqlx::query_as("SELECT home_price, office_price FROM shipping_rates WHERE region = $1")
            .bind(normalize_region(region)).fetch_optional(&self.db).await?;
        row.map(|(home, office)| {
            Ok(ShippingRate {
                home_price: Money::new(home).map_err(|e| corrupt("home price", e))?,
                office_price: Money::new(office).map_err(|e| corrupt("office price", e))?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("  "), None);
        assert_eq!(contains_pattern(" amina ").as_deref(), Some("%amina%"));
        assert_eq!(contains_pattern("50%_off").as_deref(), Some("%50\\%\\_off%"));
        assert_eq!(contains_pattern("a\\b").as_deref(), Some("%a\\\\b%"));
    }
}
