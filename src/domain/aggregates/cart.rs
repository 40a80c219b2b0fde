//! Cart Aggregate

use serde::{Deserialize, Serialize};

use crate::domain::aggregates::order::OrderItem;
use crate::domain::value_objects::{Money, Quantity};

/// Storefront cart. Only read by the pricing engine; the order store holds the authoritative snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    items: Vec<CartItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    pub product_name: String,
    pub list_price: Money,
    #[serde(default)]
    pub sale_price: Option<Money>,
    pub quantity: Quantity,
    #[serde(default)]
    pub variant: Option<String>,
}

impl CartItem {
    /// Active sale price when the product is on sale, list price otherwise.
    pub fn unit_price(&self) -> Money { self.sale_price.unwrap_or(self.list_price) }
    pub fn line_total(&self) -> Money { self.unit_price().multiply(self.quantity) }

    /// Freezes name and price as they are now, decoupled from later catalog edits.
    pub fn snapshot(&self) -> OrderItem {
        OrderItem {
            product_id: self.product_id.clone(),
            product_name: self.product_name.clone(),
            unit_price: self.unit_price(),
            quantity: self.quantity,
            variant: self.variant.clone(),
        }
    }

    fn same_line(&self, product_id: &str, variant: Option<&str>) -> bool {
        self.product_id == product_id && self.variant.as_deref() == variant
    }
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    pub fn from_items(items: impl IntoIterator<Item = CartItem>) -> Self {
        let mut cart = Self::new();
        for item in items { cart.add_item(item); }
        cart
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn subtotal(&self) -> Money { self.items.iter().map(CartItem::line_total).sum() }

    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.same_line(&item.product_id, item.variant.as_deref())) {
            existing.quantity = existing.quantity.add(item.quantity);
        } else {
            self.items.push(item);
        }
    }

    pub fn update_quantity(&mut self, product_id: &str, variant: Option<&str>, quantity: u32) -> Result<(), CartError> {
        let Ok(qty) = Quantity::new(quantity) else { return self.remove_item(product_id, variant) };
        let item = self.items.iter_mut().find(|i| i.same_line(product_id, variant)).ok_or(CartError::ItemNotFound)?;
        item.quantity = qty;
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: &str, variant: Option<&str>) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| !i.same_line(product_id, variant));
        if self.items.len() == before { return Err(CartError::ItemNotFound); }
        Ok(())
    }

    pub fn clear(&mut self) { self.items.clear(); }

    pub fn snapshot_items(&self) -> Vec<OrderItem> { self.items.iter().map(CartItem::snapshot).collect() }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ItemNotFound }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Item not found") }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: &str, price: u64, sale: Option<u64>, qty: u32) -> CartItem {
        CartItem {
            product_id: product.into(), product_name: format!("Product {}", product),
            list_price: Money::from_units(price), sale_price: sale.map(Money::from_units),
            quantity: Quantity::new(qty).unwrap(), variant: None,
        }
    }

    #[test]
    fn test_cart_operations() {
        let mut cart = Cart::new();
        cart.add_item(item("P1", 1000, None, 2));
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.subtotal(), Money::from_units(2000));
        cart.add_item(item("P1", 1000, None, 1));
        assert_eq!(cart.items()[0].quantity.value(), 3); // Merged
        cart.update_quantity("P1", None, 0).unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.remove_item("P1", None), Err(CartError::ItemNotFound));
    }

    #[test]
    fn test_sale_price_takes_precedence() {
        let cart = Cart::from_items([item("P1", 1500, Some(1200), 2), item("P2", 600, None, 1)]);
        assert_eq!(cart.subtotal(), Money::from_units(3000));
    }

    #[test]
    fn test_variants_are_separate_lines() {
        let mut red = item("SHIRT", 900, None, 1);
        red.variant = Some("red / M".into());
        let mut blue = item("SHIRT", 900, None, 1);
        blue.variant = Some("blue / M".into());
        let cart = Cart::from_items([red, blue]);
        assert_eq!(cart.item_count(), 2);
    }

    #[test]
    fn test_snapshot_keeps_price_at_order_time() {
        let mut cart = Cart::from_items([item("P1", 1500, Some(1200), 1)]);
        let snapshot = cart.snapshot_items();
        cart.items[0].sale_price = None;
        assert_eq!(snapshot[0].unit_price, Money::from_units(1200));
    }
}
