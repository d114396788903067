use crate::config::CheckoutConfig;
use crate::entities::{cart_item, product};
use crate::errors::{CartLineRejection, InvalidCartLine, ServiceError};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// A cart line joined with the product it points at.
#[derive(Debug, Clone)]
pub struct CartLine {
    pub cart_item_id: String,
    pub product_id: String,
    pub product_name: String,
    pub seller_id: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub available_stock: i32,
    pub product_active: bool,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Cart lines destined for one seller, priced.
#[derive(Debug, Clone)]
pub struct SellerGroup {
    pub seller_id: String,
    pub lines: Vec<CartLine>,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Loads, validates and splits buyer carts.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Loads the buyer's cart joined with product data.
    #[instrument(skip(self))]
    pub async fn load_cart(&self, buyer_id: &str) -> Result<Vec<CartLine>, ServiceError> {
        let rows = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(buyer_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(product::Entity)
            .all(&*self.db)
            .await?;

        let mut lines = Vec::with_capacity(rows.len());
        for (item, maybe_product) in rows {
            let product = maybe_product.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart item {} references missing product {}",
                    item.id, item.product_id
                ))
            })?;

            lines.push(CartLine {
                cart_item_id: item.id,
                product_id: product.id,
                product_name: product.name,
                seller_id: product.seller_id,
                unit_price: product.price,
                quantity: item.quantity,
                available_stock: product.stock,
                product_active: product.is_active,
            });
        }

        Ok(lines)
    }
}

/// Checks every line; reports all failures at once instead of stopping at the
/// first one.
pub fn validate_lines(lines: &[CartLine]) -> Result<(), ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::EmptyCart);
    }

    let mut invalid = Vec::new();
    for line in lines {
        if !line.product_active {
            invalid.push(InvalidCartLine {
                product_id: line.product_id.clone(),
                product_name: line.product_name.clone(),
                reason: CartLineRejection::InactiveProduct,
                available: None,
                requested: None,
            });
            continue;
        }

        if line.available_stock < line.quantity {
            invalid.push(InvalidCartLine {
                product_id: line.product_id.clone(),
                product_name: line.product_name.clone(),
                reason: CartLineRejection::InsufficientStock,
                available: Some(line.available_stock),
                requested: Some(line.quantity),
            });
        }
    }

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::CartValidation(invalid))
    }
}

/// Splits validated lines into one priced group per seller.
///
/// Shipping is charged per seller group: free above the threshold, a flat
/// rate otherwise. Tax is currently always zero. Every input line lands in
/// exactly one group.
pub fn split_by_seller(lines: Vec<CartLine>, pricing: &CheckoutConfig) -> Vec<SellerGroup> {
    let mut by_seller: BTreeMap<String, Vec<CartLine>> = BTreeMap::new();
    for line in lines {
        by_seller.entry(line.seller_id.clone()).or_default().push(line);
    }

    by_seller
        .into_iter()
        .map(|(seller_id, lines)| {
            let subtotal: Decimal = lines.iter().map(CartLine::line_total).sum();
            let shipping = shipping_for(subtotal, pricing);
            let tax = Decimal::ZERO;
            let total = subtotal + shipping + tax;
            SellerGroup {
                seller_id,
                lines,
                subtotal,
                shipping,
                tax,
                total,
            }
        })
        .collect()
}

fn shipping_for(subtotal: Decimal, pricing: &CheckoutConfig) -> Decimal {
    if subtotal > pricing.free_shipping_threshold {
        Decimal::ZERO
    } else {
        pricing.flat_shipping_rate
    }
}
