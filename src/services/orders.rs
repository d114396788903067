use crate::entities::{cart_item, order, order_item, product, seller};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::cart::SellerGroup;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const ORDER_STATUS_PENDING: &str = "pending";
pub const PAYMENT_STATUS_PENDING: &str = "pending";

/// Writes the orders produced by a cart split.
///
/// Everything happens in one transaction: orders, order items, stock
/// decrements and the cart wipe either all land or none do.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the orders previously created under this checkout key, oldest
    /// first. Used to answer replays without touching stock again.
    #[instrument(skip(self))]
    pub async fn find_by_checkout_key(
        &self,
        buyer_id: &str,
        checkout_key: &str,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::BuyerId.eq(buyer_id))
            .filter(order::Column::CheckoutKey.eq(checkout_key))
            .order_by_asc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(orders)
    }

    /// Persists one order per seller group and decrements stock.
    ///
    /// Stock is taken with a guarded UPDATE; if any line cannot be satisfied
    /// the whole transaction rolls back and the cart stays intact.
    #[instrument(skip(self, groups), fields(groups = groups.len()))]
    pub async fn create_orders(
        &self,
        buyer_id: &str,
        groups: &[SellerGroup],
        payment_method: &str,
        shipping_address: Option<String>,
        notes: Option<String>,
        checkout_key: Option<String>,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();
        let mut created = Vec::with_capacity(groups.len());

        for group in groups {
            let order_id = Uuid::new_v4().to_string();

            let order_model = order::ActiveModel {
                id: Set(order_id.clone()),
                buyer_id: Set(buyer_id.to_string()),
                seller_id: Set(group.seller_id.clone()),
                status: Set(ORDER_STATUS_PENDING.to_string()),
                payment_status: Set(PAYMENT_STATUS_PENDING.to_string()),
                payment_method: Set(payment_method.to_string()),
                subtotal: Set(group.subtotal),
                shipping: Set(group.shipping),
                tax: Set(group.tax),
                total: Set(group.total),
                shipping_address: Set(shipping_address.clone()),
                notes: Set(notes.clone()),
                checkout_key: Set(checkout_key.clone()),
                created_at: Set(now),
                updated_at: Set(now),
            };
            let order_row = order_model.insert(&txn).await?;

            for line in &group.lines {
                order_item::ActiveModel {
                    id: Set(Uuid::new_v4().to_string()),
                    order_id: Set(order_id.clone()),
                    product_id: Set(line.product_id.clone()),
                    product_name: Set(line.product_name.clone()),
                    quantity: Set(line.quantity),
                    unit_price: Set(line.unit_price),
                    line_total: Set(line.line_total()),
                    created_at: Set(now),
                }
                .insert(&txn)
                .await?;

                self.take_stock(&txn, &line.product_id, line.quantity)
                    .await?;
            }

            info!(order_id = %order_row.id, seller_id = %group.seller_id, total = %group.total, "Order created");
            created.push(order_row);
        }

        // Wipe the cart inside the same transaction so a failed checkout
        // leaves it untouched.
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(buyer_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        for order_row in &created {
            if let Err(e) = self
                .event_sender
                .send(Event::OrderCreated(order_row.id.clone()))
                .await
            {
                warn!("Failed to publish order created event: {}", e);
            }
        }

        Ok(created)
    }

    /// Guarded decrement. Zero affected rows means the stock moved between
    /// validation and now.
    async fn take_stock(
        &self,
        txn: &DatabaseTransaction,
        product_id: &str,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            warn!(product_id = %product_id, quantity, "Stock take lost the race, rolling back checkout");
            return Err(ServiceError::InsufficientStock {
                product_id: product_id.to_string(),
            });
        }

        Ok(())
    }

    /// Storefront names for a set of sellers, keyed by seller id.
    #[instrument(skip(self, seller_ids))]
    pub async fn store_names(
        &self,
        seller_ids: &[String],
    ) -> Result<HashMap<String, String>, ServiceError> {
        if seller_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sellers = seller::Entity::find()
            .filter(seller::Column::Id.is_in(seller_ids.to_vec()))
            .all(&*self.db)
            .await?;
        Ok(sellers.into_iter().map(|s| (s.id, s.store_name)).collect())
    }

    /// Items belonging to one order.
    #[instrument(skip(self))]
    pub async fn order_items(
        &self,
        order_id: &str,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// Marks every order in a checkout group with a new payment status.
    #[instrument(skip(self))]
    pub async fn set_payment_status(
        &self,
        order_ids: &[String],
        new_status: &str,
    ) -> Result<(), ServiceError> {
        if order_ids.is_empty() {
            return Ok(());
        }

        order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.is_in(order_ids.to_vec()))
            .exec(&*self.db)
            .await?;

        Ok(())
    }
}
