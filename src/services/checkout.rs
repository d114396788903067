use crate::config::CheckoutConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::cart::{split_by_seller, validate_lines, CartService};
use crate::services::orders::OrderService;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::SqlErr;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

/// Billing methods accepted at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingMethod {
    Pix,
    Boleto,
    CreditCard,
}

impl BillingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pix => "PIX",
            Self::Boleto => "BOLETO",
            Self::CreditCard => "CREDIT_CARD",
        }
    }

    pub fn payment_instructions(&self) -> &'static str {
        match self {
            Self::Pix => "Aguarde as instruções de pagamento PIX que serão enviadas por email",
            _ => "Aguarde o processamento do pagamento",
        }
    }
}

impl Default for BillingMethod {
    fn default() -> Self {
        Self::Pix
    }
}

/// Delivery address captured at checkout and frozen onto each order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 200, message = "Street is required"))]
    pub street: String,

    #[validate(length(min = 1, max = 100, message = "City is required"))]
    pub city: String,

    #[serde(default)]
    pub state: Option<String>,

    #[validate(length(min = 1, max = 20, message = "Zip code is required"))]
    pub zip_code: String,

    #[serde(default)]
    pub complement: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub shipping_address: ShippingAddress,

    #[serde(default)]
    pub payment_method: BillingMethod,

    #[serde(default)]
    pub notes: Option<String>,

    /// Client-chosen key; resubmitting with the same key returns the orders
    /// created the first time instead of creating new ones
    #[serde(default)]
    #[validate(length(min = 8, max = 128, message = "Idempotency key must be 8-128 characters"))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutOrderSummary {
    pub order_id: String,
    pub seller_id: String,
    pub store_name: String,
    pub items: usize,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutSummary {
    pub total_orders: usize,
    pub total_amount: Decimal,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutPaymentInfo {
    pub method: String,
    pub status: String,
    pub payment_url: Option<String>,
    pub instructions: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub orders: Vec<CheckoutOrderSummary>,
    pub summary: CheckoutSummary,
    pub payment: CheckoutPaymentInfo,
    /// True when this response was served from a previous checkout with the
    /// same idempotency key
    pub replayed: bool,
}

/// Turns a buyer's cart into per-seller orders.
#[derive(Clone)]
pub struct CheckoutService {
    cart_service: Arc<CartService>,
    order_service: Arc<OrderService>,
    event_sender: Arc<EventSender>,
    pricing: CheckoutConfig,
}

impl CheckoutService {
    pub fn new(
        cart_service: Arc<CartService>,
        order_service: Arc<OrderService>,
        event_sender: Arc<EventSender>,
        pricing: CheckoutConfig,
    ) -> Self {
        Self {
            cart_service,
            order_service,
            event_sender,
            pricing,
        }
    }

    /// Runs the full checkout: replay check, validation, split, write.
    #[instrument(skip(self, request), fields(buyer_id = %buyer_id))]
    pub async fn checkout(
        &self,
        buyer_id: &str,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        if let Some(key) = request.idempotency_key.as_deref() {
            let existing = self
                .order_service
                .find_by_checkout_key(buyer_id, key)
                .await?;
            if !existing.is_empty() {
                info!(checkout_key = %key, orders = existing.len(), "Replaying previous checkout");
                return self.replay_response(&existing, request.payment_method).await;
            }
        }

        let lines = self.cart_service.load_cart(buyer_id).await?;
        validate_lines(&lines)?;
        let groups = split_by_seller(lines, &self.pricing);

        let address_snapshot = serde_json::to_string(&request.shipping_address)
            .map_err(|e| {
                ServiceError::InternalError(format!("Failed to snapshot shipping address: {}", e))
            })?;

        let checkout_key = request.idempotency_key.clone();
        let orders = match self
            .order_service
            .create_orders(
                buyer_id,
                &groups,
                request.payment_method.as_str(),
                Some(address_snapshot),
                request.notes,
                checkout_key.clone(),
            )
            .await
        {
            Ok(orders) => orders,
            // A concurrent submission with the same key committed between the
            // replay check and our insert; serve its orders instead.
            Err(ServiceError::DatabaseError(db_err))
                if checkout_key.is_some()
                    && matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
            {
                let key = checkout_key.as_deref().unwrap_or_default();
                let existing = self.order_service.find_by_checkout_key(buyer_id, key).await?;
                if existing.is_empty() {
                    return Err(ServiceError::DatabaseError(db_err));
                }
                info!(checkout_key = %key, "Lost the checkout key race, replaying the winner");
                return self.replay_response(&existing, request.payment_method).await;
            }
            Err(e) => return Err(e),
        };

        let seller_ids: Vec<String> = orders.iter().map(|o| o.seller_id.clone()).collect();
        let store_names = self.order_service.store_names(&seller_ids).await?;

        let order_summaries: Vec<CheckoutOrderSummary> = orders
            .iter()
            .zip(groups.iter())
            .map(|(order_row, group)| CheckoutOrderSummary {
                order_id: order_row.id.clone(),
                seller_id: order_row.seller_id.clone(),
                store_name: store_names
                    .get(&order_row.seller_id)
                    .cloned()
                    .unwrap_or_default(),
                items: group.lines.len(),
                subtotal: order_row.subtotal,
                shipping: order_row.shipping,
                total: order_row.total,
            })
            .collect();

        let total_amount: Decimal = orders.iter().map(|o| o.total).sum();
        counter!("marketplace_checkout.completed", 1);
        counter!("marketplace_checkout.orders_created", orders.len() as u64);

        if let Err(e) = self
            .event_sender
            .send(Event::CheckoutCompleted {
                buyer_id: buyer_id.to_string(),
                order_ids: orders.iter().map(|o| o.id.clone()).collect(),
                total_amount,
            })
            .await
        {
            warn!("Failed to publish checkout completed event: {}", e);
        }

        Ok(Self::build_response(
            order_summaries,
            total_amount,
            request.payment_method,
            false,
        ))
    }

    async fn replay_response(
        &self,
        orders: &[order::Model],
        method: BillingMethod,
    ) -> Result<CheckoutResponse, ServiceError> {
        let seller_ids: Vec<String> = orders.iter().map(|o| o.seller_id.clone()).collect();
        let store_names = self.order_service.store_names(&seller_ids).await?;

        let mut summaries = Vec::with_capacity(orders.len());
        for order_row in orders {
            let items = self.order_service.order_items(&order_row.id).await?;
            summaries.push(CheckoutOrderSummary {
                order_id: order_row.id.clone(),
                seller_id: order_row.seller_id.clone(),
                store_name: store_names
                    .get(&order_row.seller_id)
                    .cloned()
                    .unwrap_or_default(),
                items: items.len(),
                subtotal: order_row.subtotal,
                shipping: order_row.shipping,
                total: order_row.total,
            });
        }

        let total_amount: Decimal = orders.iter().map(|o| o.total).sum();
        Ok(Self::build_response(summaries, total_amount, method, true))
    }

    fn build_response(
        orders: Vec<CheckoutOrderSummary>,
        total_amount: Decimal,
        method: BillingMethod,
        replayed: bool,
    ) -> CheckoutResponse {
        CheckoutResponse {
            summary: CheckoutSummary {
                total_orders: orders.len(),
                total_amount,
                payment_method: method.as_str().to_string(),
            },
            payment: CheckoutPaymentInfo {
                method: method.as_str().to_string(),
                status: "pending".to_string(),
                payment_url: None,
                instructions: method.payment_instructions().to_string(),
            },
            orders,
            replayed,
        }
    }
}
