use crate::entities::{payment, plan, seller, subscription, user};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{
    ChargeRequest, CustomerRequest, CustomerResolution, GatewayClient, GatewayError, PaymentStatus,
    PixQrCode,
};
use crate::services::orders::OrderService;
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const SUBSCRIPTION_PENDING: &str = "PENDING";
pub const SUBSCRIPTION_ACTIVE: &str = "ACTIVE";
pub const SUBSCRIPTION_CANCELLED: &str = "CANCELLED";

const ORDER_PAYMENT_PAID: &str = "paid";

// Accepted by the gateway sandbox for customers without a document on file.
const PLACEHOLDER_TAX_ID: &str = "11144477735";

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreatePlanPaymentRequest {
    pub plan_id: String,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanPaymentResponse {
    /// The plan is free; it was activated without touching the gateway
    FreePlanActivated {
        subscription_id: String,
        plan_id: String,
    },
    /// A charge was created and is awaiting payment
    ChargeCreated {
        payment_id: String,
        charge_id: String,
        status: String,
        amount: Decimal,
        due_date: Option<String>,
        invoice_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pix_qr_code: Option<PixQrCode>,
        customer_resolution: CustomerResolution,
    },
}

/// Incoming gateway webhook payload.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WebhookEvent {
    pub event: String,
    pub payment: WebhookCharge,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WebhookCharge {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "externalReference", default)]
    pub external_reference: Option<String>,
}

/// Plan payments, webhook reconciliation and subscription activation.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<GatewayClient>,
    order_service: Arc<OrderService>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<GatewayClient>,
        order_service: Arc<OrderService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            order_service,
        }
    }

    /// Creates a gateway charge for a plan purchase, or activates the plan
    /// directly when it is free.
    #[instrument(skip(self, request), fields(user_id = %user_id, plan_id = %request.plan_id))]
    pub async fn create_plan_payment(
        &self,
        user_id: &str,
        request: CreatePlanPaymentRequest,
    ) -> Result<PlanPaymentResponse, ServiceError> {
        let user_row = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("User not found".to_string()))?;

        let plan_row = plan::Entity::find_by_id(&request.plan_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Plan {} not found", request.plan_id)))?;

        if !plan_row.is_active {
            return Err(ServiceError::InvalidOperation(
                "Plan is no longer offered".to_string(),
            ));
        }

        let seller_row = seller::Entity::find()
            .filter(seller::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::Forbidden("Only sellers can purchase plans".to_string())
            })?;

        if plan_row.is_free() {
            return self.activate_free_plan(&seller_row, &plan_row).await;
        }

        let (customer_id, resolution) = self.resolve_customer(&user_row).await?;

        let now = Utc::now();
        let external_reference = format!(
            "plan_{}_user_{}_{}",
            plan_row.id,
            user_row.id,
            now.timestamp_millis()
        );
        let charge = self
            .gateway
            .create_charge(&ChargeRequest {
                customer: customer_id,
                billing_type: request.payment_method.to_uppercase(),
                value: plan_row.price,
                due_date: self.gateway.due_date(),
                description: format!("Plano {}", plan_row.name),
                external_reference: external_reference.clone(),
            })
            .await?;

        // The QR code is cosmetic; a charge without one is still payable.
        let pix_qr_code = if request.payment_method.eq_ignore_ascii_case("pix") {
            match self.gateway.get_pix_qr_code(&charge.id).await {
                Ok(qr) => qr,
                Err(e) => {
                    warn!("Failed to fetch PIX QR code for {}: {}", charge.id, e);
                    None
                }
            }
        } else {
            None
        };

        // The subscription only exists once the gateway accepted the charge;
        // it lands together with the payment row so a crash between the two
        // cannot strand either side.
        let status = charge.mapped_status();
        let subscription_id = Uuid::new_v4().to_string();
        let payment_id = Uuid::new_v4().to_string();
        let txn = self.db.begin().await?;

        // Earlier purchase attempts the buyer abandoned are superseded.
        subscription::Entity::update_many()
            .col_expr(
                subscription::Column::Status,
                Expr::value(SUBSCRIPTION_CANCELLED),
            )
            .col_expr(subscription::Column::UpdatedAt, Expr::value(now))
            .filter(subscription::Column::SellerId.eq(seller_row.id.clone()))
            .filter(subscription::Column::Status.eq(SUBSCRIPTION_PENDING))
            .exec(&txn)
            .await?;

        subscription::ActiveModel {
            id: Set(subscription_id.clone()),
            seller_id: Set(seller_row.id.clone()),
            plan_id: Set(plan_row.id.clone()),
            status: Set(SUBSCRIPTION_PENDING.to_string()),
            started_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        payment::ActiveModel {
            id: Set(payment_id.clone()),
            user_id: Set(user_row.id.clone()),
            order_id: Set(None),
            subscription_id: Set(Some(subscription_id)),
            gateway_charge_id: Set(charge.id.clone()),
            amount: Set(charge.value),
            method: Set(request.payment_method.to_uppercase()),
            status: Set(status.as_str().to_string()),
            payment_url: Set(charge.invoice_url.clone()),
            pix_payload: Set(pix_qr_code.as_ref().map(|qr| qr.payload.clone())),
            external_reference: Set(Some(external_reference)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        counter!("marketplace_payments.charges_created", 1);

        if let Err(e) = self
            .event_sender
            .send(Event::ChargeCreated {
                payment_id: payment_id.clone(),
                gateway_charge_id: charge.id.clone(),
            })
            .await
        {
            warn!("Failed to publish charge created event: {}", e);
        }

        Ok(PlanPaymentResponse::ChargeCreated {
            payment_id,
            charge_id: charge.id,
            status: status.as_str().to_string(),
            amount: charge.value,
            due_date: charge.due_date,
            invoice_url: charge.invoice_url,
            pix_qr_code,
            customer_resolution: resolution,
        })
    }

    /// Free plans skip the gateway entirely.
    async fn activate_free_plan(
        &self,
        seller_row: &seller::Model,
        plan_row: &plan::Model,
    ) -> Result<PlanPaymentResponse, ServiceError> {
        let subscription_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let txn = self.db.begin().await?;

        subscription::Entity::update_many()
            .col_expr(
                subscription::Column::Status,
                Expr::value(SUBSCRIPTION_CANCELLED),
            )
            .col_expr(subscription::Column::UpdatedAt, Expr::value(now))
            .filter(subscription::Column::SellerId.eq(seller_row.id.clone()))
            .filter(subscription::Column::Status.eq(SUBSCRIPTION_ACTIVE))
            .exec(&txn)
            .await?;

        subscription::ActiveModel {
            id: Set(subscription_id.clone()),
            seller_id: Set(seller_row.id.clone()),
            plan_id: Set(plan_row.id.clone()),
            status: Set(SUBSCRIPTION_ACTIVE.to_string()),
            started_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        seller::Entity::update_many()
            .col_expr(seller::Column::PlanId, Expr::value(plan_row.id.clone()))
            .col_expr(seller::Column::UpdatedAt, Expr::value(now))
            .filter(seller::Column::Id.eq(seller_row.id.clone()))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(seller_id = %seller_row.id, plan_id = %plan_row.id, "Free plan activated");

        if let Err(e) = self
            .event_sender
            .send(Event::PlanChanged {
                seller_id: seller_row.id.clone(),
                plan_id: plan_row.id.clone(),
            })
            .await
        {
            warn!("Failed to publish plan changed event: {}", e);
        }

        Ok(PlanPaymentResponse::FreePlanActivated {
            subscription_id,
            plan_id: plan_row.id.clone(),
        })
    }

    /// Resolves the gateway customer for a user, caching the id locally.
    ///
    /// The gateway allows duplicate customers, so registration is attempted
    /// first; a rejection falls back to searching by email.
    #[instrument(skip(self, user_row), fields(user_id = %user_row.id))]
    pub async fn resolve_customer(
        &self,
        user_row: &user::Model,
    ) -> Result<(String, CustomerResolution), ServiceError> {
        if let Some(cached) = &user_row.gateway_customer_id {
            return Ok((cached.clone(), CustomerResolution::Cached));
        }

        // The gateway requires a tax id; a profile without one gets the
        // placeholder document instead of failing the whole purchase.
        let request = CustomerRequest {
            name: user_row.name.clone(),
            email: user_row.email.clone(),
            phone: user_row.phone.clone(),
            cpf_cnpj: Some(
                user_row
                    .document
                    .clone()
                    .unwrap_or_else(|| PLACEHOLDER_TAX_ID.to_string()),
            ),
        };

        let (customer, resolution) = match self.gateway.create_customer(&request).await {
            Ok(customer) => (customer, CustomerResolution::Created),
            Err(GatewayError::Rejected { status, body }) => {
                warn!(
                    "Customer registration rejected ({}), searching by email",
                    status
                );
                let found = self
                    .gateway
                    .find_customers_by_email(&user_row.email)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(ServiceError::GatewayRejected { status, body })?;
                (found, CustomerResolution::Recovered)
            }
            Err(e) => return Err(e.into()),
        };

        user::Entity::update_many()
            .col_expr(
                user::Column::GatewayCustomerId,
                Expr::value(customer.id.clone()),
            )
            .col_expr(user::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(user::Column::Id.eq(user_row.id.clone()))
            .exec(&*self.db)
            .await?;

        Ok((customer.id, resolution))
    }

    /// Fetches a payment, reconciling it against the gateway first.
    ///
    /// A gateway outage degrades to serving the local state.
    #[instrument(skip(self))]
    pub async fn get_payment(
        &self,
        payment_id: &str,
        user_id: &str,
    ) -> Result<payment::Model, ServiceError> {
        let payment_row = payment::Entity::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment {} not found", payment_id))
            })?;

        // Ownership gates the gateway pull, not just the response; a foreign
        // id reads as missing.
        if payment_row.user_id != user_id {
            return Err(ServiceError::NotFound(format!(
                "Payment {} not found",
                payment_id
            )));
        }

        match self.gateway.get_charge(&payment_row.gateway_charge_id).await {
            Ok(charge) => {
                let fresh = charge.mapped_status();
                self.apply_status(&payment_row, fresh).await?;
                let reloaded = payment::Entity::find_by_id(payment_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Payment {} not found", payment_id))
                    })?;
                Ok(reloaded)
            }
            Err(e) => {
                warn!(
                    "Gateway lookup for charge {} failed, serving local state: {}",
                    payment_row.gateway_charge_id, e
                );
                Ok(payment_row)
            }
        }
    }

    /// Applies a webhook event. Unknown charges and replays are no-ops so the
    /// gateway always gets its 200.
    #[instrument(skip(self, event), fields(event = %event.event, charge_id = %event.payment.id))]
    pub async fn process_webhook(&self, event: WebhookEvent) -> Result<(), ServiceError> {
        let payment_row = match payment::Entity::find()
            .filter(payment::Column::GatewayChargeId.eq(event.payment.id.clone()))
            .one(&*self.db)
            .await?
        {
            Some(row) => row,
            None => {
                warn!("Webhook for unknown charge {}", event.payment.id);
                return Ok(());
            }
        };

        let new_status = event
            .payment
            .status
            .as_deref()
            .map(PaymentStatus::from_gateway)
            .unwrap_or_else(|| status_from_event_name(&event.event));

        if new_status == PaymentStatus::Unknown {
            info!("Ignoring webhook event {} with no usable status", event.event);
            return Ok(());
        }

        self.apply_status(&payment_row, new_status).await
    }

    /// Compare-and-set status transition plus its side effects.
    ///
    /// The guarded UPDATE makes replayed and concurrent deliveries collapse
    /// into a single applied transition.
    async fn apply_status(
        &self,
        payment_row: &payment::Model,
        new_status: PaymentStatus,
    ) -> Result<(), ServiceError> {
        let old_status = PaymentStatus::from_str_internal(&payment_row.status);
        if new_status == old_status {
            return Ok(());
        }

        let result = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(new_status.as_str()))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(payment_row.id.clone()))
            .filter(payment::Column::Status.eq(payment_row.status.clone()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            info!(
                payment_id = %payment_row.id,
                "Payment status already moved by a concurrent update"
            );
            return Ok(());
        }

        counter!("marketplace_payments.status_transitions", 1);

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentStatusChanged {
                payment_id: payment_row.id.clone(),
                old_status: old_status.as_str().to_string(),
                new_status: new_status.as_str().to_string(),
            })
            .await
        {
            warn!("Failed to publish payment status event: {}", e);
        }

        if new_status.is_paid() {
            self.on_payment_confirmed(payment_row).await?;
        } else if matches!(
            new_status,
            PaymentStatus::Refunded | PaymentStatus::Chargeback
        ) {
            self.cancel_linked_subscription(payment_row).await?;
        }

        Ok(())
    }

    /// Confirmation side effects: mark linked orders paid, activate the
    /// linked subscription.
    async fn on_payment_confirmed(
        &self,
        payment_row: &payment::Model,
    ) -> Result<(), ServiceError> {
        if let Err(e) = self
            .event_sender
            .send(Event::PaymentConfirmed {
                payment_id: payment_row.id.clone(),
                gateway_charge_id: payment_row.gateway_charge_id.clone(),
            })
            .await
        {
            warn!("Failed to publish payment confirmed event: {}", e);
        }

        if let Some(order_id) = &payment_row.order_id {
            self.order_service
                .set_payment_status(std::slice::from_ref(order_id), ORDER_PAYMENT_PAID)
                .await?;
        }

        if let Some(subscription_id) = &payment_row.subscription_id {
            self.activate_subscription(subscription_id).await?;
        }

        Ok(())
    }

    /// Flips a PENDING subscription to ACTIVE, points the seller at the new
    /// plan and cancels any other active subscription.
    async fn activate_subscription(&self, subscription_id: &str) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let sub = subscription::Entity::find_by_id(subscription_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Subscription {} not found", subscription_id))
            })?;

        let result = subscription::Entity::update_many()
            .col_expr(
                subscription::Column::Status,
                Expr::value(SUBSCRIPTION_ACTIVE),
            )
            .col_expr(subscription::Column::StartedAt, Expr::value(Some(now)))
            .col_expr(subscription::Column::UpdatedAt, Expr::value(now))
            .filter(subscription::Column::Id.eq(subscription_id))
            .filter(subscription::Column::Status.eq(SUBSCRIPTION_PENDING))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            info!(
                subscription_id = %subscription_id,
                "Subscription already activated, skipping"
            );
            txn.commit().await?;
            return Ok(());
        }

        self.retire_other_subscriptions(&txn, &sub, now).await?;

        seller::Entity::update_many()
            .col_expr(seller::Column::PlanId, Expr::value(sub.plan_id.clone()))
            .col_expr(seller::Column::UpdatedAt, Expr::value(now))
            .filter(seller::Column::Id.eq(sub.seller_id.clone()))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(
            subscription_id = %subscription_id,
            seller_id = %sub.seller_id,
            plan_id = %sub.plan_id,
            "Subscription activated"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::SubscriptionActivated {
                subscription_id: subscription_id.to_string(),
                seller_id: sub.seller_id.clone(),
                plan_id: sub.plan_id.clone(),
            })
            .await
        {
            warn!("Failed to publish subscription activated event: {}", e);
        }

        Ok(())
    }

    async fn retire_other_subscriptions(
        &self,
        txn: &DatabaseTransaction,
        sub: &subscription::Model,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        subscription::Entity::update_many()
            .col_expr(
                subscription::Column::Status,
                Expr::value(SUBSCRIPTION_CANCELLED),
            )
            .col_expr(subscription::Column::UpdatedAt, Expr::value(now))
            .filter(subscription::Column::SellerId.eq(sub.seller_id.clone()))
            .filter(subscription::Column::Status.eq(SUBSCRIPTION_ACTIVE))
            .filter(subscription::Column::Id.ne(sub.id.clone()))
            .exec(txn)
            .await?;
        Ok(())
    }

    async fn cancel_linked_subscription(
        &self,
        payment_row: &payment::Model,
    ) -> Result<(), ServiceError> {
        let Some(subscription_id) = &payment_row.subscription_id else {
            return Ok(());
        };

        subscription::Entity::update_many()
            .col_expr(
                subscription::Column::Status,
                Expr::value(SUBSCRIPTION_CANCELLED),
            )
            .col_expr(subscription::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(subscription::Column::Id.eq(subscription_id.clone()))
            .filter(
                subscription::Column::Status
                    .is_in([SUBSCRIPTION_PENDING, SUBSCRIPTION_ACTIVE]),
            )
            .exec(&*self.db)
            .await?;

        info!(
            subscription_id = %subscription_id,
            payment_id = %payment_row.id,
            "Subscription cancelled after payment reversal"
        );
        Ok(())
    }
}

/// Some gateway deliveries omit the charge status; the event name still tells
/// us what happened.
fn status_from_event_name(event: &str) -> PaymentStatus {
    match event {
        "PAYMENT_CONFIRMED" | "PAYMENT_RECEIVED" => PaymentStatus::Paid,
        "PAYMENT_OVERDUE" => PaymentStatus::Overdue,
        "PAYMENT_REFUNDED" => PaymentStatus::Refunded,
        "PAYMENT_CHARGEBACK_REQUESTED" => PaymentStatus::Chargeback,
        _ => PaymentStatus::Unknown,
    }
}
