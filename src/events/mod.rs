use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Checkout events
    CheckoutCompleted {
        buyer_id: String,
        order_ids: Vec<String>,
        total_amount: Decimal,
    },

    // Order events
    OrderCreated(String),

    // Payment events
    ChargeCreated {
        payment_id: String,
        gateway_charge_id: String,
    },
    PaymentConfirmed {
        payment_id: String,
        gateway_charge_id: String,
    },
    PaymentStatusChanged {
        payment_id: String,
        old_status: String,
        new_status: String,
    },

    // Subscription events
    SubscriptionActivated {
        subscription_id: String,
        seller_id: String,
        plan_id: String,
    },
    PlanChanged {
        seller_id: String,
        plan_id: String,
    },

    // Product events
    ProductCreated(String),
}

// Drains the event channel. Handlers here are log-only; downstream consumers
// subscribe by replacing this loop with their own receiver.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CheckoutCompleted {
                buyer_id,
                order_ids,
                total_amount,
            } => {
                info!(
                    buyer_id = %buyer_id,
                    orders = order_ids.len(),
                    total = %total_amount,
                    "Checkout completed"
                );
            }
            Event::PaymentConfirmed {
                payment_id,
                gateway_charge_id,
            } => {
                info!(
                    payment_id = %payment_id,
                    gateway_charge_id = %gateway_charge_id,
                    "Payment confirmed"
                );
            }
            Event::SubscriptionActivated {
                subscription_id,
                seller_id,
                plan_id,
            } => {
                info!(
                    subscription_id = %subscription_id,
                    seller_id = %seller_id,
                    plan_id = %plan_id,
                    "Subscription activated"
                );
            }
            Event::PaymentStatusChanged {
                payment_id,
                old_status,
                new_status,
            } if old_status == new_status => {
                warn!(payment_id = %payment_id, status = %new_status, "Redundant payment status event");
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}
