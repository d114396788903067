pub mod checkout;
pub mod common;
pub mod payment_webhooks;
pub mod payments;
pub mod products;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::GatewayClient;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<crate::services::CartService>,
    pub checkout: Arc<crate::services::CheckoutService>,
    pub orders: Arc<crate::services::OrderService>,
    pub payments: Arc<crate::services::PaymentService>,
    pub quota: Arc<crate::services::QuotaService>,
}

impl AppServices {
    /// Wires every service against one pool, event channel and gateway client.
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let gateway = Arc::new(GatewayClient::from_config(&config.gateway));

        let cart = Arc::new(crate::services::CartService::new(db_pool.clone()));
        let orders = Arc::new(crate::services::OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let checkout = Arc::new(crate::services::CheckoutService::new(
            cart.clone(),
            orders.clone(),
            event_sender.clone(),
            config.checkout.clone(),
        ));
        let payments = Arc::new(crate::services::PaymentService::new(
            db_pool.clone(),
            event_sender,
            gateway,
            orders.clone(),
        ));
        let quota = Arc::new(crate::services::QuotaService::new(db_pool));

        Self {
            cart,
            checkout,
            orders,
            payments,
            quota,
        }
    }
}
