#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    extract::State,
    http::{Method, Request},
    middleware,
    response::Response,
    Router,
};
use chrono::Utc;
use marketplace_settlement_api::{
    api_v1_routes,
    auth::AuthService,
    config::AppConfig,
    db,
    entities::{cart_item, order, payment, plan, product, seller, subscription, user},
    events::{self, EventSender},
    handlers::AppServices,
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "integration_test_secret_that_is_definitely_longer_than_sixty_four_characters_ok";
pub const WEBHOOK_TOKEN: &str = "whk_integration_token";

/// Spins up the full router against a throwaway SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    auth_service: Arc<AuthService>,
    _db_file: tempfile::NamedTempFile,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// App with the gateway pointed at an unroutable address. Tests that
    /// never reach the gateway should use this.
    pub async fn new() -> Self {
        Self::with_gateway(None).await
    }

    /// App with the gateway pointed at a mock server base URL.
    pub async fn with_gateway(gateway_base_url: Option<&str>) -> Self {
        let db_file = tempfile::Builder::new()
            .prefix("marketplace_test_")
            .suffix(".db")
            .tempfile()
            .expect("create temp database file");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.path().display()),
            TEST_JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway.webhook_token = Some(WEBHOOK_TOKEN.to_string());
        if let Some(base_url) = gateway_base_url {
            cfg.gateway.base_url = base_url.to_string();
            cfg.gateway.api_key = Some("test_api_key".to_string());
            cfg.gateway.timeout_secs = 2;
        }

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("create test database");
        db::bootstrap_schema(&pool)
            .await
            .expect("bootstrap test schema");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth_service = Arc::new(AuthService::new(cfg.jwt_secret.clone(), cfg.jwt_expiration));
        let services = AppServices::new(db_arc.clone(), Arc::new(event_sender.clone()), &cfg);

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let api_router = api_v1_routes().layer(middleware::from_fn_with_state(
            auth_service.clone(),
            |State(auth): State<Arc<AuthService>>,
             mut req: Request<Body>,
             next: middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ));

        let router = Router::new()
            .nest("/api/v1", api_router)
            .with_state(state.clone());

        Self {
            router,
            state,
            auth_service,
            _db_file: db_file,
            _event_task: event_task,
        }
    }

    /// Mint a bearer token for a seeded user.
    pub fn token_for(&self, user_row: &user::Model) -> String {
        self.auth_service
            .generate_token(&user_row.id, Some(&user_row.email))
            .expect("generate test token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Raw request with arbitrary headers, used by webhook tests.
    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    // ---- seed helpers ----

    pub async fn seed_user(&self, email: &str) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            email: Set(email.to_string()),
            name: Set(email.split('@').next().unwrap_or("user").to_string()),
            phone: Set(None),
            document: Set(None),
            gateway_customer_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_plan(&self, name: &str, price: Decimal, max_products: i64) -> plan::Model {
        let now = Utc::now();
        plan::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            name: Set(name.to_string()),
            slug: Set(format!(
                "{}-{}",
                name.to_lowercase().replace(' ', "-"),
                Uuid::new_v4().simple()
            )),
            price: Set(price),
            billing_period: Set("monthly".to_string()),
            max_products: Set(max_products),
            max_photos_per_product: Set(5),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed plan")
    }

    pub async fn seed_seller(&self, owner: &user::Model, plan_row: &plan::Model) -> seller::Model {
        let now = Utc::now();
        seller::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(owner.id.clone()),
            store_name: Set(format!("{} Store", owner.name)),
            plan_id: Set(plan_row.id.clone()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed seller")
    }

    pub async fn seed_product(
        &self,
        seller_id: &str,
        name: &str,
        price: Decimal,
        stock: i32,
    ) -> product::Model {
        self.seed_product_with(seller_id, name, price, stock, true)
            .await
    }

    pub async fn seed_product_with(
        &self,
        seller_id: &str,
        name: &str,
        price: Decimal,
        stock: i32,
        is_active: bool,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            seller_id: Set(seller_id.to_string()),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            photos: Set(None),
            is_active: Set(is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn add_to_cart(&self, user_id: &str, product_id: &str, quantity: i32) {
        let now = Utc::now();
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(user_id.to_string()),
            product_id: Set(product_id.to_string()),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed cart item");
    }

    pub async fn seed_subscription(
        &self,
        seller_id: &str,
        plan_id: &str,
        status: &str,
    ) -> subscription::Model {
        let now = Utc::now();
        let started_at = (status == "ACTIVE").then_some(now);
        subscription::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            seller_id: Set(seller_id.to_string()),
            plan_id: Set(plan_id.to_string()),
            status: Set(status.to_string()),
            started_at: Set(started_at),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed subscription")
    }

    pub async fn seed_order(&self, buyer_id: &str, seller_id: &str, total: Decimal) -> order::Model {
        let now = Utc::now();
        order::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            buyer_id: Set(buyer_id.to_string()),
            seller_id: Set(seller_id.to_string()),
            status: Set("pending".to_string()),
            payment_status: Set("pending".to_string()),
            payment_method: Set("PIX".to_string()),
            subtotal: Set(total),
            shipping: Set(Decimal::ZERO),
            tax: Set(Decimal::ZERO),
            total: Set(total),
            shipping_address: Set(Some("Rua Teste, 100".to_string())),
            notes: Set(None),
            checkout_key: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed order")
    }

    pub async fn seed_payment(
        &self,
        user_id: &str,
        gateway_charge_id: &str,
        amount: Decimal,
        status: &str,
        order_id: Option<String>,
        subscription_id: Option<String>,
    ) -> payment::Model {
        let now = Utc::now();
        payment::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(user_id.to_string()),
            order_id: Set(order_id),
            subscription_id: Set(subscription_id),
            gateway_charge_id: Set(gateway_charge_id.to_string()),
            amount: Set(amount),
            method: Set("PIX".to_string()),
            status: Set(status.to_string()),
            payment_url: Set(None),
            pix_payload: Set(None),
            external_reference: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed payment")
    }

    // ---- reload helpers ----

    pub async fn reload_product(&self, id: &str) -> product::Model {
        product::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
    }

    pub async fn reload_seller(&self, id: &str) -> seller::Model {
        seller::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query seller")
            .expect("seller exists")
    }

    pub async fn reload_order(&self, id: &str) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query order")
            .expect("order exists")
    }

    pub async fn reload_payment(&self, id: &str) -> payment::Model {
        payment::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query payment")
            .expect("payment exists")
    }

    pub async fn reload_subscription(&self, id: &str) -> subscription::Model {
        subscription::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query subscription")
            .expect("subscription exists")
    }

    pub async fn cart_item_count(&self, user_id: &str) -> usize {
        use sea_orm::{ColumnTrait, QueryFilter};
        cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .all(&*self.state.db)
            .await
            .expect("query cart items")
            .len()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Parse a response body as JSON.
pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Decimal fields serialize as JSON strings; parse them back for assertions.
pub fn decimal_field(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected decimal string, got {}", value))
        .parse()
        .expect("parse decimal")
}
