use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::types::{Charge, ChargeRequest, Customer, CustomerList, CustomerRequest, PixQrCode};
use super::GatewayError;
use crate::config::GatewayConfig;

/// HTTP client for the billing gateway.
///
/// Authentication is the `access_token` header. Idempotent GETs are retried
/// once on transport failure; POSTs are never retried, a duplicate charge is
/// worse than a surfaced error.
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    charge_due_days: i64,
}

impl GatewayClient {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.timeout_secs))
                .build()
                .unwrap(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            charge_due_days: cfg.charge_due_days,
        }
    }

    fn api_key(&self) -> Result<&str, GatewayError> {
        self.api_key.as_deref().ok_or(GatewayError::Configuration)
    }

    /// Due date for a charge created now, formatted the way the gateway wants.
    pub fn due_date(&self) -> String {
        (Utc::now() + ChronoDuration::days(self.charge_due_days))
            .format("%Y-%m-%d")
            .to_string()
    }

    async fn send<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let api_key = self.api_key()?.to_string();
        let url = format!("{}{}", self.base_url, path);
        let retryable = method == Method::GET;

        let mut last_transport_error = None;
        let attempts = if retryable { 2 } else { 1 };

        for attempt in 1..=attempts {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("access_token", &api_key)
                .header("User-Agent", "marketplace-settlement-api");

            if !query.is_empty() {
                request = request.query(query);
            }

            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = response
                        .text()
                        .await
                        .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

                    if !status.is_success() {
                        return Err(GatewayError::Rejected {
                            status: status.as_u16(),
                            body: text,
                        });
                    }

                    debug!(%url, %status, "Gateway request succeeded");
                    return serde_json::from_str(&text)
                        .map_err(|e| GatewayError::Decode(e.to_string()));
                }
                Err(e) => {
                    warn!(%url, attempt, error = %e, "Gateway request failed");
                    last_transport_error = Some(e.to_string());
                }
            }
        }

        Err(GatewayError::Unreachable(
            last_transport_error.unwrap_or_else(|| "no attempt was made".to_string()),
        ))
    }

    /// Registers a customer with the gateway.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn create_customer(
        &self,
        request: &CustomerRequest,
    ) -> Result<Customer, GatewayError> {
        self.send(Method::POST, "/customers", &[], Some(request))
            .await
    }

    /// Looks up existing customers by email.
    #[instrument(skip(self))]
    pub async fn find_customers_by_email(&self, email: &str) -> Result<Vec<Customer>, GatewayError> {
        let list: CustomerList = self
            .send::<(), _>(Method::GET, "/customers", &[("email", email)], None)
            .await?;
        Ok(list.data)
    }

    /// Creates a charge. Never retried.
    #[instrument(skip(self, request), fields(customer = %request.customer, value = %request.value))]
    pub async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError> {
        self.send(Method::POST, "/payments", &[], Some(request))
            .await
    }

    /// Fetches the current state of a charge.
    #[instrument(skip(self))]
    pub async fn get_charge(&self, charge_id: &str) -> Result<Charge, GatewayError> {
        let path = format!("/payments/{}", charge_id);
        self.send::<(), _>(Method::GET, &path, &[], None).await
    }

    /// Fetches the PIX QR code for a charge. `Ok(None)` when the gateway has
    /// not generated one (404); callers treat the QR code as best-effort.
    #[instrument(skip(self))]
    pub async fn get_pix_qr_code(&self, charge_id: &str) -> Result<Option<PixQrCode>, GatewayError> {
        let path = format!("/payments/{}/pixQrCode", charge_id);
        match self
            .send::<(), PixQrCode>(Method::GET, &path, &[], None)
            .await
        {
            Ok(qr) => Ok(Some(qr)),
            Err(GatewayError::Rejected { status, .. })
                if status == StatusCode::NOT_FOUND.as_u16() =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
