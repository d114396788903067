use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Internal payment status vocabulary.
///
/// Gateway statuses collapse into this set; anything unrecognized maps to
/// `Unknown` instead of failing reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
    Refunded,
    RefundRequested,
    RefundInProgress,
    Chargeback,
    Dunning,
    Unknown,
}

impl PaymentStatus {
    /// Maps a gateway charge status onto the internal vocabulary.
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "PENDING" | "AWAITING_RISK_ANALYSIS" => Self::Pending,
            "RECEIVED" | "CONFIRMED" | "RECEIVED_IN_CASH" | "DUNNING_RECEIVED" => Self::Paid,
            "OVERDUE" => Self::Overdue,
            "REFUNDED" => Self::Refunded,
            "REFUND_REQUESTED" => Self::RefundRequested,
            "REFUND_IN_PROGRESS" => Self::RefundInProgress,
            "CHARGEBACK_REQUESTED" | "CHARGEBACK_DISPUTE" | "AWAITING_CHARGEBACK_REVERSAL" => {
                Self::Chargeback
            }
            "DUNNING_REQUESTED" => Self::Dunning,
            _ => Self::Unknown,
        }
    }

    pub fn from_str_internal(status: &str) -> Self {
        match status {
            "pending" => Self::Pending,
            "paid" => Self::Paid,
            "overdue" => Self::Overdue,
            "refunded" => Self::Refunded,
            "refund_requested" => Self::RefundRequested,
            "refund_in_progress" => Self::RefundInProgress,
            "chargeback" => Self::Chargeback,
            "dunning" => Self::Dunning,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Refunded => "refunded",
            Self::RefundRequested => "refund_requested",
            Self::RefundInProgress => "refund_in_progress",
            Self::Chargeback => "chargeback",
            Self::Dunning => "dunning",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Paid)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the gateway customer behind a charge was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CustomerResolution {
    /// Customer id came from the local cache, no gateway call happened
    Cached,
    /// The gateway accepted a fresh customer registration
    Created,
    /// Creation failed and an existing customer was found by email
    Recovered,
}

/// Payload for registering a customer with the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRequest {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpf_cnpj: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Paginated list envelope the gateway uses for searches.
#[derive(Debug, Deserialize)]
pub struct CustomerList {
    pub data: Vec<Customer>,
}

/// Payload for creating a charge.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub customer: String,
    pub billing_type: String,
    pub value: Decimal,
    /// YYYY-MM-DD
    pub due_date: String,
    pub description: String,
    pub external_reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Charge {
    pub id: String,
    pub status: String,
    pub value: Decimal,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub invoice_url: Option<String>,
    #[serde(default)]
    pub bank_slip_url: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
}

impl Charge {
    pub fn mapped_status(&self) -> PaymentStatus {
        PaymentStatus::from_gateway(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PixQrCode {
    pub encoded_image: String,
    pub payload: String,
}
