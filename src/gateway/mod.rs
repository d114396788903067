pub mod client;
pub mod types;

pub use client::GatewayClient;
pub use types::{
    Charge, ChargeRequest, Customer, CustomerRequest, CustomerResolution, PaymentStatus, PixQrCode,
};

use thiserror::Error;

/// Errors surfaced by the billing gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No API key configured; the client refuses to send anything
    #[error("gateway API key is not configured")]
    Configuration,

    /// The gateway answered with a non-success HTTP status
    #[error("gateway rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Transport-level failure, nothing reached the gateway (or no answer came back)
    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    /// The gateway answered 2xx but the body did not parse
    #[error("failed to decode gateway response: {0}")]
    Decode(String),
}
