//! Payment API Integration
//!
//! The backend that turns an order into a payable session. The orchestrator
//! only talks to it through [`PaymentApi`], so the HTTP client, the in-memory
//! demo backend and test stubs are interchangeable.

mod mock;

pub use mock::MockPaymentApi;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::{OrderId, ScenarioType};

/// Order as submitted to the Payment API
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: OrderId,
    pub scenario: ScenarioType,
    pub amount: Decimal,
    pub currency: String,
    pub return_url: String,
    pub webhook_url: String,
}

/// Card details for the direct scenario.
///
/// Demo data only: nothing here is encrypted or tokenised.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInstrument {
    pub card_number: String,
    /// MMYY, digits only
    pub expiry_date: String,
    pub cvv: String,
    pub holder_name: String,
}

impl CardInstrument {
    /// Normalise form input: strips spaces from the number and separators from the expiry
    pub fn new(
        card_number: &str,
        expiry_date: &str,
        cvv: impl Into<String>,
        holder_name: impl Into<String>,
    ) -> Self {
        Self {
            card_number: card_number.chars().filter(|c| !c.is_whitespace()).collect(),
            expiry_date: expiry_date.chars().filter(char::is_ascii_digit).collect(),
            cvv: cvv.into(),
            holder_name: holder_name.into(),
        }
    }

    /// Last four digits, for logs
    pub fn last4(&self) -> &str {
        let len = self.card_number.len();
        self.card_number.get(len.saturating_sub(4)..).unwrap_or_default()
    }
}

impl std::fmt::Debug for CardInstrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardInstrument")
            .field("card_number", &format_args!("****{}", self.last4()))
            .field("holder_name", &self.holder_name)
            .finish_non_exhaustive()
    }
}

/// Result of creating an interaction (redirect and embedded scenarios)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InteractionResponse {
    /// Token the embedded widget is armed with; the hosted page flow may omit it
    pub session_token: Option<String>,

    /// Hosted payment page for the redirect scenario
    pub redirect_url: Option<String>,

    pub message: Option<String>,
}

impl InteractionResponse {
    /// The session token, if present and non-empty
    pub fn usable_token(&self) -> Option<&str> {
        self.session_token.as_deref().filter(|token| !token.is_empty())
    }
}

/// Backend payment status folded into the few states checkout cares about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementState {
    Captured,
    Pending,
    Failed,
    Cancelled,
    /// Anything the backend reports that is not recognised
    Unknown,
}

impl SettlementState {
    /// Normalise a backend status string, ignoring case
    pub fn from_backend(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "success" | "completed" | "paid" | "captured" => Self::Captured,
            "pending" | "processing" | "authorized" => Self::Pending,
            "failed" | "declined" | "rejected" | "error" => Self::Failed,
            "cancelled" | "canceled" | "voided" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }

    /// The charge definitely did not go through
    pub fn is_unsuccessful(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

/// Result of a direct card payment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectPaymentResponse {
    pub status: String,

    /// Set when the issuer requires a 3DS challenge
    pub redirect_url: Option<String>,

    pub message: Option<String>,
}

/// Payment status as reported by the backend
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentStatus {
    pub order_id: OrderId,
    /// Raw status as the backend sent it
    pub status: String,
    pub detail: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
}

impl PaymentStatus {
    pub fn settlement(&self) -> SettlementState {
        SettlementState::from_backend(&self.status)
    }
}

/// Payment API client trait (Strategy pattern)
///
/// Failures are returned as [`crate::CheckoutError`]; their message text is
/// what the duplicate-order classifier and the UI see.
#[async_trait]
pub trait PaymentApi: Send + Sync {
    /// Create a payment interaction (redirect and embedded scenarios)
    async fn create_interaction(&self, request: &OrderRequest) -> Result<InteractionResponse>;

    /// Charge a card directly (direct scenario)
    async fn create_direct_payment(
        &self,
        request: &OrderRequest,
        instrument: &CardInstrument,
    ) -> Result<DirectPaymentResponse>;

    /// Query the status of an order
    async fn get_status(&self, order_id: &OrderId, scenario: ScenarioType) -> Result<PaymentStatus>;

    /// Backend name, for logs
    fn name(&self) -> &str;
}
