//! Error Types

use thiserror::Error;

/// Result type alias for checkout operations
pub type Result<T> = std::result::Result<T, CheckoutError>;

/// Checkout error types
#[derive(Error, Debug)]
pub enum CheckoutError {
    /// Payment API could not be reached
    #[error("Payment API unreachable: {0}")]
    Network(String),

    /// Payment API answered with an error status or a failed result
    #[error("Payment API rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Direct payment submitted without card details
    #[error("Payment instrument required for {0} payments")]
    MissingInstrument(String),

    /// Mount requested for a session the Payment API has not accepted yet
    #[error("Session {0} has no session token")]
    MissingSessionToken(String),

    /// The widget runtime threw while constructing an instance
    #[error("Widget construction failed: {0}")]
    WidgetConstruction(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CheckoutError {

    /// Message shown to the user.
    ///
    /// Payment API rejections are passed through verbatim; the backend's text
    /// is what the shopper needs to see.
    pub fn user_message(&self) -> String {
        match self {
            CheckoutError::Network(_) => "The payment service is unreachable. Please try again.".into(),
            CheckoutError::Rejected { message, .. } => message.clone(),
            CheckoutError::MissingInstrument(_) => "Please enter your card details.".into(),
            CheckoutError::MissingSessionToken(_) => "The payment session is not ready yet.".into(),
            CheckoutError::WidgetConstruction(msg) => {
                format!("Failed to initialize the payment component: {}", msg)
            }
            CheckoutError::Config(_) => "Checkout is not configured correctly.".into(),
            CheckoutError::Json(_) => "The payment service sent an unreadable response.".into(),
        }
    }
}
