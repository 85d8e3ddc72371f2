//! # checkout-runtime
//!
//! Payment API integrations for the checkout widget lifecycle.
//!
//! ## Backends
//!
//! - **HTTP** (default): the merchant backend's REST API via `reqwest`
//! - **Mock**: in-memory demo backend, re-exported from `checkout-core`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use checkout_runtime::HttpPaymentApi;
//!
//! let api = HttpPaymentApi::new("http://localhost:8080")?;
//! let orchestrator = SessionOrchestrator::new(config, Arc::new(api), host)?;
//! ```

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpApiConfig, HttpPaymentApi};

// Re-export core types for convenience
pub use checkout_core::{
    CheckoutConfig, CheckoutError, MockPaymentApi, PaymentApi, Result, SessionOrchestrator,
};
