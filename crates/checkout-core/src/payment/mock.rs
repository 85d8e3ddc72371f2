//! Mock Payment API
//!
//! In-memory stand-in for the payment backend's demonstration mode. Issues
//! session tokens, remembers which orders were paid, and lets tests queue
//! failures or add latency.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{
    CardInstrument, DirectPaymentResponse, InteractionResponse, OrderRequest, PaymentApi,
    PaymentStatus,
};
use crate::error::{CheckoutError, Result};
use crate::session::{OrderId, ScenarioType};

/// Test card that the mock declines
pub const DECLINED_CARD_SUFFIX: &str = "0002";

/// Test card that the mock sends through a 3DS challenge
pub const CHALLENGE_CARD_SUFFIX: &str = "3063";

#[derive(Clone, Debug)]
struct MockOrder {
    status: String,
    amount: Decimal,
    currency: String,
}

#[derive(Default)]
struct MockState {
    orders: HashMap<OrderId, MockOrder>,
    failures: VecDeque<CheckoutError>,
    requests: usize,
}

/// In-memory Payment API
pub struct MockPaymentApi {
    state: Mutex<MockState>,
    latency: Duration,
    hosted_page_base: String,
}

impl Default for MockPaymentApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPaymentApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            latency: Duration::ZERO,
            hosted_page_base: "https://sandbox.checkout.invalid".into(),
        }
    }

    /// Delay every request (for exercising in-flight behaviour)
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new()
        }
    }

    /// Make the next create request fail with a backend rejection
    pub fn fail_next(&self, status: u16, message: impl Into<String>) {
        self.lock().failures.push_back(CheckoutError::Rejected {
            status,
            message: message.into(),
        });
    }

    /// Make the next create request fail as if the backend were unreachable
    pub fn fail_next_unreachable(&self) {
        self.lock()
            .failures
            .push_back(CheckoutError::Network("connection refused".into()));
    }

    /// Number of create requests received, including failed ones
    pub fn request_count(&self) -> usize {
        self.lock().requests
    }

    pub fn knows(&self, order_id: &OrderId) -> bool {
        self.lock().orders.contains_key(order_id)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the request, wait out the latency, then pop a queued failure
    async fn begin_request(&self) -> Result<()> {
        self.lock().requests += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.lock().failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentApi for MockPaymentApi {
    async fn create_interaction(&self, request: &OrderRequest) -> Result<InteractionResponse> {
        self.begin_request().await?;

        self.lock().orders.insert(
            request.order_id.clone(),
            MockOrder {
                status: "pending".into(),
                amount: request.amount,
                currency: request.currency.clone(),
            },
        );

        let token = format!("sess_{}", uuid::Uuid::new_v4().simple());
        let redirect_url = (request.scenario == ScenarioType::Redirect)
            .then(|| format!("{}/linkpay/{}", self.hosted_page_base, token));

        tracing::debug!(order_id = %request.order_id, scenario = %request.scenario, "Mock interaction created");

        Ok(InteractionResponse {
            session_token: Some(token),
            redirect_url,
            message: Some("Success (demo mode)".into()),
        })
    }

    async fn create_direct_payment(
        &self,
        request: &OrderRequest,
        instrument: &CardInstrument,
    ) -> Result<DirectPaymentResponse> {
        self.begin_request().await?;

        if instrument.card_number.ends_with(DECLINED_CARD_SUFFIX) {
            return Err(CheckoutError::Rejected {
                status: 402,
                message: "Card declined by issuer".into(),
            });
        }

        let challenge = instrument.card_number.ends_with(CHALLENGE_CARD_SUFFIX);
        let status = if challenge { "pending" } else { "captured" };

        self.lock().orders.insert(
            request.order_id.clone(),
            MockOrder {
                status: status.into(),
                amount: request.amount,
                currency: request.currency.clone(),
            },
        );

        Ok(DirectPaymentResponse {
            status: status.into(),
            redirect_url: challenge
                .then(|| format!("{}/3ds/{}", self.hosted_page_base, request.order_id)),
            message: Some("Success (demo mode)".into()),
        })
    }

    async fn get_status(&self, order_id: &OrderId, _scenario: ScenarioType) -> Result<PaymentStatus> {
        let state = self.lock();
        Ok(match state.orders.get(order_id) {
            Some(order) => PaymentStatus {
                order_id: order_id.clone(),
                status: order.status.clone(),
                detail: None,
                amount: Some(order.amount),
                currency: Some(order.currency.clone()),
            },
            // Unknown orders are reported, not treated as errors
            None => PaymentStatus {
                order_id: order_id.clone(),
                status: "unknown".into(),
                detail: Some("order not found".into()),
                amount: None,
                currency: None,
            },
        })
    }

    fn name(&self) -> &str {
        "MockPaymentApi"
    }
}
