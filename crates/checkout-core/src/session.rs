//! Payment Sessions
//!
//! A session is one attempt to pay. Retries never mutate a session in place:
//! the orchestrator builds a new one with a fresh order id, so anything holding
//! the old value keeps seeing the old id.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Merchant order identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Integration style selected by the shopper
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenarioType {
    /// Hosted payment page, shopper is redirected away
    #[serde(rename = "linkpay")]
    Redirect,
    /// Third-party widget embedded in the checkout page
    #[serde(rename = "dropin")]
    Embedded,
    /// Card data posted straight to the Payment API
    #[serde(rename = "directapi")]
    Direct,
}

impl ScenarioType {
    /// Wire name understood by the Payment API
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioType::Redirect => "linkpay",
            ScenarioType::Embedded => "dropin",
            ScenarioType::Direct => "directapi",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "linkpay" | "redirect" => Some(ScenarioType::Redirect),
            "dropin" | "embedded" => Some(ScenarioType::Embedded),
            "directapi" | "direct" => Some(ScenarioType::Direct),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session status, drives the UI
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Unarmed,
    AwaitingSession,
    Armed,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl SessionStatus {
    /// Terminal states are reported upward and end the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// A request to the Payment API is outstanding
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionStatus::AwaitingSession | SessionStatus::Retrying)
    }
}

/// One attempt to pay
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub order_id: OrderId,

    /// Set once the Payment API accepted the order
    pub session_token: Option<String>,

    pub scenario: ScenarioType,

    pub status: SessionStatus,

    pub amount: Decimal,

    pub currency: String,

    /// 1 for the shopper's submission, +1 for every automatic retry
    pub attempt: u32,

    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(order_id: OrderId, scenario: ScenarioType, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            order_id,
            session_token: None,
            scenario,
            status: SessionStatus::Unarmed,
            amount,
            currency: currency.into(),
            attempt: 1,
            created_at: Utc::now(),
        }
    }

    /// Successor session for a retry: same order details, new id, no token
    pub fn successor(&self, order_id: OrderId) -> Self {
        Self {
            order_id,
            session_token: None,
            scenario: self.scenario,
            status: SessionStatus::Retrying,
            amount: self.amount,
            currency: self.currency.clone(),
            attempt: self.attempt + 1,
            created_at: Utc::now(),
        }
    }

    /// Has a non-empty token from the Payment API
    pub fn is_armable(&self) -> bool {
        self.session_token.as_deref().is_some_and(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_session_creation() {
        let session = Session::new(OrderId::from_string("demo1"), ScenarioType::Embedded, dec!(300.00), "USD");
        assert_eq!(session.status, SessionStatus::Unarmed);
        assert_eq!(session.attempt, 1);
        assert!(!session.is_armable());
    }

    #[test]
    fn test_empty_token_is_not_armable() {
        let mut session = Session::new(OrderId::from_string("demo1"), ScenarioType::Embedded, dec!(300.00), "USD");
        session.session_token = Some(String::new());
        assert!(!session.is_armable());
        session.session_token = Some("sess_1".into());
        assert!(session.is_armable());
    }

    #[test]
    fn test_successor_keeps_order_details() {
        let mut first = Session::new(OrderId::from_string("demo1"), ScenarioType::Embedded, dec!(300.00), "USD");
        first.session_token = Some("sess_1".into());

        let second = first.successor(OrderId::from_string("demo2"));
        assert_eq!(second.order_id.as_str(), "demo2");
        assert_eq!(second.attempt, 2);
        assert_eq!(second.amount, first.amount);
        assert!(second.session_token.is_none());
        assert_eq!(first.order_id.as_str(), "demo1");
    }

    #[test]
    fn test_scenario_wire_names() {
        assert_eq!(ScenarioType::from_str("dropin"), Some(ScenarioType::Embedded));
        assert_eq!(ScenarioType::from_str("Direct"), Some(ScenarioType::Direct));
        assert_eq!(ScenarioType::from_str("paypal"), None);
        assert_eq!(
            serde_json::to_string(&ScenarioType::Redirect).unwrap(),
            "\"linkpay\""
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Retrying.is_terminal());
        assert!(SessionStatus::AwaitingSession.is_in_flight());
    }
}
