//! HTTP Payment API
//!
//! Implementation of `PaymentApi` against the merchant backend's REST
//! endpoints under `/api/v1`.

use std::time::Duration;

use async_trait::async_trait;
use checkout_core::{
    error::{CheckoutError, Result},
    payment::{
        CardInstrument, DirectPaymentResponse, InteractionResponse, OrderRequest, PaymentApi,
        PaymentStatus,
    },
    session::{OrderId, ScenarioType},
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// HTTP backend configuration
#[derive(Clone, Debug)]
pub struct HttpApiConfig {
    /// Backend origin, without the `/api/v1` suffix
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            timeout_secs: 30,
        }
    }
}

impl HttpApiConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("PAYMENT_API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into());
        let timeout_secs = std::env::var("PAYMENT_API_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(30);

        Self {
            base_url,
            timeout_secs,
        }
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOrderRequest<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: &'a str,
    merchant_trans_id: &'a str,
    payment_type: &'a str,
    return_url: &'a str,
    webhook_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    card_info: Option<&'a CardInstrument>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WirePaymentResponse {
    success: bool,
    session_id: Option<String>,
    link_url: Option<String>,
    merchant_trans_id: Option<String>,
    status: Option<String>,
    message: Option<String>,
    action: Option<WireAction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireAction {
    #[serde(rename = "type")]
    kind: Option<String>,
    data: serde_json::Value,
}

/// `{ success, data, message }` envelope of the status endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireEnvelope {
    success: bool,
    data: Option<serde_json::Value>,
    message: Option<String>,
    error: Option<String>,
}

/// HTTP Payment API client
pub struct HttpPaymentApi {
    client: reqwest::Client,
    config: HttpApiConfig,
}

impl HttpPaymentApi {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::from_config(HttpApiConfig {
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    /// Create from configuration
    pub fn from_config(config: HttpApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CheckoutError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(HttpApiConfig::from_env())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn wire_request<'a>(request: &'a OrderRequest, card: Option<&'a CardInstrument>) -> WireOrderRequest<'a> {
        WireOrderRequest {
            amount: request.amount,
            currency: &request.currency,
            merchant_trans_id: request.order_id.as_str(),
            payment_type: request.scenario.as_str(),
            return_url: &request.return_url,
            webhook_url: &request.webhook_url,
            card_info: card,
        }
    }

    async fn post(&self, path: &str, body: &WireOrderRequest<'_>) -> Result<WirePaymentResponse> {
        let url = self.endpoint(path);
        tracing::debug!(url = %url, order_id = body.merchant_trans_id, "POST");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &text));
        }

        let parsed: WirePaymentResponse = serde_json::from_str(&text)?;
        if !parsed.success {
            return Err(CheckoutError::Rejected {
                status: status.as_u16(),
                message: parsed
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Payment request was not accepted".into()),
            });
        }
        Ok(parsed)
    }

    fn convert_interaction(response: WirePaymentResponse) -> Result<InteractionResponse> {
        let link_url = response.link_url.filter(|u| !u.is_empty());
        let session_token = response.session_id.filter(|s| !s.is_empty());
        if session_token.is_none() && link_url.is_none() {
            return Err(CheckoutError::Rejected {
                status: 502,
                message: "Payment API returned neither a session id nor a payment link".into(),
            });
        }

        Ok(InteractionResponse {
            session_token,
            redirect_url: link_url,
            message: response.message,
        })
    }

    fn convert_direct(response: WirePaymentResponse) -> DirectPaymentResponse {
        let redirect_url = response.action.as_ref().and_then(|action| {
            ["threeDSData", "redirectData"].iter().find_map(|key| {
                action
                    .data
                    .get(key)
                    .and_then(|d| d.get("url"))
                    .and_then(serde_json::Value::as_str)
                    .map(String::from)
            })
        });

        if let Some(action) = &response.action {
            tracing::debug!(action = ?action.kind, has_redirect = redirect_url.is_some(), "Direct payment requires action");
        }

        DirectPaymentResponse {
            status: response.status.unwrap_or_else(|| "unknown".into()),
            redirect_url,
            message: response.message,
        }
    }

    fn convert_status(order_id: &OrderId, envelope: WireEnvelope) -> Result<PaymentStatus> {
        if !envelope.success {
            let message = envelope
                .message
                .or(envelope.error)
                .unwrap_or_else(|| "Status query failed".into());
            return Err(CheckoutError::Rejected { status: 200, message });
        }

        let data = envelope.data.unwrap_or_default();
        let field = |name: &str| data.get(name).and_then(serde_json::Value::as_str).map(String::from);

        Ok(PaymentStatus {
            order_id: order_id.clone(),
            status: field("status").unwrap_or_else(|| "unknown".into()),
            detail: envelope.message,
            amount: data
                .get("amount")
                .and_then(serde_json::Value::as_f64)
                .and_then(Decimal::from_f64),
            currency: field("currency"),
        })
    }
}

#[async_trait]
impl PaymentApi for HttpPaymentApi {
    async fn create_interaction(&self, request: &OrderRequest) -> Result<InteractionResponse> {
        let body = Self::wire_request(request, None);
        let response = self.post("/payment/interaction", &body).await?;
        tracing::info!(
            order_id = %request.order_id,
            merchant_trans_id = ?response.merchant_trans_id,
            "Interaction created"
        );
        Self::convert_interaction(response)
    }

    async fn create_direct_payment(
        &self,
        request: &OrderRequest,
        instrument: &CardInstrument,
    ) -> Result<DirectPaymentResponse> {
        let body = Self::wire_request(request, Some(instrument));
        let response = self.post("/payment/direct", &body).await?;
        Ok(Self::convert_direct(response))
    }

    async fn get_status(&self, order_id: &OrderId, scenario: ScenarioType) -> Result<PaymentStatus> {
        let path = match scenario {
            ScenarioType::Direct => format!("/payment/{}", order_id),
            ScenarioType::Redirect | ScenarioType::Embedded => format!("/interaction/{}", order_id),
        };

        let response = self
            .client
            .get(self.endpoint(&path))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &text));
        }

        Self::convert_status(order_id, serde_json::from_str(&text)?)
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn transport_error(err: reqwest::Error) -> CheckoutError {
    if err.is_timeout() {
        CheckoutError::Network(format!("request timed out: {}", err))
    } else {
        CheckoutError::Network(err.to_string())
    }
}

/// Map a non-2xx response, preferring the body's own `message`
fn rejection(status: u16, body: &str) -> CheckoutError {
    let envelope: WireEnvelope = serde_json::from_str(body).unwrap_or_default();
    let message = envelope
        .message
        .or(envelope.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {}", status)
            } else {
                trimmed.to_string()
            }
        });

    CheckoutError::Rejected { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn order(scenario: ScenarioType) -> OrderRequest {
        OrderRequest {
            order_id: OrderId::from_string("demo20260101120000000aabcdef"),
            scenario,
            amount: dec!(300.00),
            currency: "USD".into(),
            return_url: "http://localhost:5173/payment-result?orderId=x&paymentType=dropin".into(),
            webhook_url: "http://localhost:5173/api/v1/payment/webhook".into(),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = HttpApiConfig::default();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_endpoint_joins_base() {
        let api = HttpPaymentApi::new("http://backend:8080/").unwrap();
        assert_eq!(api.endpoint("/payment/direct"), "http://backend:8080/api/v1/payment/direct");
    }

    #[test]
    fn test_wire_request_shape() {
        let request = order(ScenarioType::Embedded);
        let value = serde_json::to_value(HttpPaymentApi::wire_request(&request, None)).unwrap();

        assert_eq!(value["merchantTransId"], "demo20260101120000000aabcdef");
        assert_eq!(value["paymentType"], "dropin");
        assert_eq!(value["amount"], json!(300.0));
        assert!(value.get("cardInfo").is_none());

        let card = CardInstrument::new("4761 3600 7211 8507", "05/29", "123", "John Doe");
        let request = order(ScenarioType::Direct);
        let value = serde_json::to_value(HttpPaymentApi::wire_request(&request, Some(&card))).unwrap();
        assert_eq!(value["cardInfo"]["cardNumber"], "4761360072118507");
        assert_eq!(value["cardInfo"]["expiryDate"], "0529");
    }

    #[test]
    fn test_rejection_prefers_body_message() {
        let err = rejection(500, r#"{"success":false,"message":"Order already paid","error":"C0021"}"#);
        assert!(matches!(
            err,
            CheckoutError::Rejected { status: 500, ref message } if message == "Order already paid"
        ));
        assert_eq!(err.user_message(), "Order already paid");

        let err = rejection(502, "Bad Gateway");
        assert_eq!(err.user_message(), "Bad Gateway");

        let err = rejection(503, "");
        assert_eq!(err.user_message(), "HTTP 503");
    }

    #[test]
    fn test_interaction_conversion() {
        let response: WirePaymentResponse = serde_json::from_value(json!({
            "success": true,
            "sessionId": "sess_123",
            "merchantTransId": "demo1",
            "status": "pending",
            "message": "Success"
        }))
        .unwrap();
        let converted = HttpPaymentApi::convert_interaction(response).unwrap();
        assert_eq!(converted.session_token.as_deref(), Some("sess_123"));
        assert!(converted.redirect_url.is_none());

        let response: WirePaymentResponse = serde_json::from_value(json!({
            "success": true,
            "linkUrl": "https://hosted.example/pay/abc",
            "merchantTransId": "demo2",
            "status": "pending"
        }))
        .unwrap();
        let converted = HttpPaymentApi::convert_interaction(response).unwrap();
        assert_eq!(converted.redirect_url.as_deref(), Some("https://hosted.example/pay/abc"));
        assert!(converted.session_token.is_none());

        let response: WirePaymentResponse = serde_json::from_value(json!({
            "success": true,
            "sessionId": "",
            "linkUrl": "https://hosted.example/pay/def"
        }))
        .unwrap();
        let converted = HttpPaymentApi::convert_interaction(response).unwrap();
        assert!(converted.session_token.is_none());
        assert!(converted.usable_token().is_none());

        let empty = WirePaymentResponse {
            success: true,
            ..Default::default()
        };
        assert!(HttpPaymentApi::convert_interaction(empty).is_err());
    }

    #[test]
    fn test_direct_conversion_extracts_challenge_url() {
        let response: WirePaymentResponse = serde_json::from_value(json!({
            "success": true,
            "merchantTransId": "demo3",
            "status": "pending",
            "action": {
                "type": "threeDSChallenge",
                "data": { "threeDSData": { "url": "https://acs.example/challenge" } }
            }
        }))
        .unwrap();

        let converted = HttpPaymentApi::convert_direct(response);
        assert_eq!(converted.status, "pending");
        assert_eq!(converted.redirect_url.as_deref(), Some("https://acs.example/challenge"));
    }

    #[test]
    fn test_status_conversion() {
        let order_id = OrderId::from_string("demo4");
        let envelope: WireEnvelope = serde_json::from_value(json!({
            "success": true,
            "data": { "merchantTransId": "demo4", "status": "captured", "amount": 49.9, "currency": "HKD" }
        }))
        .unwrap();

        let status = HttpPaymentApi::convert_status(&order_id, envelope).unwrap();
        assert_eq!(status.status, "captured");
        assert_eq!(status.settlement(), checkout_core::SettlementState::Captured);
        assert_eq!(status.amount, Some(dec!(49.9)));
        assert_eq!(status.currency.as_deref(), Some("HKD"));

        let failed: WireEnvelope = serde_json::from_value(json!({
            "success": false,
            "message": "Failed to get payment status"
        }))
        .unwrap();
        assert!(HttpPaymentApi::convert_status(&order_id, failed).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let api = HttpPaymentApi::from_config(HttpApiConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
        })
        .unwrap();

        let err = api
            .create_interaction(&order(ScenarioType::Embedded))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Network(_)));
    }
}
