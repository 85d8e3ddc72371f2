//! Checkout Configuration
//!
//! Every tunable of the widget lifecycle lives here: where the widget script
//! comes from, how long to wait for it, which backend phrases mean "order
//! already paid", and how the fallback simulator behaves.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};

/// Payment backend environment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }

    /// Name of this environment in the widget runtime's own vocabulary
    pub fn runtime_name(&self) -> &'static str {
        match self {
            Environment::Sandbox => "UAT",
            Environment::Production => "HKG_prod",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" | "uat" => Ok(Environment::Sandbox),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(CheckoutError::Config(format!("unknown environment '{}'", other))),
        }
    }
}

/// How long to keep looking for the widget runtime after its script loaded.
///
/// Some runtimes register their global only after the script body finished
/// executing, so detection polls with a growing delay instead of checking once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettlePolicy {
    /// Delay before the first check
    #[serde(default = "default_settle_initial_ms")]
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after each miss
    #[serde(default = "default_settle_backoff")]
    pub backoff_factor: u32,

    /// Number of checks before giving up
    #[serde(default = "default_settle_attempts")]
    pub max_attempts: u32,
}

fn default_settle_initial_ms() -> u64 { 250 }
fn default_settle_backoff() -> u32 { 2 }
fn default_settle_attempts() -> u32 { 3 }

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_settle_initial_ms(),
            backoff_factor: default_settle_backoff(),
            max_attempts: default_settle_attempts(),
        }
    }
}

impl SettlePolicy {
    /// Delays between checks, in order
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let factor = u64::from(self.backoff_factor.max(1));
        (0..self.max_attempts.max(1)).scan(self.initial_delay_ms, move |delay, _| {
            let current = *delay;
            *delay = delay.saturating_mul(factor);
            Some(Duration::from_millis(current))
        })
    }

    /// Worst-case time spent waiting for the runtime
    pub fn total_wait(&self) -> Duration {
        self.delays().sum()
    }
}

/// Fallback simulator behaviour
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Fake processing time before a pay action resolves
    #[serde(default = "default_processing_delay_ms")]
    pub processing_delay_ms: u64,

    /// Probability (0.0 - 1.0) that a pay action completes
    #[serde(default = "default_success_probability")]
    pub success_probability: f64,
}

fn default_processing_delay_ms() -> u64 { 2000 }
fn default_success_probability() -> f64 { 0.8 }

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            processing_delay_ms: default_processing_delay_ms(),
            success_probability: default_success_probability(),
        }
    }
}

impl SimulatorConfig {
    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

/// Top-level checkout configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutConfig {
    #[serde(default)]
    pub environment: Environment,

    /// Location of the widget runtime script
    #[serde(default = "default_script_url")]
    pub script_url: String,

    /// Global names the runtime may register under
    #[serde(default = "default_runtime_aliases")]
    pub runtime_aliases: Vec<String>,

    /// Locale handed to the widget
    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default)]
    pub settle: SettlePolicy,

    /// Backend failure phrases meaning "order already paid / duplicate order".
    ///
    /// Matched case-insensitively as substrings. The backend does not version
    /// these strings, so they are configuration rather than code.
    #[serde(default = "default_duplicate_phrases")]
    pub duplicate_phrases: Vec<String>,

    /// Consecutive automatic duplicate-order retries before giving up
    #[serde(default = "default_max_auto_retries")]
    pub max_auto_retries: u32,

    /// Prefix tag for generated order ids
    #[serde(default = "default_order_prefix")]
    pub order_prefix: String,

    /// Origin used to build return and webhook URLs
    #[serde(default = "default_return_base_url")]
    pub return_base_url: String,

    #[serde(default)]
    pub simulator: SimulatorConfig,
}

fn default_script_url() -> String {
    "https://cdn.jsdelivr.net/npm/cil-dropin-components@latest/dist/index.min.js".into()
}

fn default_runtime_aliases() -> Vec<String> {
    vec!["DropInSDK".into(), "DropinSDK".into()]
}

fn default_locale() -> String { "en-US".into() }

fn default_duplicate_phrases() -> Vec<String> {
    [
        "already paid",
        "duplicate order",
        "duplicated order",
        "order already exists",
        "order has been paid",
        "merchantorderid already",
        "订单已支付",
        "重复订单",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_auto_retries() -> u32 { 1 }
fn default_order_prefix() -> String { "demo".into() }
fn default_return_base_url() -> String { "http://localhost:5173".into() }

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            script_url: default_script_url(),
            runtime_aliases: default_runtime_aliases(),
            locale: default_locale(),
            settle: SettlePolicy::default(),
            duplicate_phrases: default_duplicate_phrases(),
            max_auto_retries: default_max_auto_retries(),
            order_prefix: default_order_prefix(),
            return_base_url: default_return_base_url(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl CheckoutConfig {
    /// Create from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(env) = std::env::var("CHECKOUT_ENVIRONMENT") {
            config.environment = Environment::parse(&env)?;
        }
        if let Ok(url) = std::env::var("CHECKOUT_WIDGET_SCRIPT_URL") {
            config.script_url = url;
        }
        if let Ok(aliases) = std::env::var("CHECKOUT_WIDGET_ALIASES") {
            config.runtime_aliases = split_list(&aliases, ',');
        }
        if let Ok(phrases) = std::env::var("CHECKOUT_DUPLICATE_PHRASES") {
            config.duplicate_phrases = split_list(&phrases, '|');
        }
        if let Ok(base) = std::env::var("CHECKOUT_RETURN_BASE_URL") {
            config.return_base_url = base;
        }

        config.settle.initial_delay_ms =
            parse_var("CHECKOUT_SETTLE_INITIAL_MS", config.settle.initial_delay_ms)?;
        config.settle.max_attempts =
            parse_var("CHECKOUT_SETTLE_ATTEMPTS", config.settle.max_attempts)?;
        config.max_auto_retries =
            parse_var("CHECKOUT_MAX_AUTO_RETRIES", config.max_auto_retries)?;
        config.simulator.processing_delay_ms =
            parse_var("CHECKOUT_SIMULATOR_DELAY_MS", config.simulator.processing_delay_ms)?;
        config.simulator.success_probability =
            parse_var("CHECKOUT_SIMULATOR_SUCCESS_RATE", config.simulator.success_probability)?;

        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.order_prefix.is_empty() || !self.order_prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CheckoutError::Config(format!(
                "order prefix '{}' must be non-empty ASCII alphanumerics",
                self.order_prefix
            )));
        }
        if self.runtime_aliases.is_empty() {
            return Err(CheckoutError::Config("at least one widget runtime alias is required".into()));
        }
        if !(0.0..=1.0).contains(&self.simulator.success_probability) {
            return Err(CheckoutError::Config(format!(
                "simulator success probability {} is outside 0.0..=1.0",
                self.simulator.success_probability
            )));
        }
        Ok(())
    }

    /// Where the shopper lands after leaving the site for a redirect flow
    pub fn return_url(&self, order_id: &str, payment_type: &str) -> String {
        format!(
            "{}/payment-result?orderId={}&paymentType={}",
            self.return_base_url.trim_end_matches('/'),
            order_id,
            payment_type
        )
    }

    pub fn webhook_url(&self) -> String {
        format!("{}/api/v1/payment/webhook", self.return_base_url.trim_end_matches('/'))
    }
}

fn split_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_var<T: std::str::FromStr>(name: &str, fallback: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CheckoutError::Config(format!("{} has an invalid value '{}'", name, raw))),
        Err(_) => Ok(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CheckoutConfig::default();
        assert_eq!(config.environment, Environment::Sandbox);
        assert_eq!(config.max_auto_retries, 1);
        assert!(config.runtime_aliases.contains(&"DropInSDK".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settle_delays_back_off() {
        let policy = SettlePolicy {
            initial_delay_ms: 100,
            backoff_factor: 2,
            max_attempts: 4,
        };
        let delays: Vec<_> = policy.delays().map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
        assert_eq!(policy.total_wait(), Duration::from_millis(1500));
    }

    #[test]
    fn test_environment_vocabulary() {
        assert_eq!(Environment::parse("UAT").unwrap(), Environment::Sandbox);
        assert_eq!(Environment::Production.runtime_name(), "HKG_prod");
        assert!(Environment::parse("staging").is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = CheckoutConfig::from_json(
            r#"{"environment": "production", "duplicate_phrases": ["ordine già pagato"]}"#,
        )
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.duplicate_phrases, vec!["ordine già pagato".to_string()]);
        assert_eq!(config.settle, SettlePolicy::default());
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        let config = CheckoutConfig {
            order_prefix: "demo-".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_return_url() {
        let config = CheckoutConfig {
            return_base_url: "https://shop.example/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.return_url("demo123", "dropin"),
            "https://shop.example/payment-result?orderId=demo123&paymentType=dropin"
        );
        assert_eq!(config.webhook_url(), "https://shop.example/api/v1/payment/webhook");
    }
}
