//! Demo settings, read from the environment

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use checkout_core::ScenarioType;
use rust_decimal::Decimal;

/// How the widget runtime shows up in the simulated page
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeMode {
    /// Already registered before checkout starts
    Present,
    /// Registered by the widget script once it loads
    Scripted,
    /// Script loads but never registers a runtime
    Absent,
    /// Script fails to load
    Broken,
}

/// What the stand-in widget reports after the shopper "pays"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WidgetBehaviour {
    Complete,
    Fail,
    Cancel,
    /// First instance reports an already-paid order, later ones complete
    DuplicateOnce,
}

#[derive(Clone, Debug)]
pub struct DemoSettings {
    pub scenario: ScenarioType,
    pub amount: Decimal,
    pub currency: String,
    pub card_number: String,
    pub runtime: RuntimeMode,
    pub behaviour: WidgetBehaviour,
    pub widget_delay: Duration,
}

impl DemoSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let scenario = match var("CHECKOUT_SCENARIO") {
            Some(s) => ScenarioType::from_str(&s).ok_or_else(|| anyhow!("unknown scenario '{}'", s))?,
            None => ScenarioType::Embedded,
        };

        let amount = var("CHECKOUT_AMOUNT").unwrap_or_else(|| "300.00".into());
        let amount = Decimal::from_str(amount.trim()).with_context(|| format!("invalid amount '{}'", amount))?;
        if amount <= Decimal::ZERO {
            return Err(anyhow!("amount must be positive, got {}", amount));
        }

        let runtime = match var("CHECKOUT_DEMO_RUNTIME").as_deref().map(str::trim) {
            None | Some("present") => RuntimeMode::Present,
            Some("scripted") => RuntimeMode::Scripted,
            Some("absent") => RuntimeMode::Absent,
            Some("broken") => RuntimeMode::Broken,
            Some(other) => return Err(anyhow!("unknown runtime mode '{}'", other)),
        };

        let behaviour = match var("CHECKOUT_DEMO_WIDGET_OUTCOME").as_deref().map(str::trim) {
            None | Some("completed") => WidgetBehaviour::Complete,
            Some("failed") => WidgetBehaviour::Fail,
            Some("cancelled") => WidgetBehaviour::Cancel,
            Some("duplicate") => WidgetBehaviour::DuplicateOnce,
            Some(other) => return Err(anyhow!("unknown widget outcome '{}'", other)),
        };

        let widget_delay = match var("CHECKOUT_DEMO_WIDGET_DELAY_MS") {
            Some(ms) => Duration::from_millis(ms.trim().parse().context("CHECKOUT_DEMO_WIDGET_DELAY_MS")?),
            None => Duration::from_millis(800),
        };

        Ok(Self {
            scenario,
            amount,
            currency: var("CHECKOUT_CURRENCY").unwrap_or_else(|| "USD".into()),
            card_number: var("CHECKOUT_CARD_NUMBER").unwrap_or_else(|| "4242 4242 4242 4242".into()),
            runtime,
            behaviour,
            widget_delay,
        })
    }
}
