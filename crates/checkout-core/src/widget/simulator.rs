//! Fallback Simulator
//!
//! Drop-in substitute for the widget runtime, used in degraded mode. It
//! reports the same three outcomes through the same callbacks, so the
//! orchestrator cannot tell the difference. The success probability only
//! exists to exercise both code paths; it is not a security feature.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use serde_json::json;

use super::{OutcomeKind, WidgetCallbacks, WidgetHandle, WidgetOptions, WidgetRuntime};
use crate::config::SimulatorConfig;

struct Armed {
    generation: u64,
    session_token: String,
    amount: Decimal,
    currency: String,
    callbacks: WidgetCallbacks,
}

#[derive(Default)]
struct Console {
    armed: Option<Armed>,
    generation: u64,
}

/// The simulator's "form": the UI drives it with [`pay`](Self::pay) and
/// [`cancel`](Self::cancel)
pub struct FallbackSimulator {
    config: SimulatorConfig,
    console: Mutex<Console>,
}

impl FallbackSimulator {
    /// Out-of-range probabilities are clamped; NaN becomes 0.0
    pub fn new(mut config: SimulatorConfig) -> Self {
        config.success_probability = if config.success_probability.is_nan() {
            0.0
        } else {
            config.success_probability.clamp(0.0, 1.0)
        };
        Self {
            config,
            console: Mutex::new(Console::default()),
        }
    }

    /// Whether a simulated widget is currently mounted
    pub fn is_armed(&self) -> bool {
        self.lock().armed.is_some()
    }

    /// Submit the simulated form.
    ///
    /// Resolves after the processing delay with the outcome that was emitted,
    /// or `None` if nothing was mounted or the widget was torn down meanwhile.
    pub async fn pay(&self) -> Option<OutcomeKind> {
        let (generation, session_token, amount, currency) = {
            let console = self.lock();
            let armed = console.armed.as_ref()?;
            (
                armed.generation,
                armed.session_token.clone(),
                armed.amount,
                armed.currency.clone(),
            )
        };

        tokio::time::sleep(self.config.processing_delay()).await;

        let callbacks = {
            let console = self.lock();
            match &console.armed {
                Some(armed) if armed.generation == generation => armed.callbacks.clone(),
                _ => {
                    tracing::debug!("Simulated widget torn down during processing");
                    return None;
                }
            }
        };

        let success = rand::thread_rng().gen_bool(self.config.success_probability);
        let now = Utc::now();

        let (kind, payload) = if success {
            (
                OutcomeKind::Completed,
                json!({
                    "type": "payment_completed",
                    "merchantTransID": format!("mock_{}", now.timestamp_millis()),
                    "sessionID": session_token,
                    "amount": amount.to_string(),
                    "currency": currency,
                    "timestamp": now.to_rfc3339(),
                }),
            )
        } else {
            (
                OutcomeKind::Failed,
                json!({
                    "type": "payment_failed",
                    "merchantTransID": format!("mock_{}", now.timestamp_millis()),
                    "sessionID": session_token,
                    "code": "MOCK_DECLINED",
                    "message": "Simulated payment declined (demo)",
                    "timestamp": now.to_rfc3339(),
                }),
            )
        };

        tracing::info!(outcome = ?kind, "Simulated payment processed");
        callbacks.emit(kind, payload);
        Some(kind)
    }

    /// Cancel the simulated form; emits immediately. Returns false if nothing is mounted.
    pub fn cancel(&self) -> bool {
        let (callbacks, session_token) = {
            let console = self.lock();
            match &console.armed {
                Some(armed) => (armed.callbacks.clone(), armed.session_token.clone()),
                None => return false,
            }
        };

        callbacks.emit(
            OutcomeKind::Cancelled,
            json!({ "type": "payment_cancelled", "sessionID": session_token }),
        );
        true
    }

    fn arm(&self, options: WidgetOptions) -> u64 {
        let mut console = self.lock();
        console.generation += 1;
        let generation = console.generation;
        console.armed = Some(Armed {
            generation,
            session_token: options.session_token,
            amount: options.amount,
            currency: options.currency,
            callbacks: options.callbacks,
        });
        generation
    }

    fn disarm(&self, generation: u64) {
        let mut console = self.lock();
        if console.armed.as_ref().map(|armed| armed.generation) == Some(generation) {
            console.armed = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Console> {
        self.console.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`WidgetRuntime`] backed by a [`FallbackSimulator`]
pub struct SimulatedRuntime {
    simulator: Arc<FallbackSimulator>,
}

impl SimulatedRuntime {
    pub fn new(simulator: Arc<FallbackSimulator>) -> Self {
        Self { simulator }
    }
}

impl WidgetRuntime for SimulatedRuntime {
    fn construct(&self, options: WidgetOptions) -> Result<Box<dyn WidgetHandle>, String> {
        tracing::debug!(selector = %options.mount_selector, "Simulated widget armed");
        let generation = self.simulator.arm(options);
        Ok(Box::new(SimulatedHandle {
            simulator: self.simulator.clone(),
            generation,
        }))
    }

    fn name(&self) -> &str {
        "FallbackSimulator"
    }
}

struct SimulatedHandle {
    simulator: Arc<FallbackSimulator>,
    generation: u64,
}

impl WidgetHandle for SimulatedHandle {
    fn destroy(&mut self) {
        self.simulator.disarm(self.generation);
    }
}
