//! Session Orchestrator
//!
//! Drives one checkout view: submits orders to the Payment API, arms the
//! widget, interprets its outcomes and recovers from duplicate-order failures.
//!
//! ```text
//! unarmed ──submit──▶ awaiting_session ──redirect ok──▶ completed (leave site)
//!                          │ │ └──direct ok──▶ completed (maybe 3DS redirect)
//!                          │ └──API error──▶ unarmed + message
//!                          ▼ embedded ok
//!                        armed ──completed──▶ completed
//!                          │  ──cancelled──▶ cancelled
//!                          │  ──failed──────▶ failed
//!                          └──failed, duplicate order──▶ retrying ──new order ok──▶ armed
//! ```
//!
//! Nothing here returns an error to the UI. The UI observes [`CheckoutView`],
//! which carries the status, the current notice and the last outcome.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::classify::{DuplicateOrderClassifier, FailureClass};
use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result};
use crate::order_id::OrderIdGenerator;
use crate::payment::{CardInstrument, OrderRequest, PaymentApi, PaymentStatus, SettlementState};
use crate::session::{OrderId, ScenarioType, Session, SessionStatus};
use crate::widget::controller::MountPoint;
use crate::widget::{
    FallbackSimulator, InstanceController, MountReport, OutcomeKind, RuntimeAvailability,
    RuntimeResolver, ScriptHost, SimulatedRuntime, WidgetLoader, WidgetRuntime, WidgetSignal,
};

/// Browser capabilities the orchestrator needs
#[derive(Clone)]
pub struct HostCapabilities {
    pub scripts: Arc<dyn ScriptHost>,
    pub resolver: Arc<dyn RuntimeResolver>,
    pub mount_point: Arc<dyn MountPoint>,
}

/// What the shopper submitted
#[derive(Clone, Debug)]
pub struct CheckoutRequest {
    pub scenario: ScenarioType,
    pub amount: Decimal,
    pub currency: String,
    /// Required for the direct scenario, ignored otherwise
    pub instrument: Option<CardInstrument>,
}

impl CheckoutRequest {
    pub fn embedded(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            scenario: ScenarioType::Embedded,
            amount,
            currency: currency.into(),
            instrument: None,
        }
    }

    pub fn redirect(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            scenario: ScenarioType::Redirect,
            ..Self::embedded(amount, currency)
        }
    }

    pub fn direct(amount: Decimal, currency: impl Into<String>, instrument: CardInstrument) -> Self {
        Self {
            scenario: ScenarioType::Direct,
            instrument: Some(instrument),
            ..Self::embedded(amount, currency)
        }
    }
}

/// Result of [`SessionOrchestrator::submit`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    /// A submission was already in flight
    Ignored,
    /// The view was torn down before the Payment API answered
    Abandoned,
    /// Widget mounted and waiting for the shopper
    Armed { order_id: OrderId },
    /// Navigate the browser to `url`; this component is done
    Redirect { order_id: OrderId, url: String },
    /// Paid without further interaction
    Completed { order_id: OrderId },
    /// Payment API refused or could not be reached; `message` is shown as is
    Rejected { message: String },
}

/// Result of [`SessionOrchestrator::on_widget_outcome`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutcomeDisposition {
    /// From a superseded or destroyed widget; dropped
    Stale,
    Completed,
    Cancelled,
    Failed { message: String },
    /// Duplicate order recovered; widget re-armed for `order_id`
    Retried { order_id: OrderId },
    /// Duplicate order recovery itself failed
    RetryFailed { message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Message for the shopper
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Terminal outcome, as plain data for the page to route on
#[derive(Clone, Debug, Serialize)]
pub struct CheckoutOutcome {
    /// Always the orchestrator's order id, never one from the widget payload
    pub order_id: OrderId,
    pub scenario: ScenarioType,
    pub kind: OutcomeKind,
    pub payload: serde_json::Value,
}

/// Everything the UI shell renders
#[derive(Clone, Debug, Default, Serialize)]
pub struct CheckoutView {
    pub status: SessionStatus,
    pub session: Option<Session>,
    pub notice: Option<Notice>,
    pub outcome: Option<CheckoutOutcome>,
    /// Using the fallback simulator instead of the real widget
    pub degraded: bool,
}

/// Why [`SessionOrchestrator::arm`] did not mount a widget
#[derive(Debug)]
enum ArmError {
    /// The session was torn down or replaced while the runtime loaded
    Closed,
    Failed(String),
}

#[derive(Default)]
struct OrchestratorState {
    status: SessionStatus,
    session: Option<Session>,
    notice: Option<Notice>,
    outcome: Option<CheckoutOutcome>,
    degraded: bool,
    auto_retries: u32,
}

impl OrchestratorState {
    fn is_current(&self, order_id: &OrderId) -> bool {
        self.session.as_ref().map(|s| &s.order_id) == Some(order_id)
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        if let Some(session) = self.session.as_mut() {
            session.status = status;
        }
    }
}

/// The checkout state machine
pub struct SessionOrchestrator {
    api: Arc<dyn PaymentApi>,
    loader: WidgetLoader,
    controller: InstanceController,
    simulator: Arc<FallbackSimulator>,
    simulated_runtime: Arc<dyn WidgetRuntime>,
    ids: OrderIdGenerator,
    classifier: DuplicateOrderClassifier,
    config: CheckoutConfig,
    state: Mutex<OrchestratorState>,
    signals: tokio::sync::Mutex<mpsc::UnboundedReceiver<WidgetSignal>>,
    view: watch::Sender<CheckoutView>,
}

impl SessionOrchestrator {
    pub fn new(config: CheckoutConfig, api: Arc<dyn PaymentApi>, host: HostCapabilities) -> Result<Self> {
        config.validate()?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let simulator = Arc::new(FallbackSimulator::new(config.simulator.clone()));

        Ok(Self {
            loader: WidgetLoader::new(host.scripts, host.resolver, &config),
            controller: InstanceController::new(
                host.mount_point,
                config.environment,
                config.locale.clone(),
                signal_tx,
            ),
            simulated_runtime: Arc::new(SimulatedRuntime::new(simulator.clone())),
            simulator,
            ids: OrderIdGenerator::new(config.order_prefix.clone())?,
            classifier: DuplicateOrderClassifier::new(&config.duplicate_phrases),
            api,
            config,
            state: Mutex::new(OrchestratorState::default()),
            signals: tokio::sync::Mutex::new(signal_rx),
            view: watch::channel(CheckoutView::default()).0,
        })
    }

    /// Current view state
    pub fn view(&self) -> CheckoutView {
        self.view.borrow().clone()
    }

    /// Watch view changes
    pub fn subscribe(&self) -> watch::Receiver<CheckoutView> {
        self.view.subscribe()
    }

    /// Fallback simulator console, for the UI to drive in degraded mode
    pub fn simulator(&self) -> &Arc<FallbackSimulator> {
        &self.simulator
    }

    pub fn controller(&self) -> &InstanceController {
        &self.controller
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Start a new payment attempt.
    ///
    /// Ignored while another submission or retry is in flight.
    pub async fn submit(&self, request: CheckoutRequest) -> Submission {
        let session = {
            let mut state = self.lock();
            if state.status.is_in_flight() {
                tracing::debug!(status = ?state.status, "Submission already in flight, ignoring");
                return Submission::Ignored;
            }

            if request.scenario == ScenarioType::Direct && request.instrument.is_none() {
                let err = CheckoutError::MissingInstrument(request.scenario.to_string());
                state.notice = Some(Notice::error(err.user_message()));
                drop(state);
                self.publish();
                return Submission::Rejected {
                    message: err.user_message(),
                };
            }

            let mut session = Session::new(self.ids.next(), request.scenario, request.amount, request.currency.clone());
            session.status = SessionStatus::AwaitingSession;

            state.session = Some(session.clone());
            state.status = SessionStatus::AwaitingSession;
            state.notice = None;
            state.outcome = None;
            state.auto_retries = 0;
            session
        };

        // A resubmission replaces whatever widget the previous attempt left
        self.controller.destroy();
        self.publish();

        tracing::info!(
            order_id = %session.order_id,
            scenario = %session.scenario,
            amount = %session.amount,
            currency = %session.currency,
            api = self.api.name(),
            "Submitting order"
        );

        let order = self.order_request(&session);
        match (request.scenario, request.instrument) {
            (ScenarioType::Direct, Some(instrument)) => self.submit_direct(session, &order, &instrument).await,
            _ => self.submit_interaction(session, &order).await,
        }
    }

    async fn submit_interaction(&self, mut session: Session, order: &OrderRequest) -> Submission {
        let response = match self.api.create_interaction(order).await {
            Ok(response) => response,
            Err(err) => return self.reject(&session.order_id, &err),
        };

        if !self.lock().is_current(&session.order_id) {
            tracing::debug!(order_id = %session.order_id, "View torn down during submission");
            return Submission::Abandoned;
        }

        session.session_token = response.usable_token().map(String::from);

        match session.scenario {
            ScenarioType::Redirect => match response.redirect_url {
                Some(url) => {
                    self.complete_with_redirect(session.clone(), &url, serde_json::json!({ "linkUrl": url }));
                    Submission::Redirect {
                        order_id: session.order_id,
                        url,
                    }
                }
                None => self.reject(
                    &session.order_id,
                    &CheckoutError::Rejected {
                        status: 502,
                        message: "Payment API returned no payment link".into(),
                    },
                ),
            },
            _ if !session.is_armable() => self.reject(
                &session.order_id,
                &CheckoutError::Rejected {
                    status: 502,
                    message: "Payment API returned no session token".into(),
                },
            ),
            _ => match self.arm(session).await {
                Ok(order_id) => Submission::Armed { order_id },
                Err(ArmError::Closed) => Submission::Abandoned,
                Err(ArmError::Failed(message)) => Submission::Rejected { message },
            },
        }
    }

    async fn submit_direct(&self, session: Session, order: &OrderRequest, instrument: &CardInstrument) -> Submission {
        tracing::debug!(order_id = %session.order_id, card = ?instrument, "Direct payment");

        let response = match self.api.create_direct_payment(order, instrument).await {
            Ok(response) => response,
            Err(err) => return self.reject(&session.order_id, &err),
        };

        if !self.lock().is_current(&session.order_id) {
            return Submission::Abandoned;
        }

        let settlement = SettlementState::from_backend(&response.status);
        if settlement.is_unsuccessful() {
            let message = response
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("Payment {}", response.status.to_lowercase()));
            return self.reject(&session.order_id, &CheckoutError::Rejected { status: 402, message });
        }

        let payload = serde_json::json!({ "status": response.status, "message": response.message });
        match response.redirect_url {
            Some(url) => {
                self.complete_with_redirect(session.clone(), &url, payload);
                Submission::Redirect {
                    order_id: session.order_id,
                    url,
                }
            }
            None => {
                let order_id = session.order_id.clone();
                self.finish(&order_id, SessionStatus::Completed, None, Some(payload));
                tracing::info!(order_id = %order_id, "Direct payment completed");
                Submission::Completed { order_id }
            }
        }
    }

    fn complete_with_redirect(&self, session: Session, url: &str, payload: serde_json::Value) {
        tracing::info!(order_id = %session.order_id, url, "Handing off to redirect");
        let order_id = session.order_id.clone();
        self.lock().session = Some(session);
        self.finish(&order_id, SessionStatus::Completed, None, Some(payload));
    }

    fn reject(&self, order_id: &OrderId, err: &CheckoutError) -> Submission {
        let message = err.user_message();
        tracing::warn!(order_id = %order_id, error = %err, "Payment API request failed");
        {
            let mut state = self.lock();
            if state.is_current(order_id) {
                state.session = None;
                state.status = SessionStatus::Unarmed;
                state.notice = Some(Notice::error(message.clone()));
            }
        }
        self.publish();
        Submission::Rejected { message }
    }

    /// Load the runtime (or fall back) and mount the widget for `session`
    async fn arm(&self, mut session: Session) -> std::result::Result<OrderId, ArmError> {
        let availability = self.loader.ensure_runtime_available().await;
        let (runtime, degraded) = match availability {
            RuntimeAvailability::Ready(runtime) => (runtime, false),
            RuntimeAvailability::Degraded { reason } => {
                tracing::info!(reason = %reason, "Arming fallback simulator");
                (self.simulated_runtime.clone(), true)
            }
        };

        if !self.lock().is_current(&session.order_id) {
            tracing::debug!(order_id = %session.order_id, "View torn down while loading the widget runtime");
            return Err(ArmError::Closed);
        }

        match self.controller.mount(&session, &runtime) {
            Ok(MountReport::Mounted(_)) => {
                session.status = SessionStatus::Armed;
                let order_id = session.order_id.clone();
                {
                    let mut state = self.lock();
                    state.session = Some(session);
                    state.status = SessionStatus::Armed;
                    state.degraded = degraded;
                }
                self.publish();
                Ok(order_id)
            }
            Ok(MountReport::Ignored) => {
                let message = "Payment component is already initializing".to_string();
                self.finish(&session.order_id, SessionStatus::Failed, Some(Notice::error(message.clone())), None);
                Err(ArmError::Failed(message))
            }
            Err(err) => {
                let message = err.user_message();
                self.finish(&session.order_id, SessionStatus::Failed, Some(Notice::error(message.clone())), None);
                Err(ArmError::Failed(message))
            }
        }
    }

    // ========================================================================
    // Widget outcomes
    // ========================================================================

    /// Wait for the next widget signal and handle it.
    ///
    /// Returns `None` once every signal sender is gone.
    pub async fn pump(&self) -> Option<OutcomeDisposition> {
        let signal = self.next_signal().await?;
        Some(self.on_widget_outcome(signal).await)
    }

    /// Wait for the next widget signal without handling it
    pub async fn next_signal(&self) -> Option<WidgetSignal> {
        self.signals.lock().await.recv().await
    }

    /// Handle every signal already queued, without waiting for more
    pub async fn drain(&self) -> Vec<OutcomeDisposition> {
        let pending: Vec<WidgetSignal> = {
            let mut rx = self.signals.lock().await;
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };

        let mut dispositions = Vec::with_capacity(pending.len());
        for signal in pending {
            dispositions.push(self.on_widget_outcome(signal).await);
        }
        dispositions
    }

    /// Interpret one widget callback
    pub async fn on_widget_outcome(&self, signal: WidgetSignal) -> OutcomeDisposition {
        if !self.controller.accepts(&signal) {
            tracing::debug!(mount_id = %signal.mount_id, kind = ?signal.kind, "Dropping stale widget signal");
            return OutcomeDisposition::Stale;
        }

        let (session, auto_retries) = {
            let state = self.lock();
            match (&state.session, state.status) {
                (Some(session), SessionStatus::Armed) => (session.clone(), state.auto_retries),
                _ => {
                    tracing::debug!(status = ?state.status, "Widget signal without an armed session");
                    return OutcomeDisposition::Stale;
                }
            }
        };

        match signal.kind {
            OutcomeKind::Completed => {
                self.controller.destroy();
                tracing::info!(order_id = %session.order_id, "Payment completed");
                self.finish(&session.order_id, SessionStatus::Completed, None, Some(signal.payload));
                OutcomeDisposition::Completed
            }
            OutcomeKind::Cancelled => {
                self.controller.destroy();
                tracing::info!(order_id = %session.order_id, "Payment cancelled");
                self.finish(
                    &session.order_id,
                    SessionStatus::Cancelled,
                    Some(Notice::info("Payment cancelled")),
                    Some(signal.payload),
                );
                OutcomeDisposition::Cancelled
            }
            OutcomeKind::Failed => {
                let message = signal.message();
                match self.classifier.classify(&message) {
                    FailureClass::DuplicateOrder { matched } if auto_retries < self.config.max_auto_retries => {
                        tracing::info!(
                            order_id = %session.order_id,
                            matched = %matched,
                            "Duplicate order reported, issuing a new attempt"
                        );
                        self.retry(session).await
                    }
                    FailureClass::DuplicateOrder { .. } => {
                        self.controller.destroy();
                        tracing::warn!(
                            order_id = %session.order_id,
                            retries = auto_retries,
                            "Duplicate order persists after automatic retry"
                        );
                        let message = format!(
                            "Payment failed: {}. Automatic retry did not help, please restart the checkout.",
                            message
                        );
                        self.finish(
                            &session.order_id,
                            SessionStatus::Failed,
                            Some(Notice::error(message.clone())),
                            Some(signal.payload),
                        );
                        OutcomeDisposition::Failed { message }
                    }
                    FailureClass::Other => {
                        self.controller.destroy();
                        tracing::warn!(order_id = %session.order_id, reason = %message, "Payment failed");
                        let message = format!("Payment failed: {}", message);
                        self.finish(
                            &session.order_id,
                            SessionStatus::Failed,
                            Some(Notice::error(message.clone())),
                            Some(signal.payload),
                        );
                        OutcomeDisposition::Failed { message }
                    }
                }
            }
        }
    }

    /// Duplicate-order recovery: new session, new order id, same amount
    async fn retry(&self, previous: Session) -> OutcomeDisposition {
        self.controller.destroy();

        let mut successor = previous.successor(self.ids.next());
        {
            let mut state = self.lock();
            state.session = Some(successor.clone());
            state.status = SessionStatus::Retrying;
            state.auto_retries += 1;
            state.notice = Some(Notice::info(format!(
                "Order {} was already paid, creating a new payment attempt",
                previous.order_id
            )));
        }
        self.publish();

        let order = self.order_request(&successor);
        match self.api.create_interaction(&order).await {
            Ok(response) => {
                if !self.lock().is_current(&successor.order_id) {
                    return OutcomeDisposition::Stale;
                }
                successor.session_token = response.usable_token().map(String::from);
            }
            Err(err) => return self.retry_failed(&successor.order_id, &err.user_message()),
        }

        let order_id = successor.order_id.clone();
        if !successor.is_armable() {
            return self.retry_failed(&order_id, "Payment API returned no session token");
        }

        match self.arm(successor).await {
            Ok(order_id) => {
                tracing::info!(previous = %previous.order_id, order_id = %order_id, "New payment attempt armed");
                {
                    let mut state = self.lock();
                    state.notice = Some(Notice::info(format!(
                        "A new payment attempt was created (order {})",
                        order_id
                    )));
                }
                self.publish();
                OutcomeDisposition::Retried { order_id }
            }
            Err(ArmError::Closed) => OutcomeDisposition::Stale,
            Err(ArmError::Failed(message)) => self.retry_failed(&order_id, &message),
        }
    }

    fn retry_failed(&self, order_id: &OrderId, reason: &str) -> OutcomeDisposition {
        tracing::error!(order_id = %order_id, reason, "Could not create a new payment attempt");
        let message = format!(
            "Could not create a new payment attempt ({}). Please restart the checkout.",
            reason
        );
        self.finish(order_id, SessionStatus::Failed, Some(Notice::error(message.clone())), None);
        OutcomeDisposition::RetryFailed { message }
    }

    // ========================================================================
    // Runtime, status and teardown
    // ========================================================================

    /// Explicit user request to retry loading the real widget.
    ///
    /// An armed session is re-mounted on whatever runtime is available now.
    /// Returns true if the real runtime is available.
    pub async fn reload_widget_runtime(&self) -> bool {
        let availability = self.loader.reload().await;
        let ready = !availability.is_degraded();

        let armed = {
            let state = self.lock();
            match (&state.session, state.status) {
                (Some(session), SessionStatus::Armed) => Some(session.clone()),
                _ => None,
            }
        };

        match armed {
            Some(session) => {
                match self.arm(session).await {
                    Ok(_) | Err(ArmError::Closed) => {}
                    Err(ArmError::Failed(message)) => {
                        tracing::warn!(error = %message, "Re-arming after reload failed");
                    }
                }
            }
            None => {
                self.lock().degraded = !ready;
                self.publish();
            }
        }
        ready
    }

    /// Ask the Payment API for an order's status
    pub async fn query_status(&self, order_id: &OrderId, scenario: ScenarioType) -> std::result::Result<PaymentStatus, String> {
        self.api.get_status(order_id, scenario).await.map_err(|err| {
            tracing::warn!(order_id = %order_id, error = %err, "Status query failed");
            err.user_message()
        })
    }

    /// The view is going away: destroy the widget and forget the session
    pub fn teardown(&self) {
        self.controller.destroy();
        {
            let mut state = self.lock();
            let degraded = state.degraded;
            *state = OrchestratorState {
                degraded,
                ..Default::default()
            };
        }
        self.publish();
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn order_request(&self, session: &Session) -> OrderRequest {
        OrderRequest {
            order_id: session.order_id.clone(),
            scenario: session.scenario,
            amount: session.amount,
            currency: session.currency.clone(),
            return_url: self.config.return_url(session.order_id.as_str(), session.scenario.as_str()),
            webhook_url: self.config.webhook_url(),
        }
    }

    /// Move the current session to a terminal state and report it upward
    fn finish(
        &self,
        order_id: &OrderId,
        status: SessionStatus,
        notice: Option<Notice>,
        payload: Option<serde_json::Value>,
    ) {
        {
            let mut state = self.lock();
            if !state.is_current(order_id) || state.status.is_terminal() {
                return;
            }
            state.set_status(status);
            state.notice = notice;

            let kind = match status {
                SessionStatus::Completed => Some(OutcomeKind::Completed),
                SessionStatus::Cancelled => Some(OutcomeKind::Cancelled),
                SessionStatus::Failed => Some(OutcomeKind::Failed),
                _ => None,
            };
            let outcome = kind.zip(state.session.as_ref()).map(|(kind, session)| CheckoutOutcome {
                order_id: session.order_id.clone(),
                scenario: session.scenario,
                kind,
                payload: payload.unwrap_or(serde_json::Value::Null),
            });
            state.outcome = outcome;
        }
        self.publish();
    }

    fn publish(&self) {
        let view = {
            let state = self.lock();
            CheckoutView {
                status: state.status,
                session: state.session.clone(),
                notice: state.notice.clone(),
                outcome: state.outcome.clone(),
                degraded: state.degraded,
            }
        };
        self.view.send_replace(view);
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use serde_json::json;

    use async_trait::async_trait;

    use crate::host::{MemoryMountPoint, MemoryScriptHost, StaticRuntimeResolver};
    use crate::payment::{DirectPaymentResponse, InteractionResponse, MockPaymentApi};
    use crate::widget::{WidgetCallbacks, WidgetHandle, WidgetOptions};

    /// Runtime that hands every instance's callbacks to the test
    #[derive(Default)]
    struct ScriptedRuntime {
        callbacks: Mutex<Vec<WidgetCallbacks>>,
    }

    impl ScriptedRuntime {
        fn constructed(&self) -> usize {
            self.callbacks.lock().unwrap().len()
        }

        fn latest(&self) -> WidgetCallbacks {
            self.callbacks.lock().unwrap().last().cloned().unwrap()
        }
    }

    struct NoopHandle;

    impl WidgetHandle for NoopHandle {}

    impl WidgetRuntime for ScriptedRuntime {
        fn construct(&self, options: WidgetOptions) -> std::result::Result<Box<dyn WidgetHandle>, String> {
            self.callbacks.lock().unwrap().push(options.callbacks);
            Ok(Box::new(NoopHandle))
        }

        fn name(&self) -> &str {
            "ScriptedRuntime"
        }
    }

    struct Harness {
        orchestrator: SessionOrchestrator,
        api: Arc<MockPaymentApi>,
        runtime: Arc<ScriptedRuntime>,
        scripts: Arc<MemoryScriptHost>,
        resolver: Arc<StaticRuntimeResolver>,
        mount: Arc<MemoryMountPoint>,
    }

    fn harness_with(config: CheckoutConfig, api: MockPaymentApi, runtime_present: bool) -> Harness {
        let api = Arc::new(api);
        let runtime = Arc::new(ScriptedRuntime::default());
        let scripts = Arc::new(MemoryScriptHost::new());
        let resolver = Arc::new(StaticRuntimeResolver::new());
        let mount = Arc::new(MemoryMountPoint::new());
        if runtime_present {
            resolver.register("DropInSDK", runtime.clone());
        }

        let orchestrator = SessionOrchestrator::new(
            config,
            api.clone(),
            HostCapabilities {
                scripts: scripts.clone(),
                resolver: resolver.clone(),
                mount_point: mount.clone(),
            },
        )
        .unwrap();

        Harness {
            orchestrator,
            api,
            runtime,
            scripts,
            resolver,
            mount,
        }
    }

    fn harness() -> Harness {
        harness_with(CheckoutConfig::default(), MockPaymentApi::new(), true)
    }

    /// Payment API that answers every request with the same response
    struct CannedApi {
        interaction: InteractionResponse,
        direct_status: String,
    }

    impl CannedApi {
        fn interaction(session_token: Option<&str>, redirect_url: Option<&str>) -> Self {
            Self {
                interaction: InteractionResponse {
                    session_token: session_token.map(String::from),
                    redirect_url: redirect_url.map(String::from),
                    message: None,
                },
                direct_status: "captured".into(),
            }
        }

        fn direct(status: &str) -> Self {
            Self {
                direct_status: status.into(),
                ..Self::interaction(Some("sess_canned"), None)
            }
        }
    }

    #[async_trait]
    impl PaymentApi for CannedApi {
        async fn create_interaction(&self, _request: &OrderRequest) -> Result<InteractionResponse> {
            Ok(self.interaction.clone())
        }

        async fn create_direct_payment(
            &self,
            _request: &OrderRequest,
            _instrument: &CardInstrument,
        ) -> Result<DirectPaymentResponse> {
            Ok(DirectPaymentResponse {
                status: self.direct_status.clone(),
                redirect_url: None,
                message: None,
            })
        }

        async fn get_status(&self, order_id: &OrderId, _scenario: ScenarioType) -> Result<PaymentStatus> {
            Ok(PaymentStatus {
                order_id: order_id.clone(),
                status: self.direct_status.clone(),
                detail: None,
                amount: None,
                currency: None,
            })
        }

        fn name(&self) -> &str {
            "CannedApi"
        }
    }

    fn canned(api: CannedApi) -> (SessionOrchestrator, Arc<ScriptedRuntime>, Arc<MemoryMountPoint>) {
        let runtime = Arc::new(ScriptedRuntime::default());
        let resolver = Arc::new(StaticRuntimeResolver::new());
        resolver.register("DropInSDK", runtime.clone());
        let mount = Arc::new(MemoryMountPoint::new());

        let orchestrator = SessionOrchestrator::new(
            CheckoutConfig::default(),
            Arc::new(api),
            HostCapabilities {
                scripts: Arc::new(MemoryScriptHost::new()),
                resolver,
                mount_point: mount.clone(),
            },
        )
        .unwrap();
        (orchestrator, runtime, mount)
    }

    fn embedded() -> CheckoutRequest {
        CheckoutRequest::embedded(dec!(300.00), "USD")
    }

    async fn armed(h: &Harness) -> OrderId {
        match h.orchestrator.submit(embedded()).await {
            Submission::Armed { order_id } => order_id,
            other => panic!("expected armed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embedded_completion_reports_own_order_id() {
        let h = harness();
        let order_id = armed(&h).await;

        let view = h.orchestrator.view();
        assert_eq!(view.status, SessionStatus::Armed);
        assert!(!view.degraded);
        assert!(h.mount.id().is_some());
        assert_eq!(h.scripts.injections(), 0);

        h.runtime
            .latest()
            .emit(OutcomeKind::Completed, json!({ "merchantTransID": "X-FROM-WIDGET" }));
        assert_eq!(h.orchestrator.drain().await, vec![OutcomeDisposition::Completed]);

        let view = h.orchestrator.view();
        assert_eq!(view.status, SessionStatus::Completed);
        let outcome = view.outcome.unwrap();
        assert_eq!(outcome.order_id, order_id);
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert_eq!(outcome.payload["merchantTransID"], "X-FROM-WIDGET");
        assert_eq!(h.orchestrator.controller().live_instances(), 0);
        assert!(h.mount.id().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_order_failure_retries_with_new_order_id() {
        let h = harness();
        let first = armed(&h).await;
        let first_callbacks = h.runtime.latest();

        first_callbacks.emit(OutcomeKind::Failed, json!({ "message": "Order already paid" }));
        let dispositions = h.orchestrator.drain().await;
        let second = match dispositions.as_slice() {
            [OutcomeDisposition::Retried { order_id }] => order_id.clone(),
            other => panic!("expected a retry, got {:?}", other),
        };

        assert_ne!(first, second);
        assert!(h.api.knows(&second));
        assert_eq!(h.runtime.constructed(), 2);
        assert_eq!(h.orchestrator.controller().live_instances(), 1);

        let view = h.orchestrator.view();
        assert_eq!(view.status, SessionStatus::Armed);
        let session = view.session.unwrap();
        assert_eq!(session.order_id, second);
        assert_eq!(session.attempt, 2);
        assert_eq!(session.amount, dec!(300.00));
        assert_eq!(view.notice.unwrap().level, NoticeLevel::Info);

        // The first widget is gone; anything it still says is ignored
        first_callbacks.emit(OutcomeKind::Completed, json!({}));
        assert_eq!(h.orchestrator.drain().await, vec![OutcomeDisposition::Stale]);
        assert_eq!(h.orchestrator.view().status, SessionStatus::Armed);
    }

    #[tokio::test]
    async fn test_other_failure_keeps_order_id() {
        let h = harness();
        let order_id = armed(&h).await;

        h.runtime
            .latest()
            .emit(OutcomeKind::Failed, json!({ "code": "CARD_DECLINED" }));
        let dispositions = h.orchestrator.drain().await;
        assert!(matches!(
            dispositions.as_slice(),
            [OutcomeDisposition::Failed { message }] if message.contains("CARD_DECLINED")
        ));

        let view = h.orchestrator.view();
        assert_eq!(view.status, SessionStatus::Failed);
        assert_eq!(view.session.unwrap().order_id, order_id);
        assert_eq!(view.notice.unwrap().level, NoticeLevel::Error);
        assert_eq!(view.outcome.unwrap().order_id, order_id);
        assert_eq!(h.api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_ends_session() {
        let h = harness();
        armed(&h).await;

        h.runtime.latest().emit(OutcomeKind::Cancelled, json!({}));
        assert_eq!(h.orchestrator.drain().await, vec![OutcomeDisposition::Cancelled]);
        assert_eq!(h.orchestrator.view().status, SessionStatus::Cancelled);
        assert_eq!(h.orchestrator.controller().live_instances(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submit_while_awaiting_is_ignored() {
        let h = harness_with(
            CheckoutConfig::default(),
            MockPaymentApi::with_latency(Duration::from_millis(100)),
            true,
        );

        let (first, second) = tokio::join!(h.orchestrator.submit(embedded()), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(h.orchestrator.view().status, SessionStatus::AwaitingSession);
            h.orchestrator.submit(embedded()).await
        });

        assert!(matches!(first, Submission::Armed { .. }));
        assert_eq!(second, Submission::Ignored);
        assert_eq!(h.api.request_count(), 1);
        assert_eq!(h.runtime.constructed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_ignored_while_retrying() {
        let h = harness_with(
            CheckoutConfig::default(),
            MockPaymentApi::with_latency(Duration::from_millis(100)),
            true,
        );
        armed(&h).await;

        h.runtime
            .latest()
            .emit(OutcomeKind::Failed, json!({ "message": "duplicate order" }));
        let (dispositions, (status, submission)) = tokio::join!(h.orchestrator.drain(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let status = h.orchestrator.view().status;
            (status, h.orchestrator.submit(embedded()).await)
        });

        assert_eq!(status, SessionStatus::Retrying);
        assert_eq!(submission, Submission::Ignored);
        assert!(matches!(dispositions.as_slice(), [OutcomeDisposition::Retried { .. }]));
        assert_eq!(h.api.request_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_cap_fails_second_duplicate() {
        let h = harness();
        armed(&h).await;

        h.runtime
            .latest()
            .emit(OutcomeKind::Failed, json!({ "message": "Duplicate order" }));
        assert!(matches!(
            h.orchestrator.drain().await.as_slice(),
            [OutcomeDisposition::Retried { .. }]
        ));

        h.runtime
            .latest()
            .emit(OutcomeKind::Failed, json!({ "message": "Duplicate order" }));
        let dispositions = h.orchestrator.drain().await;
        assert!(matches!(
            dispositions.as_slice(),
            [OutcomeDisposition::Failed { message }] if message.contains("restart")
        ));
        assert_eq!(h.orchestrator.view().status, SessionStatus::Failed);
        assert_eq!(h.api.request_count(), 2);
        assert_eq!(h.orchestrator.controller().live_instances(), 0);
    }

    #[tokio::test]
    async fn test_retry_counter_resets_on_new_submission() {
        let h = harness();
        armed(&h).await;
        h.runtime
            .latest()
            .emit(OutcomeKind::Failed, json!({ "message": "already paid" }));
        h.orchestrator.drain().await;

        armed(&h).await;
        h.runtime
            .latest()
            .emit(OutcomeKind::Failed, json!({ "message": "already paid" }));
        assert!(matches!(
            h.orchestrator.drain().await.as_slice(),
            [OutcomeDisposition::Retried { .. }]
        ));
    }

    #[tokio::test]
    async fn test_retry_resubmission_failure_is_fatal() {
        let h = harness();
        armed(&h).await;

        h.api.fail_next(503, "Service unavailable");
        h.runtime
            .latest()
            .emit(OutcomeKind::Failed, json!({ "message": "订单已支付" }));
        let dispositions = h.orchestrator.drain().await;

        assert!(matches!(
            dispositions.as_slice(),
            [OutcomeDisposition::RetryFailed { message }]
                if message.contains("Service unavailable") && message.contains("restart")
        ));
        let view = h.orchestrator.view();
        assert_eq!(view.status, SessionStatus::Failed);
        assert_eq!(view.notice.unwrap().level, NoticeLevel::Error);
        assert_eq!(h.orchestrator.controller().live_instances(), 0);
    }

    #[tokio::test]
    async fn test_api_error_returns_to_unarmed() {
        let h = harness();
        h.api.fail_next(400, "Invalid currency code");

        let submission = h.orchestrator.submit(embedded()).await;
        assert_eq!(
            submission,
            Submission::Rejected {
                message: "Invalid currency code".into()
            }
        );

        let view = h.orchestrator.view();
        assert_eq!(view.status, SessionStatus::Unarmed);
        assert!(view.session.is_none());
        assert_eq!(view.notice.unwrap().message, "Invalid currency code");
        assert_eq!(h.runtime.constructed(), 0);
        assert!(h.mount.id().is_none());

        // The shopper can simply submit again
        armed(&h).await;
    }

    #[tokio::test]
    async fn test_unreachable_api_returns_to_unarmed() {
        let h = harness();
        h.api.fail_next_unreachable();

        let message = match h.orchestrator.submit(embedded()).await {
            Submission::Rejected { message } => message,
            other => panic!("expected rejection, got {:?}", other),
        };
        assert!(message.contains("unreachable"));

        let view = h.orchestrator.view();
        assert_eq!(view.status, SessionStatus::Unarmed);
        assert!(view.session.is_none());
        let notice = view.notice.unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.message, message);
        assert_eq!(h.runtime.constructed(), 0);
        assert_eq!(h.orchestrator.controller().live_instances(), 0);
    }

    #[tokio::test]
    async fn test_embedded_without_session_token_is_rejected() {
        for token in [None, Some("")] {
            let (orchestrator, runtime, mount) =
                canned(CannedApi::interaction(token, Some("https://hosted.example/pay/abc")));

            let submission = orchestrator.submit(embedded()).await;
            assert_eq!(
                submission,
                Submission::Rejected {
                    message: "Payment API returned no session token".into()
                }
            );

            let view = orchestrator.view();
            assert_eq!(view.status, SessionStatus::Unarmed);
            assert_eq!(view.notice.unwrap().level, NoticeLevel::Error);
            assert_eq!(runtime.constructed(), 0);
            assert!(mount.id().is_none());
        }
    }

    #[tokio::test]
    async fn test_redirect_without_session_token_hands_off() {
        let (orchestrator, runtime, _mount) =
            canned(CannedApi::interaction(None, Some("https://hosted.example/pay/abc")));

        let submission = orchestrator
            .submit(CheckoutRequest::redirect(dec!(300.00), "USD"))
            .await;
        assert!(matches!(submission, Submission::Redirect { ref url, .. } if url.ends_with("/pay/abc")));
        assert_eq!(orchestrator.view().status, SessionStatus::Completed);
        assert_eq!(runtime.constructed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_error_falls_back_to_simulator() {
        let mut config = CheckoutConfig::default();
        config.simulator.success_probability = 1.0;
        let h = harness_with(config, MockPaymentApi::new(), false);
        h.scripts.fail_next_load("404 Not Found");

        let order_id = armed(&h).await;
        assert!(h.orchestrator.view().degraded);
        assert!(h.orchestrator.simulator().is_armed());
        assert_eq!(h.scripts.injections(), 1);

        assert_eq!(h.orchestrator.simulator().pay().await, Some(OutcomeKind::Completed));
        assert_eq!(h.orchestrator.drain().await, vec![OutcomeDisposition::Completed]);

        let outcome = h.orchestrator.view().outcome.unwrap();
        assert_eq!(outcome.order_id, order_id);
        assert!(outcome.payload["merchantTransID"].as_str().unwrap().starts_with("mock_"));
        assert!(!h.orchestrator.simulator().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulator_cancel_in_degraded_mode() {
        let h = harness_with(CheckoutConfig::default(), MockPaymentApi::new(), false);
        armed(&h).await;

        assert!(h.orchestrator.simulator().cancel());
        assert_eq!(h.orchestrator.drain().await, vec![OutcomeDisposition::Cancelled]);
        assert_eq!(h.orchestrator.view().status, SessionStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_switches_armed_session_to_real_widget() {
        let h = harness_with(CheckoutConfig::default(), MockPaymentApi::new(), false);
        h.scripts.fail_next_load("net::ERR_BLOCKED_BY_CLIENT");
        let order_id = armed(&h).await;
        assert!(h.orchestrator.view().degraded);

        h.scripts
            .register_on_load(h.resolver.clone(), "DropinSDK", h.runtime.clone(), Duration::ZERO);
        assert!(h.orchestrator.reload_widget_runtime().await);

        let view = h.orchestrator.view();
        assert!(!view.degraded);
        assert_eq!(view.status, SessionStatus::Armed);
        assert_eq!(view.session.unwrap().order_id, order_id);
        assert!(!h.orchestrator.simulator().is_armed());
        assert_eq!(h.runtime.constructed(), 1);
        assert_eq!(h.scripts.removals(), 1);
        assert_eq!(h.orchestrator.controller().live_instances(), 1);
    }

    #[tokio::test]
    async fn test_redirect_flow_hands_off_url() {
        let h = harness();
        let submission = h
            .orchestrator
            .submit(CheckoutRequest::redirect(dec!(49.90), "HKD"))
            .await;

        let Submission::Redirect { order_id, url } = submission else {
            panic!("expected redirect");
        };
        assert!(url.contains("/linkpay/sess_"));

        let view = h.orchestrator.view();
        assert_eq!(view.status, SessionStatus::Completed);
        assert_eq!(view.outcome.unwrap().order_id, order_id);
        assert_eq!(h.runtime.constructed(), 0);
    }

    #[tokio::test]
    async fn test_direct_flow() {
        let h = harness();
        let card = |number: &str| CardInstrument::new(number, "12/30", "123", "Ada Lovelace");

        let paid = h
            .orchestrator
            .submit(CheckoutRequest::direct(dec!(10), "USD", card("4242 4242 4242 4242")))
            .await;
        assert!(matches!(paid, Submission::Completed { .. }));
        assert_eq!(h.orchestrator.view().status, SessionStatus::Completed);

        let challenged = h
            .orchestrator
            .submit(CheckoutRequest::direct(dec!(10), "USD", card("4000 0000 0000 3063")))
            .await;
        assert!(matches!(challenged, Submission::Redirect { ref url, .. } if url.contains("/3ds/")));

        let declined = h
            .orchestrator
            .submit(CheckoutRequest::direct(dec!(10), "USD", card("4000 0000 0000 0002")))
            .await;
        assert_eq!(
            declined,
            Submission::Rejected {
                message: "Card declined by issuer".into()
            }
        );
        assert_eq!(h.orchestrator.view().status, SessionStatus::Unarmed);
        assert_eq!(h.runtime.constructed(), 0);
    }

    #[tokio::test]
    async fn test_direct_failure_statuses_are_not_paid() {
        let card = CardInstrument::new("4242 4242 4242 4242", "12/30", "123", "Ada Lovelace");

        for status in ["error", "canceled", "voided", "DECLINED"] {
            let (orchestrator, _runtime, _mount) = canned(CannedApi::direct(status));
            let submission = orchestrator
                .submit(CheckoutRequest::direct(dec!(10), "USD", card.clone()))
                .await;

            assert_eq!(
                submission,
                Submission::Rejected {
                    message: format!("Payment {}", status.to_lowercase())
                },
                "status {status}"
            );
            let view = orchestrator.view();
            assert_eq!(view.status, SessionStatus::Unarmed);
            assert!(view.outcome.is_none());
        }

        let (orchestrator, _runtime, _mount) = canned(CannedApi::direct("success"));
        let submission = orchestrator
            .submit(CheckoutRequest::direct(dec!(10), "USD", card))
            .await;
        assert!(matches!(submission, Submission::Completed { .. }));
    }

    #[tokio::test]
    async fn test_direct_without_card_is_rejected_locally() {
        let h = harness();
        let mut request = CheckoutRequest::embedded(dec!(10), "USD");
        request.scenario = ScenarioType::Direct;

        assert!(matches!(
            h.orchestrator.submit(request).await,
            Submission::Rejected { .. }
        ));
        assert_eq!(h.api.request_count(), 0);
        assert_eq!(h.orchestrator.view().status, SessionStatus::Unarmed);
    }

    #[tokio::test]
    async fn test_teardown_drops_late_signals() {
        let h = harness();
        armed(&h).await;
        let callbacks = h.runtime.latest();

        h.orchestrator.teardown();
        assert_eq!(h.orchestrator.view().status, SessionStatus::Unarmed);
        assert_eq!(h.orchestrator.controller().live_instances(), 0);
        assert!(h.mount.id().is_none());

        callbacks.emit(OutcomeKind::Completed, json!({}));
        assert_eq!(h.orchestrator.drain().await, vec![OutcomeDisposition::Stale]);
        assert!(h.orchestrator.view().outcome.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_during_submission_abandons_it() {
        let h = harness_with(
            CheckoutConfig::default(),
            MockPaymentApi::with_latency(Duration::from_millis(100)),
            true,
        );

        let (submission, ()) = tokio::join!(h.orchestrator.submit(embedded()), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.orchestrator.teardown();
        });

        assert_eq!(submission, Submission::Abandoned);
        assert_eq!(h.runtime.constructed(), 0);
        assert_eq!(h.orchestrator.view().status, SessionStatus::Unarmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_while_loading_runtime_abandons_it() {
        // Script loads but the runtime never registers, so the loader sits in its settle wait
        let h = harness_with(CheckoutConfig::default(), MockPaymentApi::new(), false);

        let (submission, ()) = tokio::join!(h.orchestrator.submit(embedded()), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            h.orchestrator.teardown();
        });

        assert_eq!(submission, Submission::Abandoned);
        assert_eq!(h.runtime.constructed(), 0);
        assert!(!h.orchestrator.simulator().is_armed());

        let view = h.orchestrator.view();
        assert_eq!(view.status, SessionStatus::Unarmed);
        assert!(view.notice.is_none());
    }

    #[tokio::test]
    async fn test_query_status() {
        let h = harness();
        let order_id = armed(&h).await;

        let status = h
            .orchestrator
            .query_status(&order_id, ScenarioType::Embedded)
            .await
            .unwrap();
        assert_eq!(status.status, "pending");
        assert_eq!(status.amount, Some(dec!(300.00)));

        let unknown = h
            .orchestrator
            .query_status(&OrderId::from_string("nope"), ScenarioType::Embedded)
            .await
            .unwrap();
        assert_eq!(unknown.status, "unknown");
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let h = harness();
        let mut rx = h.orchestrator.subscribe();

        armed(&h).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().status, SessionStatus::Armed);
    }

    #[tokio::test]
    async fn test_pump_handles_next_signal() {
        let h = harness();
        armed(&h).await;

        h.runtime.latest().emit(OutcomeKind::Cancelled, json!({}));
        assert_eq!(h.orchestrator.pump().await, Some(OutcomeDisposition::Cancelled));
    }
}
