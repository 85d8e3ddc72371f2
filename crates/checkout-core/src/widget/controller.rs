//! Widget Instance Controller
//!
//! Owns the one widget instance a checkout view may have, and the DOM node it
//! is mounted in. The instance lives in an explicit single slot tagged with
//! its [`MountId`]; callbacks carry the same tag, and [`InstanceController::accepts`]
//! rejects any signal whose tag is not the live instance's.
//!
//! Invariants:
//! - at most one instance is `Initializing` or `Active`
//! - the previous instance is destroyed before the next is constructed
//! - every teardown (terminal outcome, retry, view unmount) goes through
//!   [`InstanceController::destroy`]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::{
    MountId, OutcomeCallback, OutcomeKind, WidgetCallbacks, WidgetHandle, WidgetOptions,
    WidgetRuntime, WidgetSignal,
};
use crate::config::Environment;
use crate::error::{CheckoutError, Result};
use crate::session::Session;

/// The DOM container the widget is mounted in
pub trait MountPoint: Send + Sync {
    /// Give the container the id the runtime will select it by
    fn assign_id(&self, id: &MountId);

    /// Remove everything rendered inside the container
    fn clear(&self);

    /// Drop the container's id so nothing can select it any more
    fn release_id(&self);
}

/// Lifecycle of the widget slot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LifecycleState {
    #[default]
    Absent,
    Initializing,
    Active,
    Destroyed,
}

impl LifecycleState {
    pub fn is_live(&self) -> bool {
        matches!(self, LifecycleState::Initializing | LifecycleState::Active)
    }
}

/// What a mount request did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountReport {
    Mounted(MountId),
    /// Another mount was still initializing, or the instance was torn down
    /// while it was being constructed
    Ignored,
}

#[derive(Default)]
struct Slot {
    mount_id: Option<MountId>,
    handle: Option<Box<dyn WidgetHandle>>,
    lifecycle: LifecycleState,
}

/// Creates and destroys the widget instance
pub struct InstanceController {
    mount_point: Arc<dyn MountPoint>,
    environment: Environment,
    locale: String,
    signals: mpsc::UnboundedSender<WidgetSignal>,
    slot: Mutex<Slot>,
}

impl InstanceController {
    /// Widget callbacks are forwarded, tagged, to `signals`
    pub fn new(
        mount_point: Arc<dyn MountPoint>,
        environment: Environment,
        locale: impl Into<String>,
        signals: mpsc::UnboundedSender<WidgetSignal>,
    ) -> Self {
        Self {
            mount_point,
            environment,
            locale: locale.into(),
            signals,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lock().lifecycle
    }

    pub fn current_mount_id(&self) -> Option<MountId> {
        self.lock().mount_id.clone()
    }

    /// Number of instances that are initializing or active (0 or 1)
    pub fn live_instances(&self) -> usize {
        usize::from(self.lock().lifecycle.is_live())
    }

    /// Whether a signal comes from the live instance
    pub fn accepts(&self, signal: &WidgetSignal) -> bool {
        let slot = self.lock();
        slot.lifecycle.is_live() && slot.mount_id.as_ref() == Some(&signal.mount_id)
    }

    /// Mount a widget for `session` using `runtime`.
    ///
    /// Any existing instance is destroyed first. Fails if the session has no
    /// token yet or the runtime throws during construction.
    pub fn mount(&self, session: &Session, runtime: &Arc<dyn WidgetRuntime>) -> Result<MountReport> {
        let session_token = session
            .session_token
            .clone()
            .filter(|_| session.is_armable())
            .ok_or_else(|| CheckoutError::MissingSessionToken(session.order_id.to_string()))?;

        if self.lock().lifecycle == LifecycleState::Initializing {
            tracing::debug!(order_id = %session.order_id, "Mount already in progress, ignoring");
            return Ok(MountReport::Ignored);
        }

        self.destroy();

        let mount_id = MountId::generate();
        {
            let mut slot = self.lock();
            slot.mount_id = Some(mount_id.clone());
            slot.handle = None;
            slot.lifecycle = LifecycleState::Initializing;
        }
        self.mount_point.assign_id(&mount_id);

        let options = WidgetOptions {
            mount_selector: mount_id.selector(),
            session_token,
            amount: session.amount,
            currency: session.currency.clone(),
            environment: self.environment.runtime_name().into(),
            locale: self.locale.clone(),
            callbacks: self.callbacks_for(&mount_id),
        };

        tracing::debug!(
            mount_id = %mount_id,
            runtime = runtime.name(),
            environment = %options.environment,
            "Constructing widget"
        );

        // No lock held here: the runtime may call back into the controller
        let constructed = runtime.construct(options);

        let mut slot = self.lock();
        let still_current =
            slot.lifecycle == LifecycleState::Initializing && slot.mount_id.as_ref() == Some(&mount_id);

        match constructed {
            Ok(handle) if still_current => {
                slot.handle = Some(handle);
                slot.lifecycle = LifecycleState::Active;
                tracing::info!(mount_id = %mount_id, order_id = %session.order_id, "Widget mounted");
                Ok(MountReport::Mounted(mount_id))
            }
            Ok(mut handle) => {
                drop(slot);
                tracing::debug!(mount_id = %mount_id, "Widget destroyed during construction, discarding");
                handle.destroy();
                handle.cleanup();
                Ok(MountReport::Ignored)
            }
            Err(err) => {
                if still_current {
                    slot.mount_id = None;
                    slot.lifecycle = LifecycleState::Absent;
                    drop(slot);
                    self.mount_point.clear();
                    self.mount_point.release_id();
                }
                tracing::warn!(mount_id = %mount_id, error = %err, "Widget construction failed");
                Err(CheckoutError::WidgetConstruction(err))
            }
        }
    }

    /// Tear down the live instance, if any.
    ///
    /// Runs the handle's own hooks, clears the mount point and releases its
    /// id before returning. A no-op when nothing is live.
    pub fn destroy(&self) {
        let (handle, mount_id) = {
            let mut slot = self.lock();
            if !slot.lifecycle.is_live() {
                return;
            }
            slot.lifecycle = LifecycleState::Destroyed;
            (slot.handle.take(), slot.mount_id.take())
        };

        if let Some(mut handle) = handle {
            handle.destroy();
            handle.cleanup();
        }
        self.mount_point.clear();
        self.mount_point.release_id();

        if let Some(mount_id) = mount_id {
            tracing::debug!(mount_id = %mount_id, "Widget destroyed");
        }
    }

    fn callbacks_for(&self, mount_id: &MountId) -> WidgetCallbacks {
        let forward = |kind: OutcomeKind| -> OutcomeCallback {
            let signals = self.signals.clone();
            let mount_id = mount_id.clone();
            Arc::new(move |payload: serde_json::Value| {
                let signal = WidgetSignal {
                    mount_id: mount_id.clone(),
                    kind,
                    payload,
                };
                if signals.send(signal).is_err() {
                    tracing::debug!(mount_id = %mount_id, "Orchestrator gone, dropping widget signal");
                }
            })
        };

        WidgetCallbacks {
            on_completed: forward(OutcomeKind::Completed),
            on_failed: forward(OutcomeKind::Failed),
            on_cancelled: forward(OutcomeKind::Cancelled),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for InstanceController {
    fn drop(&mut self) {
        self.destroy();
    }
}
