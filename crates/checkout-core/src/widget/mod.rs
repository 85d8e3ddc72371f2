//! Embedded Payment Widget
//!
//! Contracts for the third-party widget runtime plus the three pieces that
//! manage it:
//!
//! - [`loader`] makes sure a runtime is available, degrading to the simulator
//! - [`controller`] owns the single live widget instance
//! - [`simulator`] stands in for the real runtime when it cannot load

pub mod controller;
pub mod loader;
pub mod simulator;

pub use controller::{InstanceController, LifecycleState, MountReport};
pub use loader::{RuntimeAvailability, RuntimeResolver, ScriptHost, ScriptLoad, WidgetLoader};
pub use simulator::{FallbackSimulator, SimulatedRuntime};

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier of one widget mount.
///
/// A new one is generated for every construction, even for the same session,
/// so the runtime never binds to a recycled node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MountId(String);

impl MountId {
    pub fn generate() -> Self {
        Self(format!("dropin-container-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// CSS selector handed to the runtime
    pub fn selector(&self) -> String {
        format!("#{}", self.0)
    }
}

impl std::fmt::Display for MountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three outcomes a widget can report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Completed,
    Failed,
    Cancelled,
}

/// A widget callback, tagged with the mount it came from
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WidgetSignal {
    pub mount_id: MountId,
    pub kind: OutcomeKind,
    /// Raw payload as produced by the runtime
    pub payload: serde_json::Value,
}

impl WidgetSignal {
    /// Human-readable failure reason carried in the payload
    pub fn message(&self) -> String {
        let field = |name: &str| {
            self.payload
                .get(name)
                .and_then(serde_json::Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        field("message")
            .or_else(|| field("msg"))
            .or_else(|| field("code"))
            .unwrap_or_else(|| "Unknown error".into())
    }
}

/// Callback invoked by a runtime with its raw event payload
pub type OutcomeCallback = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Outcome callbacks handed to a runtime at construction
#[derive(Clone)]
pub struct WidgetCallbacks {
    pub on_completed: OutcomeCallback,
    pub on_failed: OutcomeCallback,
    pub on_cancelled: OutcomeCallback,
}

impl WidgetCallbacks {
    pub fn emit(&self, kind: OutcomeKind, payload: serde_json::Value) {
        match kind {
            OutcomeKind::Completed => (self.on_completed)(payload),
            OutcomeKind::Failed => (self.on_failed)(payload),
            OutcomeKind::Cancelled => (self.on_cancelled)(payload),
        }
    }
}

impl std::fmt::Debug for WidgetCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WidgetCallbacks { .. }")
    }
}

/// Construction options for a widget instance
#[derive(Clone, Debug)]
pub struct WidgetOptions {
    /// Selector of the mount point, e.g. `#dropin-container-...`
    pub mount_selector: String,
    pub session_token: String,
    /// Order being paid, for display
    pub amount: Decimal,
    pub currency: String,
    /// Environment in the runtime's own vocabulary
    pub environment: String,
    pub locale: String,
    pub callbacks: WidgetCallbacks,
}

/// The external widget runtime (its global constructor)
pub trait WidgetRuntime: Send + Sync {
    /// Construct a widget; the error is whatever the runtime threw
    fn construct(&self, options: WidgetOptions) -> Result<Box<dyn WidgetHandle>, String>;

    fn name(&self) -> &str;
}

/// A constructed widget. Runtimes may expose either teardown hook, both or
/// neither; the defaults do nothing.
pub trait WidgetHandle: Send {
    fn destroy(&mut self) {}

    fn cleanup(&mut self) {}
}
