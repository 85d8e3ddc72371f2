//! Widget Runtime Loader
//!
//! Makes the third-party widget runtime available, exactly once per process.
//! Every failure path degrades to the fallback simulator; nothing here blocks
//! the shopper from finishing the demo.
//!
//! ```text
//! resolver hit? ──yes──▶ Ready
//!      │no
//!      ▼
//! inject script ──error──▶ Degraded
//!      │loaded
//!      ▼
//! poll aliases with backoff ──found──▶ Ready
//!      │exhausted
//!      ▼
//!  Degraded
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use super::WidgetRuntime;
use crate::config::{CheckoutConfig, SettlePolicy};

/// Outcome of a script injection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptLoad {
    Loaded,
    Error(String),
}

/// Script-execution side of the host environment
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Inject a script tag and resolve once it loaded or failed
    async fn inject(&self, src: &str) -> ScriptLoad;

    /// Remove every script tag loaded from `src`, returning how many were removed
    fn remove(&self, src: &str) -> usize;
}

/// Looks up the runtime constructor under one of its global names
pub trait RuntimeResolver: Send + Sync {
    fn resolve(&self, alias: &str) -> Option<Arc<dyn WidgetRuntime>>;
}

/// Result of [`WidgetLoader::ensure_runtime_available`]
#[derive(Clone)]
pub enum RuntimeAvailability {
    Ready(Arc<dyn WidgetRuntime>),
    /// Use the fallback simulator
    Degraded { reason: String },
}

impl RuntimeAvailability {
    pub fn is_degraded(&self) -> bool {
        matches!(self, RuntimeAvailability::Degraded { .. })
    }
}

impl std::fmt::Debug for RuntimeAvailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeAvailability::Ready(runtime) => write!(f, "Ready({})", runtime.name()),
            RuntimeAvailability::Degraded { reason } => write!(f, "Degraded({})", reason),
        }
    }
}

#[derive(Default)]
struct LoaderState {
    result: Option<RuntimeAvailability>,
    script_injected: bool,
}

/// Loads and detects the widget runtime
pub struct WidgetLoader {
    host: Arc<dyn ScriptHost>,
    resolver: Arc<dyn RuntimeResolver>,
    script_url: String,
    aliases: Vec<String>,
    settle: SettlePolicy,
    // Held across the injection and settle waits so concurrent callers share one load
    state: tokio::sync::Mutex<LoaderState>,
}

impl WidgetLoader {
    pub fn new(
        host: Arc<dyn ScriptHost>,
        resolver: Arc<dyn RuntimeResolver>,
        config: &CheckoutConfig,
    ) -> Self {
        Self {
            host,
            resolver,
            script_url: config.script_url.clone(),
            aliases: config.runtime_aliases.clone(),
            settle: config.settle.clone(),
            state: tokio::sync::Mutex::new(LoaderState::default()),
        }
    }

    /// Resolve the runtime, loading it on first use. Later calls return the
    /// cached result until [`reload`](Self::reload) is invoked.
    pub async fn ensure_runtime_available(&self) -> RuntimeAvailability {
        let mut state = self.state.lock().await;
        if let Some(result) = &state.result {
            return result.clone();
        }

        let result = self.detect(&mut state).await;
        state.result = Some(result.clone());
        result
    }

    /// Explicit user-requested retry: drop the old script tag and detect again
    pub async fn reload(&self) -> RuntimeAvailability {
        let mut state = self.state.lock().await;

        if state.script_injected {
            let removed = self.host.remove(&self.script_url);
            tracing::info!(removed, src = %self.script_url, "Removed previous widget script");
            state.script_injected = false;
        }
        state.result = None;

        let result = self.detect(&mut state).await;
        state.result = Some(result.clone());
        result
    }

    fn lookup(&self) -> Option<(&str, Arc<dyn WidgetRuntime>)> {
        self.aliases
            .iter()
            .find_map(|alias| self.resolver.resolve(alias).map(|runtime| (alias.as_str(), runtime)))
    }

    async fn detect(&self, state: &mut LoaderState) -> RuntimeAvailability {
        if let Some((alias, runtime)) = self.lookup() {
            tracing::info!(alias, "Widget runtime already present");
            return RuntimeAvailability::Ready(runtime);
        }

        tracing::info!(src = %self.script_url, "Loading widget runtime script");
        state.script_injected = true;

        if let ScriptLoad::Error(err) = self.host.inject(&self.script_url).await {
            tracing::warn!(error = %err, "Widget script failed to load, using fallback simulator");
            return RuntimeAvailability::Degraded {
                reason: format!("widget script failed to load: {}", err),
            };
        }

        for delay in self.settle.delays() {
            tokio::time::sleep(delay).await;
            if let Some((alias, runtime)) = self.lookup() {
                tracing::info!(alias, "Widget runtime available");
                return RuntimeAvailability::Ready(runtime);
            }
        }

        tracing::warn!(
            aliases = ?self.aliases,
            waited_ms = self.settle.total_wait().as_millis() as u64,
            "Widget runtime not found after script load, using fallback simulator"
        );
        RuntimeAvailability::Degraded {
            reason: format!(
                "runtime not registered under {} after {}ms",
                self.aliases.join("/"),
                self.settle.total_wait().as_millis()
            ),
        }
    }
}
