//! In-Memory Host Environment
//!
//! Headless implementations of the browser capabilities the widget lifecycle
//! needs: script injection, global runtime lookup and the DOM mount point.
//! Used by the demo binary and by tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::widget::controller::MountPoint;
use crate::widget::loader::{RuntimeResolver, ScriptHost, ScriptLoad};
use crate::widget::{MountId, WidgetRuntime};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Runtime resolver
// ============================================================================

struct Registration {
    runtime: Arc<dyn WidgetRuntime>,
    visible_from: Instant,
}

/// Global namespace of runtime constructors
#[derive(Default)]
pub struct StaticRuntimeResolver {
    entries: Mutex<HashMap<String, Registration>>,
}

impl StaticRuntimeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, alias: impl Into<String>, runtime: Arc<dyn WidgetRuntime>) {
        self.register_delayed(alias, runtime, Duration::ZERO);
    }

    /// Register a runtime that only becomes visible after `delay`, like a
    /// script that sets its global asynchronously
    pub fn register_delayed(&self, alias: impl Into<String>, runtime: Arc<dyn WidgetRuntime>, delay: Duration) {
        lock(&self.entries).insert(
            alias.into(),
            Registration {
                runtime,
                visible_from: Instant::now() + delay,
            },
        );
    }
}

impl RuntimeResolver for StaticRuntimeResolver {
    fn resolve(&self, alias: &str) -> Option<Arc<dyn WidgetRuntime>> {
        let entries = lock(&self.entries);
        entries
            .get(alias)
            .filter(|entry| Instant::now() >= entry.visible_from)
            .map(|entry| entry.runtime.clone())
    }
}

// ============================================================================
// Script host
// ============================================================================

struct PendingRegistration {
    resolver: Arc<StaticRuntimeResolver>,
    alias: String,
    runtime: Arc<dyn WidgetRuntime>,
    delay: Duration,
}

#[derive(Default)]
struct ScriptState {
    tags: Vec<String>,
    injections: usize,
    removals: usize,
    outcomes: VecDeque<ScriptLoad>,
    on_load: Option<PendingRegistration>,
}

/// Script host that records tags instead of fetching anything.
///
/// Loads succeed unless a failure was queued; a successful load can register
/// a runtime with a resolver, which is how a real script defines its global.
#[derive(Default)]
pub struct MemoryScriptHost {
    state: Mutex<ScriptState>,
}

impl MemoryScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next injection report a load error
    pub fn fail_next_load(&self, error: impl Into<String>) {
        lock(&self.state).outcomes.push_back(ScriptLoad::Error(error.into()));
    }

    /// On the next successful load, register `runtime` under `alias` after `delay`
    pub fn register_on_load(
        &self,
        resolver: Arc<StaticRuntimeResolver>,
        alias: impl Into<String>,
        runtime: Arc<dyn WidgetRuntime>,
        delay: Duration,
    ) {
        lock(&self.state).on_load = Some(PendingRegistration {
            resolver,
            alias: alias.into(),
            runtime,
            delay,
        });
    }

    pub fn injections(&self) -> usize {
        lock(&self.state).injections
    }

    pub fn removals(&self) -> usize {
        lock(&self.state).removals
    }

    /// Script tags currently in the document
    pub fn present_scripts(&self) -> usize {
        lock(&self.state).tags.len()
    }
}

#[async_trait]
impl ScriptHost for MemoryScriptHost {
    async fn inject(&self, src: &str) -> ScriptLoad {
        let mut state = lock(&self.state);
        state.injections += 1;
        state.tags.push(src.to_string());

        let outcome = state.outcomes.pop_front().unwrap_or(ScriptLoad::Loaded);
        if outcome == ScriptLoad::Loaded {
            if let Some(pending) = state.on_load.take() {
                pending
                    .resolver
                    .register_delayed(pending.alias, pending.runtime, pending.delay);
            }
        }
        outcome
    }

    fn remove(&self, src: &str) -> usize {
        let mut state = lock(&self.state);
        let before = state.tags.len();
        state.tags.retain(|tag| tag != src);
        let removed = before - state.tags.len();
        state.removals += removed;
        removed
    }
}

// ============================================================================
// Mount point
// ============================================================================

#[derive(Default)]
struct MountNode {
    id: Option<String>,
    content: Vec<String>,
    clears: usize,
}

/// DOM container the widget renders into
#[derive(Default)]
pub struct MemoryMountPoint {
    node: Mutex<MountNode>,
}

impl MemoryMountPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rendered content, as a runtime would
    pub fn render(&self, fragment: impl Into<String>) {
        lock(&self.node).content.push(fragment.into());
    }

    pub fn id(&self) -> Option<String> {
        lock(&self.node).id.clone()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.node).content.is_empty()
    }

    pub fn clear_count(&self) -> usize {
        lock(&self.node).clears
    }
}

impl MountPoint for MemoryMountPoint {
    fn assign_id(&self, id: &MountId) {
        lock(&self.node).id = Some(id.as_str().to_string());
    }

    fn clear(&self) {
        let mut node = lock(&self.node);
        node.content.clear();
        node.clears += 1;
    }

    fn release_id(&self) {
        lock(&self.node).id = None;
    }
}
