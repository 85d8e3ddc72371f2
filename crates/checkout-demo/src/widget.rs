//! Stand-in for the third-party widget runtime.
//!
//! Renders a placeholder into the mount point and, after a short delay,
//! reports the configured outcome through the widget callbacks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use checkout_core::host::MemoryMountPoint;
use checkout_core::widget::{OutcomeKind, WidgetHandle, WidgetOptions, WidgetRuntime};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::settings::WidgetBehaviour;

pub struct DemoRuntime {
    mount: Arc<MemoryMountPoint>,
    behaviour: WidgetBehaviour,
    delay: Duration,
    constructed: AtomicUsize,
}

impl DemoRuntime {
    pub fn new(mount: Arc<MemoryMountPoint>, behaviour: WidgetBehaviour, delay: Duration) -> Self {
        Self {
            mount,
            behaviour,
            delay,
            constructed: AtomicUsize::new(0),
        }
    }

    fn outcome_for(&self, instance: usize, session_token: &str) -> (OutcomeKind, serde_json::Value) {
        let trans_id = format!("wdg_{}", uuid::Uuid::new_v4().simple());
        match self.behaviour {
            WidgetBehaviour::DuplicateOnce if instance == 0 => (
                OutcomeKind::Failed,
                json!({ "type": "payment_failed", "code": "C0021", "message": "Order already paid", "sessionID": session_token }),
            ),
            WidgetBehaviour::Complete | WidgetBehaviour::DuplicateOnce => (
                OutcomeKind::Completed,
                json!({ "type": "payment_completed", "merchantTransID": trans_id, "sessionID": session_token }),
            ),
            // The runtime reports a payment it could not perform as a failure
            WidgetBehaviour::Fail => (
                OutcomeKind::Failed,
                json!({ "type": "payment_not_performed", "code": "D0005", "message": "Insufficient funds", "sessionID": session_token }),
            ),
            WidgetBehaviour::Cancel => (
                OutcomeKind::Cancelled,
                json!({ "type": "payment_cancelled", "sessionID": session_token }),
            ),
        }
    }
}

impl WidgetRuntime for DemoRuntime {
    fn construct(&self, options: WidgetOptions) -> Result<Box<dyn WidgetHandle>, String> {
        if options.session_token.is_empty() {
            return Err("DropInSDK: sessionID is required".into());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| e.to_string())?;

        let instance = self.constructed.fetch_add(1, Ordering::SeqCst);
        self.mount.render(format!(
            "<iframe data-env=\"{}\" data-locale=\"{}\" data-session=\"{}\"></iframe>",
            options.environment, options.locale, options.session_token
        ));
        tracing::debug!(selector = %options.mount_selector, instance, "Demo widget rendered");

        let (kind, payload) = self.outcome_for(instance, &options.session_token);
        let delay = self.delay;
        let callbacks = options.callbacks;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callbacks.emit(kind, payload);
        });

        Ok(Box::new(DemoHandle { task }))
    }

    fn name(&self) -> &str {
        "DemoRuntime"
    }
}

struct DemoHandle {
    task: JoinHandle<()>,
}

impl WidgetHandle for DemoHandle {
    fn destroy(&mut self) {
        self.task.abort();
    }
}
