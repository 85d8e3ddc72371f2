//! Headless checkout demo
//!
//! Runs one checkout through the widget session lifecycle against either the
//! merchant backend (`PAYMENT_API_BASE_URL`) or the in-memory demo backend,
//! with a simulated page hosting the widget.

mod settings;
mod widget;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkout_core::{
    host::{MemoryMountPoint, MemoryScriptHost, StaticRuntimeResolver},
    CardInstrument, CheckoutConfig, CheckoutRequest, HostCapabilities, MockPaymentApi,
    OutcomeDisposition, PaymentApi, ScenarioType, SessionOrchestrator, Submission,
};
use checkout_runtime::HttpPaymentApi;

use crate::settings::{DemoSettings, RuntimeMode};
use crate::widget::DemoRuntime;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CheckoutConfig::from_env()?;
    let settings = DemoSettings::from_env()?;

    // Payment backend
    let api: Arc<dyn PaymentApi> = if std::env::var("PAYMENT_API_BASE_URL").is_ok() {
        tracing::info!("✓ Using HTTP payment backend");
        Arc::new(HttpPaymentApi::from_env()?)
    } else {
        tracing::warn!("⚠ PAYMENT_API_BASE_URL not set - using in-memory demo backend");
        Arc::new(MockPaymentApi::new())
    };

    // Simulated page
    let scripts = Arc::new(MemoryScriptHost::new());
    let resolver = Arc::new(StaticRuntimeResolver::new());
    let mount = Arc::new(MemoryMountPoint::new());
    let runtime = Arc::new(DemoRuntime::new(mount.clone(), settings.behaviour, settings.widget_delay));
    let alias = config.runtime_aliases.first().cloned().unwrap_or_else(|| "DropInSDK".into());

    match settings.runtime {
        RuntimeMode::Present => resolver.register(alias, runtime),
        RuntimeMode::Scripted => {
            scripts.register_on_load(resolver.clone(), alias, runtime, Duration::from_millis(config.settle.initial_delay_ms));
        }
        RuntimeMode::Absent => {}
        RuntimeMode::Broken => scripts.fail_next_load("net::ERR_NAME_NOT_RESOLVED"),
    }

    tracing::info!(
        environment = config.environment.as_str(),
        scenario = %settings.scenario,
        amount = %settings.amount,
        currency = %settings.currency,
        runtime = ?settings.runtime,
        "Starting checkout"
    );

    let orchestrator = SessionOrchestrator::new(
        config,
        api,
        HostCapabilities {
            scripts,
            resolver,
            mount_point: mount,
        },
    )?;

    let request = match settings.scenario {
        ScenarioType::Direct => CheckoutRequest::direct(
            settings.amount,
            settings.currency.clone(),
            CardInstrument::new(&settings.card_number, "12/30", "123", "Demo Shopper"),
        ),
        ScenarioType::Redirect => CheckoutRequest::redirect(settings.amount, settings.currency.clone()),
        ScenarioType::Embedded => CheckoutRequest::embedded(settings.amount, settings.currency.clone()),
    };

    match orchestrator.submit(request).await {
        Submission::Armed { order_id } => {
            tracing::info!(order_id = %order_id, degraded = orchestrator.view().degraded, "Widget armed");
            run_widget(&orchestrator).await;
        }
        Submission::Redirect { order_id, url } => {
            tracing::info!(order_id = %order_id, "→ Redirect shopper to {}", url);
        }
        Submission::Completed { order_id } => {
            tracing::info!(order_id = %order_id, "✓ Paid without further interaction");
        }
        Submission::Rejected { message } => {
            tracing::error!("✗ Checkout rejected: {}", message);
        }
        Submission::Ignored | Submission::Abandoned => {}
    }

    let view = orchestrator.view();
    tracing::info!("Final view:\n{}", serde_json::to_string_pretty(&view)?);

    if let Some(session) = &view.session {
        match orchestrator.query_status(&session.order_id, session.scenario).await {
            Ok(status) => tracing::info!(
                order_id = %status.order_id,
                status = %status.status,
                settlement = ?status.settlement(),
                "Backend status"
            ),
            Err(message) => tracing::warn!("Status query failed: {}", message),
        }
    }

    orchestrator.teardown();
    Ok(())
}

/// Pump widget signals until the session ends, paying through the simulator
/// when the real runtime is unavailable
async fn run_widget(orchestrator: &SessionOrchestrator) {
    loop {
        let disposition = if orchestrator.view().degraded {
            tracing::info!("Paying through the fallback simulator");
            let (_, disposition) = tokio::join!(orchestrator.simulator().pay(), orchestrator.pump());
            disposition
        } else {
            orchestrator.pump().await
        };

        match disposition {
            Some(OutcomeDisposition::Stale) => continue,
            Some(OutcomeDisposition::Retried { order_id }) => {
                tracing::info!(order_id = %order_id, "↻ Duplicate order, retrying with a new order id");
            }
            Some(OutcomeDisposition::Completed) => {
                tracing::info!("✓ Payment completed");
                break;
            }
            Some(OutcomeDisposition::Cancelled) => {
                tracing::info!("Payment cancelled by shopper");
                break;
            }
            Some(OutcomeDisposition::Failed { message } | OutcomeDisposition::RetryFailed { message }) => {
                tracing::error!("✗ {}", message);
                break;
            }
            None => break,
        }
    }
}
