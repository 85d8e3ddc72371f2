//! # checkout-core
//!
//! Lifecycle of an embedded third-party payment widget inside a checkout view.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      SessionOrchestrator                         │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌────────────────────┐  │
//! │  │ WidgetLoader │  │InstanceController│  │    PaymentApi      │  │
//! │  │ (script +    │──│ (single slot,    │──│    (Strategy)      │  │
//! │  │  settle)     │  │  tagged signals) │  │                    │  │
//! │  └──────┬───────┘  └──────────────────┘  └────────────────────┘  │
//! │         │ degraded                                               │
//! │  ┌──────▼────────────┐  ┌──────────────────┐  ┌──────────────┐   │
//! │  │ FallbackSimulator │  │ OrderIdGenerator │  │  Duplicate   │   │
//! │  │                   │  │                  │  │  Classifier  │   │
//! │  └───────────────────┘  └──────────────────┘  └──────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Browser capabilities (script injection, the runtime's global, the DOM
//! mount point) sit behind traits; [`host`] has in-memory versions of them.

pub mod classify;
pub mod config;
pub mod error;
pub mod host;
pub mod order_id;
pub mod orchestrator;
pub mod payment;
pub mod session;
pub mod widget;

pub use classify::{DuplicateOrderClassifier, FailureClass};
pub use config::{CheckoutConfig, Environment, SettlePolicy, SimulatorConfig};
pub use error::{CheckoutError, Result};
pub use order_id::OrderIdGenerator;
pub use orchestrator::{
    CheckoutOutcome, CheckoutRequest, CheckoutView, HostCapabilities, Notice, NoticeLevel,
    OutcomeDisposition, SessionOrchestrator, Submission,
};
pub use payment::{
    CardInstrument, DirectPaymentResponse, InteractionResponse, MockPaymentApi, OrderRequest,
    PaymentApi, PaymentStatus, SettlementState,
};
pub use session::{OrderId, ScenarioType, Session, SessionStatus};
pub use widget::controller::MountPoint;
pub use widget::{
    FallbackSimulator, InstanceController, MountId, OutcomeKind, RuntimeAvailability,
    WidgetLoader, WidgetRuntime, WidgetSignal,
};
