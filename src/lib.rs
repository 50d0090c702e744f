//! VIGIL - Alarm Incident Lifecycle & Cross-Tier Cancellation Coordinator
//!
//! The incident-coordination core of a smart-home hub platform backend.
//! VIGIL creates, updates, verifies and cancels one security/life-safety
//! incident per place, reconciling state tracked independently by the home
//! hub and the cloud platform, and coordinating a third-party monitoring
//! station through correlated, time-boxed requests instead of blocking
//! calls.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil::{
//!     AlertType, ChannelBus, IncidentConfig, IncidentDispatcher, IncidentTrigger,
//!     MemoryIncidentStore, NullHistorySink, PlaceContext, PlaceDirectory, TriggerEvent,
//! };
//!
//! # async fn demo() -> vigil::Result<()> {
//! let (bus, _events, _requests) = ChannelBus::new();
//! let places = Arc::new(PlaceDirectory::new());
//! let dispatcher = IncidentDispatcher::new(
//!     Arc::new(MemoryIncidentStore::new()),
//!     Arc::new(bus),
//!     Arc::new(NullHistorySink),
//!     IncidentConfig::default(),
//!     Arc::clone(&places),
//! );
//!
//! let ctx = Arc::new(PlaceContext::new(uuid::Uuid::new_v4(), "general"));
//! places.insert(Arc::clone(&ctx));
//!
//! let trigger = IncidentTrigger::new(AlertType::Smoke, TriggerEvent::Smoke, "dev:1");
//! let address = dispatcher.add_alert(&ctx, AlertType::Smoke, &[trigger], true).await?;
//! println!("incident open at {address}");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Structured error handling with typed request failures
pub mod error;

/// Configuration management with YAML support and per-field defaults
pub mod config;

/// Incident entity, lifecycle enums and the copy-and-override builder
pub mod incident;

/// Triggering events attached to incidents
pub mod trigger;

/// Per-place execution context and the place directory
pub mod context;

/// Durable incident storage boundary
pub mod store;

/// Message bus boundary: broadcasts, alarm-service requests, responses
pub mod bus;

/// Pending-cancel map: the async cancel-with-timeout primitive
pub mod correlation;

/// History sink boundary
pub mod history;

/// The incident services and their dispatcher
pub mod service;

// ============================================================================
// PUBLIC RE-EXPORTS
// ============================================================================

pub use bus::{
    AlarmServiceRequest, CancelMethod, ChannelBus, IncidentEvent, MessageBus, MonitoringMessage,
    RemoteError,
};
pub use config::IncidentConfig;
pub use context::{AlarmProvider, HubModel, PlaceContext, PlaceDirectory};
pub use correlation::{PendingCancel, PendingCancels};
pub use error::{IncidentError, Result};
pub use history::{HistorySink, NullHistorySink};
pub use incident::{
    AlarmIncident, AlertState, AlertType, IncidentAddress, IncidentBuilder, MonitoringState,
    TrackerEvent, TrackerState,
};
pub use service::{
    CancelDisposition, HubIncidentService, IncidentDispatcher, IncidentService,
    MockIncidentService, PlatformIncidentService, ServiceCore,
};
pub use store::{IncidentStore, MemoryIncidentStore};
pub use trigger::{IncidentTrigger, TriggerEvent};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging for the binary and long-running deployments.
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if subscriber.try_init().is_err() {
        // Already initialized, ignore error
    }
}
