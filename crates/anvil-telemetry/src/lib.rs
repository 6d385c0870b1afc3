//! Anvil Telemetry
//!
//! Anonymous usage telemetry for the anvil build tool:
//! - `consent`: first-run disclosure and the awareness cookie / project property
//! - `properties`: platform, build, repository and target property facets
//! - `dispatcher`: the per-process [`Telemetry`] context sending events
//!
//! Nothing in this crate may fail a build. Public entry points on
//! [`Telemetry`] never return errors; problems switch telemetry off or drop
//! the affected event.

pub mod client;
pub mod config;
pub mod consent;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod event;
pub mod fakes;
pub mod logging;
pub mod manifest;
pub mod project;
pub mod properties;
pub mod repository;

pub use client::{ClientContext, CollectorClient, TelemetryClient};
pub use config::TelemetryConfig;
pub use consent::{
    Acknowledgement, Confirmation, ConsentState, ConsentTracker, ConsoleConfirmation,
    CURRENT_VERSION,
};
pub use dispatcher::{is_opted_out, Telemetry, TelemetryHost, KNOWN_TARGETS};
pub use environment::{Environment, ProcessEnvironment};
pub use error::{Result, TelemetryError};
pub use event::{Event, EventName, Metrics};
pub use logging::init_tracing;
pub use manifest::{BuildManifest, ExecutableTarget, ExecutionStatus, TypeName};
pub use project::ProjectFile;
pub use properties::{
    build_properties, common_properties, repository_properties, target_properties, Properties,
};
pub use repository::{GitCliInspector, RepositoryInfo, RepositoryInspector};

/// Anvil version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
