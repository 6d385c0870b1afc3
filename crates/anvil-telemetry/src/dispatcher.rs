//! Event dispatch.
//!
//! [`Telemetry`] is built once at program entry and passed to the call sites
//! that report events. It decides a single time whether a live client
//! exists; without one every operation returns immediately.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::client::{ClientContext, CollectorClient, TelemetryClient};
use crate::config::{TelemetryConfig, OPT_OUT_ENV_KEY};
use crate::consent::{Confirmation, ConsentState, ConsentTracker, ConsoleConfirmation};
use crate::environment::{Environment, ProcessEnvironment};
use crate::error::Result;
use crate::event::{Event, EventName};
use crate::manifest::{BuildManifest, ExecutableTarget, ExecutionStatus};
use crate::properties::{
    build_properties, common_properties, repository_properties, target_properties,
};
use crate::repository::{GitCliInspector, RepositoryInspector};

/// Targets whose success is reported.
pub const KNOWN_TARGETS: &[&str] = &["Restore", "Compile", "Test"];

/// Whether an opt-out value disables telemetry: `1` or any casing of `true`.
pub fn is_opted_out(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Collaborators the telemetry subsystem needs from its host.
#[derive(Clone)]
pub struct TelemetryHost {
    pub environment: Arc<dyn Environment>,
    pub inspector: Arc<dyn RepositoryInspector>,
    pub confirmation: Arc<dyn Confirmation>,
}

impl TelemetryHost {
    /// Host backed by the real process, `git` and the console.
    pub fn process() -> Self {
        Self {
            environment: Arc::new(ProcessEnvironment::new()),
            inspector: Arc::new(GitCliInspector::new()),
            confirmation: Arc::new(ConsoleConfirmation::new()),
        }
    }
}

/// Telemetry context for one process.
pub struct Telemetry {
    consent: ConsentState,
    client: Option<Arc<dyn TelemetryClient>>,
    environment: Arc<dyn Environment>,
    inspector: Arc<dyn RepositoryInspector>,
}

impl Telemetry {
    /// Run the awareness check and, if allowed, build a client.
    ///
    /// `make_client` is only invoked when consent is confirmed and the
    /// operator has not opted out. A failing factory leaves telemetry off.
    pub fn initialize<F>(
        config: &TelemetryConfig,
        host: TelemetryHost,
        project_file: Option<&Path>,
        make_client: F,
    ) -> Self
    where
        F: FnOnce(ClientContext) -> Result<Arc<dyn TelemetryClient>>,
    {
        let tracker = ConsentTracker::new(host.environment.clone(), host.confirmation.clone())
            .with_disclosure_pause(config.disclosure_pause);
        let consent = tracker.determine(project_file);
        let opted_out = is_opted_out(host.environment.var(OPT_OUT_ENV_KEY).as_deref());

        let client = if consent.is_confirmed() && !opted_out {
            match make_client(ClientContext::scrubbed()) {
                Ok(client) => Some(client),
                Err(err) => {
                    debug!(event = "telemetry.client_failed", error = %err);
                    None
                }
            }
        } else {
            None
        };

        debug!(
            event = "telemetry.initialized",
            consent = ?consent,
            opted_out = opted_out,
            enabled = client.is_some(),
        );

        Self {
            consent,
            client,
            environment: host.environment,
            inspector: host.inspector,
        }
    }

    /// Initialize for the real process, sending to the configured collector.
    pub fn from_env(project_file: Option<&Path>) -> Self {
        let config = TelemetryConfig::from_env();
        Self::initialize(&config, TelemetryHost::process(), project_file, |context| {
            let client: Arc<dyn TelemetryClient> =
                Arc::new(CollectorClient::new(&config, context)?);
            Ok(client)
        })
    }

    pub fn consent(&self) -> ConsentState {
        self.consent
    }

    /// Whether events are actually sent.
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Send one event and flush immediately. No-op without a live client.
    pub async fn track_event(&self, event: Event) {
        let Some(client) = &self.client else {
            return;
        };
        debug!(
            event = "telemetry.track",
            name = %event.name(),
            properties = event.properties().len()
        );
        client.track(event);
        client.flush().await;
    }

    /// Report that a build started in `root_dir`.
    pub async fn build_started(&self, manifest: &BuildManifest, root_dir: &Path) {
        if !self.is_enabled() {
            return;
        }
        let properties = common_properties(self.environment.as_ref())
            .merge(build_properties(
                self.environment.as_ref(),
                manifest,
                Utc::now(),
            ))
            .merge(repository_properties(self.inspector.as_ref(), root_dir));
        self.track_event(Event::new(EventName::BuildStarted, properties))
            .await;
    }

    /// Report a succeeded well-known target; other targets are ignored.
    pub async fn target_succeeded(&self, root_dir: &Path, target: &ExecutableTarget) {
        if !self.is_enabled() || !is_reported_target(target) {
            return;
        }
        let properties = common_properties(self.environment.as_ref())
            .merge(repository_properties(self.inspector.as_ref(), root_dir))
            .merge(target_properties(target));
        self.track_event(Event::new(EventName::TargetSucceeded, properties))
            .await;
    }

    /// Report that build setup ran in `working_dir`.
    pub async fn build_setup(&self, working_dir: &Path) {
        self.track_working_directory(EventName::BuildSetup, working_dir)
            .await;
    }

    /// Report that a legacy build script was converted in `working_dir`.
    pub async fn script_converted(&self, working_dir: &Path) {
        self.track_working_directory(EventName::ScriptConverted, working_dir)
            .await;
    }

    async fn track_working_directory(&self, name: EventName, working_dir: &Path) {
        if !self.is_enabled() {
            return;
        }
        let properties = common_properties(self.environment.as_ref())
            .merge(repository_properties(self.inspector.as_ref(), working_dir));
        self.track_event(Event::new(name, properties)).await;
    }
}

fn is_reported_target(target: &ExecutableTarget) -> bool {
    target.status == ExecutionStatus::Succeeded
        && KNOWN_TARGETS
            .iter()
            .any(|known| target.name.eq_ignore_ascii_case(known))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_opt_out_values() {
        assert!(is_opted_out(Some("1")));
        assert!(is_opted_out(Some("true")));
        assert!(is_opted_out(Some("TRUE")));
        assert!(is_opted_out(Some("True")));
        assert!(!is_opted_out(Some("0")));
        assert!(!is_opted_out(Some("yes")));
        assert!(!is_opted_out(Some(" true")));
        assert!(!is_opted_out(Some("")));
        assert!(!is_opted_out(None));
    }

    #[test]
    fn test_reported_targets_filter() {
        let ok =
            |name: &str| ExecutableTarget::new(name, ExecutionStatus::Succeeded, Duration::ZERO);
        assert!(is_reported_target(&ok("Compile")));
        assert!(is_reported_target(&ok("restore")));
        assert!(is_reported_target(&ok("TEST")));
        assert!(!is_reported_target(&ok("Publish")));

        let failed = ExecutableTarget::new("Compile", ExecutionStatus::Failed, Duration::ZERO);
        assert!(!is_reported_target(&failed));
        let skipped = ExecutableTarget::new("Test", ExecutionStatus::Skipped, Duration::ZERO);
        assert!(!is_reported_target(&skipped));
    }
}
