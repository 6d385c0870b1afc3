//! Dispatcher initialization and event routing.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anvil_telemetry::config::OPT_OUT_ENV_KEY;
use anvil_telemetry::consent::{cookie_path, CURRENT_VERSION};
use anvil_telemetry::environment::HOME_ENV_KEY;
use anvil_telemetry::fakes::{
    FakeConfirmation, FakeEnvironment, FakeRepositoryInspector, RecordingClient,
};
use anvil_telemetry::properties::{
    BUILD_TYPE, OS_PLATFORM, REPOSITORY_BRANCH, REPOSITORY_PROVIDER, TARGET_DURATION, TARGET_NAME,
};
use anvil_telemetry::{
    BuildManifest, ClientContext, ConsentState, Event, EventName, ExecutableTarget,
    ExecutionStatus, Properties, RepositoryInfo, Telemetry, TelemetryClient, TelemetryConfig,
    TelemetryError, TelemetryHost,
};
use tempfile::TempDir;

struct Harness {
    home: TempDir,
    client: Arc<RecordingClient>,
    factory_calls: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        let home = tempfile::tempdir().unwrap();
        // Existing cookie: standalone consent is confirmed without prompting.
        let cookie = cookie_path(home.path(), "anvil", CURRENT_VERSION);
        std::fs::create_dir_all(cookie.parent().unwrap()).unwrap();
        std::fs::write(&cookie, b"").unwrap();
        Self {
            home,
            client: Arc::new(RecordingClient::new()),
            factory_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn env(&self) -> FakeEnvironment {
        FakeEnvironment::new()
            .with_var(HOME_ENV_KEY, self.home.path().to_str().unwrap())
            .with_platform("Linux")
    }

    fn host(&self, env: FakeEnvironment, inspector: FakeRepositoryInspector) -> TelemetryHost {
        TelemetryHost {
            environment: Arc::new(env),
            inspector: Arc::new(inspector),
            confirmation: Arc::new(FakeConfirmation::confirming()),
        }
    }

    fn telemetry(&self, host: TelemetryHost, project_file: Option<&Path>) -> Telemetry {
        let config = TelemetryConfig::new("http://127.0.0.1:1/v2/track")
            .with_disclosure_pause(Duration::ZERO);
        let client = self.client.clone();
        let calls = self.factory_calls.clone();
        Telemetry::initialize(&config, host, project_file, move |_context| {
            calls.fetch_add(1, Ordering::SeqCst);
            let client: Arc<dyn TelemetryClient> = client;
            Ok(client)
        })
    }

    fn factory_calls(&self) -> usize {
        self.factory_calls.load(Ordering::SeqCst)
    }
}

fn github_repo() -> RepositoryInfo {
    RepositoryInfo {
        endpoint: "github.com".to_string(),
        identifier: "anvil-build/anvil".to_string(),
        branch: Some("release/1.2".to_string()),
        commit: "a".repeat(40),
    }
}

fn simple_event() -> Event {
    let props: Properties = [("k", "v")].into_iter().collect();
    Event::new(EventName::BuildSetup, props)
}

#[tokio::test]
async fn confirmed_consent_builds_client_and_flushes_each_event() {
    let h = Harness::new();
    let telemetry = h.telemetry(h.host(h.env(), FakeRepositoryInspector::none()), None);

    assert_eq!(telemetry.consent(), ConsentState::Confirmed(CURRENT_VERSION));
    assert!(telemetry.is_enabled());
    assert_eq!(h.factory_calls(), 1);

    telemetry.track_event(simple_event()).await;
    telemetry.track_event(simple_event()).await;
    assert_eq!(h.client.delivered().len(), 2);
    assert!(h.client.pending().is_empty());
    assert_eq!(h.client.flushes(), 2);
}

#[tokio::test]
async fn opt_out_values_prevent_client_construction() {
    for value in ["1", "true", "TRUE", "True"] {
        let h = Harness::new();
        let env = h.env().with_var(OPT_OUT_ENV_KEY, value);
        let telemetry = h.telemetry(h.host(env, FakeRepositoryInspector::none()), None);

        assert!(telemetry.consent().is_confirmed());
        assert!(!telemetry.is_enabled(), "opt-out value {value:?}");
        assert_eq!(h.factory_calls(), 0);

        telemetry.track_event(simple_event()).await;
        assert_eq!(h.client.flushes(), 0);
    }
}

#[tokio::test]
async fn other_opt_out_values_keep_telemetry_on() {
    for value in ["0", "false", "yes"] {
        let h = Harness::new();
        let env = h.env().with_var(OPT_OUT_ENV_KEY, value);
        let telemetry = h.telemetry(h.host(env, FakeRepositoryInspector::none()), None);
        assert!(telemetry.is_enabled(), "opt-out value {value:?}");
    }
}

#[tokio::test]
async fn failed_consent_disables_everything() {
    let h = Harness::new();
    let inspector = Arc::new(FakeRepositoryInspector::with_repository(github_repo()));
    let host = TelemetryHost {
        // No home directory: the awareness check fails.
        environment: Arc::new(FakeEnvironment::new()),
        inspector: inspector.clone(),
        confirmation: Arc::new(FakeConfirmation::confirming()),
    };
    let telemetry = h.telemetry(host, None);

    assert_eq!(telemetry.consent(), ConsentState::Unknown);
    assert!(!telemetry.is_enabled());
    assert_eq!(h.factory_calls(), 0);

    let manifest = BuildManifest::new("anvil::host::Terminal");
    telemetry.track_event(simple_event()).await;
    telemetry.build_started(&manifest, Path::new("/repo")).await;
    telemetry.build_setup(Path::new("/repo")).await;
    telemetry.script_converted(Path::new("/repo")).await;
    telemetry
        .target_succeeded(
            Path::new("/repo"),
            &ExecutableTarget::new("Compile", ExecutionStatus::Succeeded, Duration::ZERO),
        )
        .await;

    assert_eq!(h.client.flushes(), 0);
    assert!(h.client.delivered().is_empty());
    assert!(inspector.opened().is_empty());
}

#[tokio::test]
async fn declined_project_consent_disables_telemetry() {
    let h = Harness::new();
    let project = h.home.path().join("build.toml");
    std::fs::write(&project, "[properties]\n").unwrap();

    let telemetry = h.telemetry(
        h.host(h.env().interactive(false), FakeRepositoryInspector::none()),
        Some(&project),
    );
    assert_eq!(telemetry.consent(), ConsentState::Declined);
    assert!(!telemetry.is_enabled());
    assert_eq!(h.factory_calls(), 0);
}

#[tokio::test]
async fn failing_client_factory_leaves_telemetry_off() {
    let h = Harness::new();
    let config = TelemetryConfig::new("http://127.0.0.1:1/v2/track");
    let telemetry = Telemetry::initialize(
        &config,
        h.host(h.env(), FakeRepositoryInspector::none()),
        None,
        |_context| Err(TelemetryError::Http("no tls backend".to_string())),
    );
    assert!(telemetry.consent().is_confirmed());
    assert!(!telemetry.is_enabled());
    telemetry.track_event(simple_event()).await;
}

#[tokio::test]
async fn client_receives_scrubbed_context() {
    let h = Harness::new();
    let config = TelemetryConfig::new("http://127.0.0.1:1/v2/track");
    let seen: Arc<Mutex<Option<ClientContext>>> = Arc::default();
    let slot = seen.clone();
    let telemetry = Telemetry::initialize(
        &config,
        h.host(h.env(), FakeRepositoryInspector::none()),
        None,
        move |context| {
            *slot.lock().unwrap() = Some(context.clone());
            let client: Arc<dyn TelemetryClient> = Arc::new(RecordingClient::with_context(context));
            Ok(client)
        },
    );
    assert!(telemetry.is_enabled());

    let context = seen.lock().unwrap().clone().unwrap();
    assert_eq!(context.ip, "N/A");
    assert_eq!(context.cloud_role_instance, "N/A");
    assert!(!context.session_id.is_empty());
}

#[tokio::test]
async fn build_started_merges_common_build_and_repository() {
    let h = Harness::new();
    let root = Path::new("/work/anvil");
    let inspector = FakeRepositoryInspector::at(root, github_repo());
    let telemetry = h.telemetry(h.host(h.env(), inspector), None);

    let mut manifest = BuildManifest::new("anvil::host::Terminal");
    manifest.project_file = Some("build/_build.toml".into());
    telemetry.build_started(&manifest, root).await;

    let delivered = h.client.delivered();
    assert_eq!(delivered.len(), 1);
    let event = &delivered[0];
    assert_eq!(event.name(), EventName::BuildStarted);
    assert_eq!(event.properties().get(OS_PLATFORM), Some("Linux"));
    assert_eq!(event.properties().get(BUILD_TYPE), Some("Project"));
    assert_eq!(event.properties().get(REPOSITORY_PROVIDER), Some("GitHub"));
    assert_eq!(event.properties().get(REPOSITORY_BRANCH), Some("release"));
    assert!(event.metrics().is_none());
}

#[tokio::test]
async fn target_succeeded_reports_only_known_succeeded_targets() {
    let h = Harness::new();
    let root = Path::new("/work/anvil");
    let telemetry = h.telemetry(h.host(h.env(), FakeRepositoryInspector::none()), None);

    let targets = [
        ExecutableTarget::new("Compile", ExecutionStatus::Succeeded, Duration::from_secs(12)),
        ExecutableTarget::new("Publish", ExecutionStatus::Succeeded, Duration::from_secs(3)),
        ExecutableTarget::new("Test", ExecutionStatus::Failed, Duration::from_secs(4)),
        ExecutableTarget::new("restore", ExecutionStatus::Succeeded, Duration::from_millis(400)),
    ];
    for target in &targets {
        telemetry.target_succeeded(root, target).await;
    }

    let delivered = h.client.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(delivered
        .iter()
        .all(|e| e.name() == EventName::TargetSucceeded));
    assert_eq!(delivered[0].properties().get(TARGET_NAME), Some("Compile"));
    assert_eq!(delivered[0].properties().get(TARGET_DURATION), Some("12"));
    assert_eq!(delivered[1].properties().get(TARGET_NAME), Some("restore"));
    assert_eq!(delivered[1].properties().get(TARGET_DURATION), Some("0"));
    // Repository failed to open: no repository keys, common keys still present.
    assert!(!delivered[0].properties().contains_key(REPOSITORY_PROVIDER));
    assert_eq!(delivered[0].properties().get(OS_PLATFORM), Some("Linux"));
}

#[tokio::test]
async fn setup_and_convert_use_working_directory() {
    let h = Harness::new();
    let cwd = Path::new("/home/dev/project");
    let inspector = Arc::new(FakeRepositoryInspector::at(cwd, github_repo()));
    let host = TelemetryHost {
        environment: Arc::new(h.env()),
        inspector: inspector.clone(),
        confirmation: Arc::new(FakeConfirmation::confirming()),
    };
    let telemetry = h.telemetry(host, None);

    telemetry.build_setup(cwd).await;
    telemetry.script_converted(cwd).await;

    let delivered = h.client.delivered();
    let names: Vec<_> = delivered.iter().map(Event::name).collect();
    assert_eq!(names, vec![EventName::BuildSetup, EventName::ScriptConverted]);
    for event in &delivered {
        assert_eq!(event.properties().get(REPOSITORY_PROVIDER), Some("GitHub"));
        assert!(!event.properties().contains_key(BUILD_TYPE));
    }
    assert_eq!(inspector.opened(), vec![cwd.to_path_buf(), cwd.to_path_buf()]);
}
