//! Anvil - command-line host for build telemetry
//!
//! The `anvil` command drives the telemetry library the way the build tool
//! does at runtime.
//!
//! ## Commands
//!
//! - `setup`: report that build setup ran in a directory
//! - `convert`: report that a legacy build script was converted
//! - `build`: report a build described by a manifest file
//! - `status`: show the awareness and opt-out state without changing it

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use anvil_telemetry::config::OPT_OUT_ENV_KEY;
use anvil_telemetry::consent::{cookie_path, latest_legacy_version, VERSION_PROPERTY};
use anvil_telemetry::environment::global_directory;
use anvil_telemetry::{
    is_opted_out, BuildManifest, Environment, ProcessEnvironment, ProjectFile, Telemetry,
    TelemetryConfig, CURRENT_VERSION,
};

#[derive(Parser)]
#[command(name = "anvil")]
#[command(author = "Anvil Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Anvil build tool telemetry host", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report that build setup ran
    Setup {
        /// Working directory (default: current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Report that a legacy build script was converted
    Convert {
        /// Working directory (default: current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Report a build described by a manifest
    Build {
        /// Path to the build manifest (JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Build root directory
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },

    /// Show telemetry awareness state
    Status {
        /// Project file to inspect instead of the standalone cookie
        #[arg(short, long)]
        project: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    anvil_telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Setup { dir } => {
            let dir = working_dir(dir)?;
            cmd_setup(&init_telemetry(None).await?, &dir).await
        }
        Commands::Convert { dir } => {
            let dir = working_dir(dir)?;
            cmd_convert(&init_telemetry(None).await?, &dir).await
        }
        Commands::Build { manifest, root } => {
            let manifest = load_manifest(&manifest)?;
            let telemetry = init_telemetry(manifest.project_file.clone()).await?;
            cmd_build(&telemetry, &manifest, &root).await
        }
        Commands::Status { project } => {
            let report = status_report(
                &ProcessEnvironment::new(),
                &TelemetryConfig::from_env(),
                project.as_deref(),
            )?;
            print_status(&report, cli.json)
        }
    }
}

/// Run the awareness check off the async workers; it may pause and wait on
/// stdin for the operator.
async fn init_telemetry(project_file: Option<PathBuf>) -> Result<Telemetry> {
    tokio::task::spawn_blocking(move || Telemetry::from_env(project_file.as_deref()))
        .await
        .context("Telemetry initialization panicked")
}

fn working_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("Failed to resolve current directory"),
    }
}

fn load_manifest(path: &Path) -> Result<BuildManifest> {
    BuildManifest::load(path).with_context(|| format!("Failed to load manifest {:?}", path))
}

async fn cmd_setup(telemetry: &Telemetry, dir: &Path) -> Result<()> {
    telemetry.build_setup(dir).await;
    info!(dir = %dir.display(), enabled = telemetry.is_enabled(), "setup reported");
    Ok(())
}

async fn cmd_convert(telemetry: &Telemetry, dir: &Path) -> Result<()> {
    telemetry.script_converted(dir).await;
    info!(dir = %dir.display(), enabled = telemetry.is_enabled(), "conversion reported");
    Ok(())
}

async fn cmd_build(telemetry: &Telemetry, manifest: &BuildManifest, root: &Path) -> Result<()> {
    telemetry.build_started(manifest, root).await;
    for target in &manifest.executable_targets {
        telemetry.target_succeeded(root, target).await;
    }
    info!(
        targets = manifest.executable_targets.len(),
        enabled = telemetry.is_enabled(),
        "build reported"
    );
    Ok(())
}

/// Read-only snapshot of the awareness state.
#[derive(Debug, Serialize)]
struct StatusReport {
    current_version: u32,
    global_directory: PathBuf,
    /// Standalone cookie path, or the project file inspected.
    marker: PathBuf,
    acknowledged: bool,
    /// Version a confirmed project build reports.
    legacy_version: u32,
    opted_out: bool,
    endpoint: String,
}

fn status_report(
    env: &dyn Environment,
    config: &TelemetryConfig,
    project: Option<&Path>,
) -> Result<StatusReport> {
    let global_dir = global_directory(env)?;
    let (marker, acknowledged) = match project {
        Some(path) => {
            let file = ProjectFile::parse(path)?;
            let expected = CURRENT_VERSION.to_string();
            let acknowledged =
                file.property(VERSION_PROPERTY).as_deref() == Some(expected.as_str());
            (path.to_path_buf(), acknowledged)
        }
        None => {
            let name = env
                .program_name()
                .context("Failed to determine program name")?;
            let cookie = cookie_path(&global_dir, &name, CURRENT_VERSION);
            let acknowledged = cookie.is_file();
            (cookie, acknowledged)
        }
    };

    Ok(StatusReport {
        current_version: CURRENT_VERSION,
        legacy_version: latest_legacy_version(&global_dir),
        global_directory: global_dir,
        marker,
        acknowledged,
        opted_out: is_opted_out(env.var(OPT_OUT_ENV_KEY).as_deref()),
        endpoint: config.endpoint.clone(),
    })
}

fn print_status(report: &StatusReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", render_status(report));
    }
    Ok(())
}

fn render_status(report: &StatusReport) -> String {
    let marker_state = if report.acknowledged {
        "acknowledged"
    } else {
        "pending"
    };
    [
        format!("Telemetry version: v{}", report.current_version),
        format!("Global directory:  {}", report.global_directory.display()),
        format!(
            "Awareness marker:  {} ({marker_state})",
            report.marker.display()
        ),
        format!("Legacy version:    v{}", report.legacy_version),
        format!("Opted out:         {}", report.opted_out),
        format!("Endpoint:          {}", report.endpoint),
    ]
    .iter()
    .map(|line| format!("{line}\n"))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_telemetry::environment::HOME_ENV_KEY;
    use anvil_telemetry::fakes::{
        FakeConfirmation, FakeEnvironment, FakeRepositoryInspector, RecordingClient,
    };
    use anvil_telemetry::properties::{BUILD_TYPE, TARGET_NAME};
    use anvil_telemetry::{EventName, TelemetryClient, TelemetryHost};
    use std::sync::Arc;

    fn confirmed_env(home: &Path) -> FakeEnvironment {
        let cookie = cookie_path(home, "anvil", CURRENT_VERSION);
        std::fs::create_dir_all(cookie.parent().unwrap()).unwrap();
        std::fs::write(&cookie, b"").unwrap();
        FakeEnvironment::new().with_var(HOME_ENV_KEY, home.to_str().unwrap())
    }

    fn recording_telemetry(env: FakeEnvironment, client: &Arc<RecordingClient>) -> Telemetry {
        let host = TelemetryHost {
            environment: Arc::new(env),
            inspector: Arc::new(FakeRepositoryInspector::none()),
            confirmation: Arc::new(FakeConfirmation::cancelling()),
        };
        let client = client.clone();
        Telemetry::initialize(
            &TelemetryConfig::new("http://127.0.0.1:1/v2/track"),
            host,
            None,
            move |_| {
                let client: Arc<dyn TelemetryClient> = client;
                Ok(client)
            },
        )
    }

    #[test]
    fn test_cli_parses_build_command() {
        let cli = Cli::try_parse_from([
            "anvil", "--verbose", "build", "--manifest", "m.json", "--root", "/src",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Build { manifest, root } => {
                assert_eq!(manifest, PathBuf::from("m.json"));
                assert_eq!(root, PathBuf::from("/src"));
            }
            _ => panic!("expected build command"),
        }
    }

    #[test]
    fn test_load_manifest_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = load_manifest(&path).unwrap_err();
        assert!(format!("{err:#}").contains("missing.json"));
    }

    #[tokio::test]
    async fn test_cmd_build_reports_manifest() {
        let home = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::new());
        let telemetry = recording_telemetry(confirmed_env(home.path()), &client);

        let manifest_path = home.path().join("manifest.json");
        std::fs::write(
            &manifest_path,
            r#"{
                "host": "anvil::host::Terminal",
                "executable_targets": [
                    {"name": "Compile", "status": "succeeded", "duration_secs": 3.2},
                    {"name": "Test", "status": "failed", "duration_secs": 1.0}
                ]
            }"#,
        )
        .unwrap();
        let manifest = load_manifest(&manifest_path).unwrap();

        cmd_build(&telemetry, &manifest, home.path()).await.unwrap();

        let delivered = client.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].name(), EventName::BuildStarted);
        assert_eq!(
            delivered[0].properties().get(BUILD_TYPE),
            Some("Standalone Tool")
        );
        assert_eq!(delivered[1].name(), EventName::TargetSucceeded);
        assert_eq!(delivered[1].properties().get(TARGET_NAME), Some("Compile"));
    }

    #[tokio::test]
    async fn test_cmd_setup_without_consent_sends_nothing() {
        let home = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::new());
        let env = FakeEnvironment::new()
            .with_var(HOME_ENV_KEY, home.path().to_str().unwrap())
            .with_program_name("testhost");
        let telemetry = recording_telemetry(env, &client);

        cmd_setup(&telemetry, home.path()).await.unwrap();
        cmd_convert(&telemetry, home.path()).await.unwrap();
        assert_eq!(client.flushes(), 0);
    }

    #[test]
    fn test_status_report_standalone_is_read_only() {
        let home = tempfile::tempdir().unwrap();
        let env = FakeEnvironment::new()
            .with_var(HOME_ENV_KEY, home.path().to_str().unwrap())
            .with_var(OPT_OUT_ENV_KEY, "true");
        let config = TelemetryConfig::new("https://collector.example/v2/track");

        let report = status_report(&env, &config, None).unwrap();
        assert!(!report.acknowledged);
        assert!(report.opted_out);
        assert_eq!(report.marker, cookie_path(home.path(), "anvil", CURRENT_VERSION));
        assert!(!report.marker.exists());
        assert_eq!(report.endpoint, "https://collector.example/v2/track");
    }

    #[test]
    fn test_render_status_lists_every_field() {
        let report = StatusReport {
            current_version: 1,
            global_directory: PathBuf::from("/home/dev/.anvil"),
            marker: PathBuf::from("/home/dev/.anvil/telemetry-awareness/v1/anvil"),
            acknowledged: true,
            legacy_version: 1,
            opted_out: false,
            endpoint: "https://collector.example/v2/track".to_string(),
        };
        let text = render_status(&report);
        assert_eq!(text.lines().count(), 6);
        assert!(text.contains("Telemetry version: v1\n"));
        assert!(text.contains("(acknowledged)"));
        assert!(text.contains("Legacy version:    v1\n"));
        assert!(text.contains("Opted out:         false\n"));
        assert!(text.ends_with("Endpoint:          https://collector.example/v2/track\n"));
    }

    #[tokio::test]
    async fn test_init_telemetry_runs_off_the_async_workers() {
        // Under the test harness the awareness check reports no consent.
        let telemetry = init_telemetry(None).await.unwrap();
        assert_eq!(telemetry.consent(), anvil_telemetry::ConsentState::Unknown);
        assert!(!telemetry.is_enabled());
    }

    #[test]
    fn test_status_report_reads_project_property() {
        let home = tempfile::tempdir().unwrap();
        let project = home.path().join("build.toml");
        std::fs::write(&project, "[properties]\nAnvilTelemetryVersion = \"1\"\n").unwrap();
        let env = FakeEnvironment::new().with_var(HOME_ENV_KEY, home.path().to_str().unwrap());

        let report = status_report(
            &env,
            &TelemetryConfig::new("http://127.0.0.1:1"),
            Some(&project),
        )
        .unwrap();
        assert!(report.acknowledged);
        assert!(!report.opted_out);
        assert_eq!(report.legacy_version, CURRENT_VERSION);
    }
}
