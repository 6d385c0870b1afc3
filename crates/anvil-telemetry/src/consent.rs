//! First-run telemetry awareness.
//!
//! Before anything is sent the operator must have seen the disclosure for
//! the current protocol version. Standalone tool runs record this with a
//! zero-byte cookie under the global anvil directory; project builds record
//! it as the `AnvilTelemetryVersion` project property.
//!
//! [`ConsentTracker::determine`] runs the check at most once. Every failure
//! inside the check collapses to [`ConsentState::Unknown`], which disables
//! telemetry for the run without affecting the build.

use std::fs::OpenOptions;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::environment::{global_directory, Environment};
use crate::error::{Result, TelemetryError};
use crate::project::ProjectFile;

/// Version of the collected data set. Bumping it forces re-disclosure.
pub const CURRENT_VERSION: u32 = 1;

/// Project property recording the acknowledged version.
pub const VERSION_PROPERTY: &str = "AnvilTelemetryVersion";

/// Directory below the global anvil directory holding cookies.
pub const AWARENESS_DIR: &str = "telemetry-awareness";

/// Cookie name written by the standalone `anvil-tool` launcher.
pub const LEGACY_COOKIE_NAME: &str = "anvil-tool";

/// Entry program names of test runners; cookies are never created for them.
pub const TEST_HOST_SENTINELS: &[&str] = &["testhost"];

/// Length of the metadata hash cargo appends to test harness binaries.
const HARNESS_HASH_LEN: usize = 16;

const DISCLOSURE_URL: &str = "https://anvil.build/docs/telemetry";

/// Outcome of the awareness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentState {
    /// The check failed; telemetry stays off.
    Unknown,
    /// No acknowledgement could be obtained this run.
    Declined,
    /// The operator acknowledged the given protocol version.
    Confirmed(u32),
}

impl ConsentState {
    pub fn confirmed_version(&self) -> Option<u32> {
        match self {
            ConsentState::Confirmed(version) => Some(*version),
            _ => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_version().is_some()
    }
}

/// Operator response to the acknowledgement prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Confirmed,
    Cancelled,
}

/// Blocks until the operator acknowledges the disclosure.
pub trait Confirmation: Send + Sync {
    /// Wait for acknowledgement of `action`. Implementations return
    /// [`Acknowledgement::Cancelled`] when no answer can arrive anymore.
    fn await_acknowledgement(&self, action: &str) -> Result<Acknowledgement>;
}

/// [`Confirmation`] reading Enter presses from standard input.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleConfirmation;

impl ConsoleConfirmation {
    pub fn new() -> Self {
        Self
    }

    /// Wait for an empty line on `reader`. Non-empty lines are ignored; end
    /// of input cancels.
    pub fn acknowledge_from<R: BufRead>(mut reader: R) -> Result<Acknowledgement> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(Acknowledgement::Cancelled);
            }
            if line.trim().is_empty() {
                return Ok(Acknowledgement::Confirmed);
            }
        }
    }
}

impl Confirmation for ConsoleConfirmation {
    fn await_acknowledgement(&self, _action: &str) -> Result<Acknowledgement> {
        Self::acknowledge_from(std::io::stdin().lock())
    }
}

/// Path of the awareness cookie for `name` at `version`.
pub fn cookie_path(global_dir: &Path, name: &str, version: u32) -> PathBuf {
    global_dir
        .join(AWARENESS_DIR)
        .join(format!("v{version}"))
        .join(name)
}

/// Disclosure shown before telemetry is enabled.
pub fn disclosure() -> String {
    [
        format!("Telemetry v{CURRENT_VERSION}"),
        "------------".to_string(),
        "Anvil collects anonymous usage data in order to help us improve your experience."
            .to_string(),
        String::new(),
        format!("Read more about scope, data points, and opt-out: {DISCLOSURE_URL}"),
    ]
    .join("\n")
}

/// Runs the awareness check once per tracker.
pub struct ConsentTracker {
    env: Arc<dyn Environment>,
    confirmation: Arc<dyn Confirmation>,
    disclosure_pause: Duration,
    state: OnceLock<ConsentState>,
}

impl ConsentTracker {
    pub fn new(env: Arc<dyn Environment>, confirmation: Arc<dyn Confirmation>) -> Self {
        Self {
            env,
            confirmation,
            disclosure_pause: Duration::ZERO,
            state: OnceLock::new(),
        }
    }

    /// Pause between disclosure and prompt, giving the operator time to read.
    pub fn with_disclosure_pause(mut self, pause: Duration) -> Self {
        self.disclosure_pause = pause;
        self
    }

    /// Determine consent for this run.
    ///
    /// `project_file` selects project mode; `None` means the build is driven
    /// by the standalone tool. Only the first call performs the check.
    pub fn determine(&self, project_file: Option<&Path>) -> ConsentState {
        *self
            .state
            .get_or_init(|| match self.try_determine(project_file) {
                Ok(state) => {
                    debug!(event = "telemetry.consent", state = ?state);
                    state
                }
                Err(err) => {
                    debug!(event = "telemetry.consent_failed", error = %err);
                    ConsentState::Unknown
                }
            })
    }

    /// Result of the first [`ConsentTracker::determine`] call, if any.
    pub fn state(&self) -> Option<ConsentState> {
        self.state.get().copied()
    }

    fn try_determine(&self, project_file: Option<&Path>) -> Result<ConsentState> {
        let global_dir = global_directory(self.env.as_ref())?;
        match project_file {
            None => self.check_standalone(&global_dir),
            Some(path) => self.check_project(&global_dir, path),
        }
    }

    fn check_standalone(&self, global_dir: &Path) -> Result<ConsentState> {
        let cookie_name = self
            .env
            .program_name()
            .ok_or(TelemetryError::MissingProgramName)?;
        if is_test_host(&cookie_name) {
            return Err(TelemetryError::TestHost(cookie_name));
        }

        let cookie = cookie_path(global_dir, &cookie_name, CURRENT_VERSION);
        if !cookie.exists() {
            if self.env.is_interactive() {
                let action = format!("to create awareness cookie for '{cookie_name}'");
                if self.acknowledge(&action)? == Acknowledgement::Cancelled {
                    return Ok(ConsentState::Declined);
                }
            } else {
                warn!("{}", disclosure());
            }
            touch(&cookie)?;
            debug!(event = "telemetry.cookie_created", path = %cookie.display());
        }

        Ok(ConsentState::Confirmed(CURRENT_VERSION))
    }

    fn check_project(&self, global_dir: &Path, project_file: &Path) -> Result<ConsentState> {
        let mut project = ProjectFile::parse(project_file)?;
        let expected = CURRENT_VERSION.to_string();

        if project.property(VERSION_PROPERTY).as_deref() != Some(expected.as_str()) {
            if !self.env.is_interactive() {
                warn!("{}", disclosure());
                return Ok(ConsentState::Declined);
            }

            let action = format!("to set the '{VERSION_PROPERTY}' property");
            if self.acknowledge(&action)? == Acknowledgement::Cancelled {
                return Ok(ConsentState::Declined);
            }
            project.set_property(VERSION_PROPERTY, &expected)?;
            project.save()?;
            debug!(event = "telemetry.project_updated", path = %project.path().display());
        }

        Ok(ConsentState::Confirmed(latest_legacy_version(global_dir)))
    }

    fn acknowledge(&self, action: &str) -> Result<Acknowledgement> {
        info!("{}", disclosure());
        if !self.disclosure_pause.is_zero() {
            std::thread::sleep(self.disclosure_pause);
        }
        info!("\nPress <Enter> to {action}...");
        self.confirmation.await_acknowledgement(action)
    }
}

/// Whether `program_name` belongs to a test runner: a known sentinel, or a
/// cargo test harness named `<crate>-<16 lowercase hex>`.
pub fn is_test_host(program_name: &str) -> bool {
    if TEST_HOST_SENTINELS
        .iter()
        .any(|sentinel| program_name.eq_ignore_ascii_case(sentinel))
    {
        return true;
    }
    program_name
        .rsplit_once('-')
        .is_some_and(|(stem, hash)| {
            !stem.is_empty()
                && hash.len() == HARNESS_HASH_LEN
                && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
}

/// Highest version with a legacy tool cookie, else [`CURRENT_VERSION`].
pub fn latest_legacy_version(global_dir: &Path) -> u32 {
    (1..=CURRENT_VERSION)
        .rev()
        .find(|version| cookie_path(global_dir, LEGACY_COOKIE_NAME, *version).exists())
        .unwrap_or(CURRENT_VERSION)
}

fn touch(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}
