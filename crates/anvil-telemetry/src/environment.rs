//! Read-only access to the process environment.
//!
//! Everything the telemetry subsystem learns about its host goes through the
//! [`Environment`] trait so tests can substitute a fixed view (see
//! [`crate::fakes::FakeEnvironment`]).

use std::io::IsTerminal;
use std::path::PathBuf;

use crate::error::{Result, TelemetryError};

/// Environment variable overriding the global anvil directory.
pub const HOME_ENV_KEY: &str = "ANVIL_HOME";

/// Directory name below the user's home used when `ANVIL_HOME` is unset.
pub const GLOBAL_DIR_NAME: &str = ".anvil";

/// Key/value and platform lookups for the current process.
pub trait Environment: Send + Sync {
    /// Look up an environment variable. Empty values count as unset.
    fn var(&self, key: &str) -> Option<String>;

    /// Human-readable operating system family, e.g. `Linux`.
    fn platform(&self) -> String;

    /// Identifier of the platform the tool was compiled for.
    fn target_framework(&self) -> String;

    /// Name of the entry program, without directory or extension.
    fn program_name(&self) -> Option<String>;

    /// Whether an operator can answer prompts on this console.
    fn is_interactive(&self) -> bool;

    fn home_dir(&self) -> Option<PathBuf> {
        self.var("HOME")
            .or_else(|| self.var("USERPROFILE"))
            .map(PathBuf::from)
    }
}

/// Resolve the global anvil directory: `ANVIL_HOME`, else `<home>/.anvil`.
pub fn global_directory(env: &dyn Environment) -> Result<PathBuf> {
    if let Some(dir) = env.var(HOME_ENV_KEY) {
        return Ok(PathBuf::from(dir));
    }
    env.home_dir()
        .map(|home| home.join(GLOBAL_DIR_NAME))
        .ok_or(TelemetryError::NoHomeDirectory)
}

/// [`Environment`] backed by the real process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl ProcessEnvironment {
    pub fn new() -> Self {
        Self
    }
}

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }

    fn platform(&self) -> String {
        platform_family(std::env::consts::OS).to_string()
    }

    fn target_framework(&self) -> String {
        format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
    }

    fn program_name(&self) -> Option<String> {
        std::env::current_exe()
            .ok()
            .or_else(|| std::env::args_os().next().map(PathBuf::from))
            .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
    }

    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
    }
}

/// Map `std::env::consts::OS` onto the platform names reported upstream.
pub fn platform_family(os: &str) -> &str {
    match os {
        "windows" => "Windows",
        "macos" => "OSX",
        "linux" => "Linux",
        "freebsd" | "openbsd" | "netbsd" | "dragonfly" => "Unix",
        other => other,
    }
}
