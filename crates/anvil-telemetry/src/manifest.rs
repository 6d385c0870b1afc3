//! Build manifest supplied by the build engine.
//!
//! The engine declares which targets, extensions, components and
//! configuration generators a build uses. Telemetry only ever reports
//! framework-owned type names verbatim; anything else collapses to
//! [`CUSTOM_LABEL`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Namespace prefix of framework-owned types.
pub const FRAMEWORK_PREFIX: &str = "anvil::";

/// Reported in place of any non-framework type name.
pub const CUSTOM_LABEL: &str = "<Custom>";

/// Component every build implements; never reported.
pub const BASE_COMPONENT: &str = "anvil::Build";

/// Fully-qualified type name, e.g. `anvil::ci::GitHubActionsGenerator`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(String);

impl TypeName {
    pub fn new(name: impl Into<String>) -> Self {
        TypeName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the type belongs to the framework namespace.
    pub fn is_framework(&self) -> bool {
        self.0.starts_with(FRAMEWORK_PREFIX)
    }

    pub fn is_custom(&self) -> bool {
        !self.is_framework()
    }

    /// Last path segment.
    pub fn simple_name(&self) -> &str {
        self.0.rsplit("::").next().unwrap_or(&self.0)
    }

    /// Name safe to report: the simple name for framework types, else
    /// [`CUSTOM_LABEL`].
    pub fn reported_name(&self) -> &str {
        if self.is_framework() {
            self.simple_name()
        } else {
            CUSTOM_LABEL
        }
    }

    /// Like [`TypeName::reported_name`], with `suffix` trimmed from
    /// framework names.
    pub fn reported_name_without(&self, suffix: &str) -> &str {
        let name = self.reported_name();
        if self.is_framework() {
            name.strip_suffix(suffix)
                .filter(|n| !n.is_empty())
                .unwrap_or(name)
        } else {
            name
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(name: &str) -> Self {
        TypeName::new(name)
    }
}

/// Execution status of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    NotRun,
    Skipped,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

/// A target scheduled for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableTarget {
    pub name: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default, rename = "duration_secs", with = "duration_secs")]
    pub duration: Duration,
}

impl ExecutableTarget {
    pub fn new(name: &str, status: ExecutionStatus, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            status,
            duration,
        }
    }
}

/// Static description of a build, in place of runtime reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    #[serde(default)]
    pub executable_targets: Vec<ExecutableTarget>,
    /// Extension objects attached to the build.
    #[serde(default)]
    pub extensions: Vec<TypeName>,
    /// Capability components implemented by the build.
    #[serde(default)]
    pub components: Vec<TypeName>,
    /// Generators producing CI configuration files.
    #[serde(default)]
    pub configuration_generators: Vec<TypeName>,
    /// Host the build runs under, e.g. `anvil::host::Terminal`.
    pub host: TypeName,
    /// Build project file; `None` when driven by the standalone tool.
    #[serde(default)]
    pub project_file: Option<PathBuf>,
}

impl BuildManifest {
    pub fn new(host: impl Into<TypeName>) -> Self {
        Self {
            executable_targets: Vec::new(),
            extensions: Vec::new(),
            components: Vec::new(),
            configuration_generators: Vec::new(),
            host: host.into(),
            project_file: None,
        }
    }

    /// Load a manifest from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
