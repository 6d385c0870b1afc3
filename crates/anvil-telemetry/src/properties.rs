//! Property dictionaries attached to telemetry events.
//!
//! Each producer describes one facet of a run: the platform, the build, the
//! repository it lives in, or a single target. Call sites merge the facets
//! relevant to the event they send. Key sets are disjoint by convention;
//! on collision the later merge wins.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::config::{START_TIME_ENV_KEY, TOOL_VERSION_ENV_KEY};
use crate::environment::Environment;
use crate::manifest::{BuildManifest, ExecutableTarget, BASE_COMPONENT};
use crate::repository::RepositoryInspector;

pub const OS_PLATFORM: &str = "OS Platform";

pub const REPOSITORY_PROVIDER: &str = "Repository Provider";
pub const REPOSITORY_BRANCH: &str = "Repository Branch";
pub const REPOSITORY_URL: &str = "Repository URL";
pub const REPOSITORY_COMMIT: &str = "Repository Commit";

pub const COMPILE_TIME: &str = "Compile Time (seconds)";
pub const TARGET_FRAMEWORK: &str = "Target Framework";
pub const ANVIL_VERSION: &str = "Version of Anvil";
pub const TOOL_VERSION: &str = "Version of Anvil Tool";
pub const HOST: &str = "Host";
pub const BUILD_TYPE: &str = "Build Type";
pub const EXECUTABLE_TARGETS: &str = "Number of Executable Targets";
pub const CUSTOM_EXTENSIONS: &str = "Number of Custom Extensions";
pub const CUSTOM_COMPONENTS: &str = "Number of Custom Components";
pub const CONFIGURATION_GENERATORS: &str = "Configuration Generators";
pub const BUILD_COMPONENTS: &str = "Build Components";

pub const TARGET_NAME: &str = "Target Name";
pub const TARGET_DURATION: &str = "Target Duration";

/// Suffix trimmed from framework configuration generator names.
const GENERATOR_SUFFIX: &str = "Generator";

/// Flat string-to-string property map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Insert `value` if present; absent values leave no key behind.
    pub fn insert_opt(&mut self, key: &str, value: Option<impl Into<String>>) {
        if let Some(value) = value {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge `other` into `self`; keys of `other` overwrite.
    pub fn merge(mut self, other: Properties) -> Self {
        self.0.extend(other.0);
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Properties(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// First six hex characters of the SHA-256 digest of `value`.
pub fn short_hash(value: &str) -> String {
    let digest = hex::encode(Sha256::digest(value.as_bytes()));
    digest[..6].to_string()
}

/// Properties shared by every event.
pub fn common_properties(env: &dyn Environment) -> Properties {
    let mut props = Properties::new();
    props.insert(OS_PLATFORM, env.platform());
    props
}

/// Repository facet for `directory`; empty when it is not a usable repository.
pub fn repository_properties(inspector: &dyn RepositoryInspector, directory: &Path) -> Properties {
    let repository = match inspector.open(directory) {
        Ok(repository) => repository,
        Err(err) => {
            trace!(directory = %directory.display(), error = %err, "no repository properties");
            return Properties::new();
        }
    };

    let mut props = Properties::new();
    props.insert_opt(REPOSITORY_PROVIDER, repository.provider());
    props.insert_opt(REPOSITORY_BRANCH, repository.branch_class());
    props.insert(REPOSITORY_URL, short_hash(&repository.ssh_url()));
    props.insert(REPOSITORY_COMMIT, short_hash(&repository.commit));
    props
}

/// Build facet: timing, versions, host and the shape of the build manifest.
pub fn build_properties(
    env: &dyn Environment,
    manifest: &BuildManifest,
    now: DateTime<Utc>,
) -> Properties {
    let compile_time = env
        .var(START_TIME_ENV_KEY)
        .and_then(|value| parse_start_time(&value))
        .map(|start| whole_seconds((now - start).num_milliseconds() as f64 / 1000.0));

    let build_type = if manifest.project_file.is_some() {
        "Project"
    } else {
        "Standalone Tool"
    };

    let generators: BTreeSet<&str> = manifest
        .configuration_generators
        .iter()
        .map(|g| g.reported_name_without(GENERATOR_SUFFIX))
        .collect();

    let components: BTreeSet<&str> = manifest
        .components
        .iter()
        .filter(|c| c.is_framework() && c.as_str() != BASE_COMPONENT)
        .map(|c| c.simple_name())
        .collect();

    let mut props = Properties::new();
    props.insert_opt(COMPILE_TIME, compile_time);
    props.insert(TARGET_FRAMEWORK, env.target_framework());
    props.insert(ANVIL_VERSION, crate::VERSION);
    props.insert_opt(TOOL_VERSION, env.var(TOOL_VERSION_ENV_KEY));
    props.insert(HOST, manifest.host.reported_name());
    props.insert(BUILD_TYPE, build_type);
    props.insert(
        EXECUTABLE_TARGETS,
        manifest.executable_targets.len().to_string(),
    );
    props.insert(
        CUSTOM_EXTENSIONS,
        manifest
            .extensions
            .iter()
            .filter(|e| e.is_custom())
            .count()
            .to_string(),
    );
    props.insert(
        CUSTOM_COMPONENTS,
        manifest
            .components
            .iter()
            .filter(|c| c.is_custom())
            .count()
            .to_string(),
    );
    props.insert(
        CONFIGURATION_GENERATORS,
        generators.into_iter().collect::<Vec<_>>().join(", "),
    );
    props.insert(
        BUILD_COMPONENTS,
        components.into_iter().collect::<Vec<_>>().join(", "),
    );
    props
}

/// Target facet: name and duration.
pub fn target_properties(target: &ExecutableTarget) -> Properties {
    let mut props = Properties::new();
    props.insert(TARGET_NAME, target.name.as_str());
    props.insert(TARGET_DURATION, whole_seconds(target.duration.as_secs_f64()));
    props
}

/// Parse the launcher start time: RFC 3339, or a naive local timestamp.
pub fn parse_start_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|time| time.with_timezone(&Utc))
}

fn whole_seconds(secs: f64) -> String {
    format!("{}", secs.round() as i64)
}
