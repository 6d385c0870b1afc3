//! Git repository inspection.
//!
//! [`RepositoryInspector`] opens a directory as a repository and returns a
//! [`RepositoryInfo`] snapshot: remote endpoint and identifier, current
//! branch and HEAD commit. The classifications reported in telemetry
//! (hosting provider, branch class) are derived from that snapshot.

use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, TelemetryError};

/// Hosting providers matched by endpoint substring, in priority order.
const PROVIDERS: &[(&str, &str)] = &[
    ("github.com", "GitHub"),
    ("gitlab.com", "GitLab"),
    ("bitbucket.org", "Bitbucket"),
    ("jetbrains.space", "JetBrains"),
];

/// Point-in-time view of a git repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    /// Remote host, e.g. `github.com`.
    pub endpoint: String,
    /// Path of the repository on the remote, e.g. `anvil-build/anvil`.
    pub identifier: String,
    /// Current branch; `None` for a detached HEAD.
    pub branch: Option<String>,
    /// Full HEAD commit id.
    pub commit: String,
}

impl RepositoryInfo {
    /// Build a snapshot from a remote URL as printed by `git remote get-url`.
    pub fn from_remote_url(url: &str, branch: Option<String>, commit: String) -> Result<Self> {
        let (endpoint, identifier) = parse_remote_url(url)
            .ok_or_else(|| TelemetryError::Git(format!("unrecognised remote url: {url}")))?;
        Ok(RepositoryInfo {
            endpoint,
            identifier,
            branch,
            commit,
        })
    }

    /// SSH clone URL, independent of the protocol the remote was added with.
    pub fn ssh_url(&self) -> String {
        format!("git@{}:{}.git", self.endpoint, self.identifier)
    }

    pub fn is_on_main_or_master_branch(&self) -> bool {
        self.branch_is_any(&["main", "master"])
    }

    pub fn is_on_develop_branch(&self) -> bool {
        self.branch_is_any(&["dev", "develop", "development"])
    }

    pub fn is_on_release_branch(&self) -> bool {
        self.branch_starts_with("release/")
    }

    pub fn is_on_hotfix_branch(&self) -> bool {
        self.branch_starts_with("hotfix/")
    }

    /// First hosting provider whose host appears in the endpoint.
    pub fn provider(&self) -> Option<&'static str> {
        let endpoint = self.endpoint.to_ascii_lowercase();
        PROVIDERS
            .iter()
            .find(|(host, _)| endpoint.contains(host))
            .map(|(_, name)| *name)
    }

    /// First matching branch class among main, develop, release and hotfix.
    pub fn branch_class(&self) -> Option<&'static str> {
        let classes: [(fn(&Self) -> bool, &'static str); 4] = [
            (Self::is_on_main_or_master_branch, "main"),
            (Self::is_on_develop_branch, "develop"),
            (Self::is_on_release_branch, "release"),
            (Self::is_on_hotfix_branch, "hotfix"),
        ];
        classes
            .iter()
            .find(|(predicate, _)| predicate(self))
            .map(|(_, label)| *label)
    }

    fn branch_is_any(&self, names: &[&str]) -> bool {
        self.branch
            .as_deref()
            .is_some_and(|b| names.iter().any(|n| b.eq_ignore_ascii_case(n)))
    }

    fn branch_starts_with(&self, prefix: &str) -> bool {
        self.branch
            .as_deref()
            .is_some_and(|b| b.to_ascii_lowercase().starts_with(prefix))
    }
}

/// Split a remote URL into `(endpoint, identifier)`.
///
/// Handles `https://`, `ssh://` and `git://` URLs as well as scp-like
/// `git@host:owner/repo.git` remotes. Credentials, ports and the `.git`
/// suffix are dropped.
pub fn parse_remote_url(url: &str) -> Option<(String, String)> {
    static URL: OnceLock<Regex> = OnceLock::new();
    static SCP: OnceLock<Regex> = OnceLock::new();

    let url = url.trim();
    let url_re = URL.get_or_init(|| {
        Regex::new(
            r"^(?:https?|ssh|git)://(?:[^@/]+@)?(?P<endpoint>[^/:]+)(?::\d+)?/(?P<identifier>.+?)(?:\.git)?/?$",
        )
        .expect("remote url pattern is valid")
    });
    let scp_re = SCP.get_or_init(|| {
        Regex::new(r"^(?:[^@/]+@)?(?P<endpoint>[^:/]+):(?P<identifier>[^/].*?)(?:\.git)?/?$")
            .expect("scp remote pattern is valid")
    });

    let caps = url_re.captures(url).or_else(|| scp_re.captures(url))?;
    Some((caps["endpoint"].to_string(), caps["identifier"].to_string()))
}

/// Opens directories as git repositories.
pub trait RepositoryInspector: Send + Sync {
    fn open(&self, directory: &Path) -> Result<RepositoryInfo>;
}

/// [`RepositoryInspector`] shelling out to the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCliInspector {
    remote: String,
}

impl Default for GitCliInspector {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
        }
    }
}

impl GitCliInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect a remote other than `origin`.
    pub fn with_remote(remote: &str) -> Self {
        Self {
            remote: remote.to_string(),
        }
    }
}

impl RepositoryInspector for GitCliInspector {
    fn open(&self, directory: &Path) -> Result<RepositoryInfo> {
        let url = run_git(directory, &["remote", "get-url", &self.remote])?;
        let commit = run_git(directory, &["rev-parse", "HEAD"])?;
        let branch = run_git(directory, &["symbolic-ref", "--short", "-q", "HEAD"]).ok();
        RepositoryInfo::from_remote_url(&url, branch, commit)
    }
}

/// Run `git <args>` in `dir` and return trimmed stdout.
fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| TelemetryError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TelemetryError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        return Err(TelemetryError::Git(format!(
            "git {} returned empty output",
            args.join(" ")
        )));
    }

    Ok(stdout)
}
