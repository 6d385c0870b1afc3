//! In-memory fakes for the telemetry collaborators (testing only)
//!
//! Provides `FakeEnvironment`, `FakeConfirmation`, `FakeRepositoryInspector`
//! and `RecordingClient`, which satisfy the trait contracts without touching
//! the process environment, the console, `git` or the network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{ClientContext, TelemetryClient};
use crate::consent::{Acknowledgement, Confirmation};
use crate::environment::Environment;
use crate::error::{Result, TelemetryError};
use crate::event::Event;
use crate::repository::{RepositoryInfo, RepositoryInspector};

// ---------------------------------------------------------------------------
// FakeEnvironment
// ---------------------------------------------------------------------------

/// Fixed environment view.
#[derive(Debug, Clone)]
pub struct FakeEnvironment {
    vars: HashMap<String, String>,
    platform: String,
    target_framework: String,
    program_name: Option<String>,
    interactive: bool,
}

impl Default for FakeEnvironment {
    fn default() -> Self {
        Self {
            vars: HashMap::new(),
            platform: "Linux".to_string(),
            target_framework: "x86_64-linux".to_string(),
            program_name: Some("anvil".to_string()),
            interactive: false,
        }
    }
}

impl FakeEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_platform(mut self, platform: &str) -> Self {
        self.platform = platform.to_string();
        self
    }

    pub fn with_target_framework(mut self, target: &str) -> Self {
        self.target_framework = target.to_string();
        self
    }

    pub fn with_program_name(mut self, name: &str) -> Self {
        self.program_name = Some(name.to_string());
        self
    }

    pub fn without_program_name(mut self) -> Self {
        self.program_name = None;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

impl Environment for FakeEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).filter(|v| !v.is_empty()).cloned()
    }

    fn platform(&self) -> String {
        self.platform.clone()
    }

    fn target_framework(&self) -> String {
        self.target_framework.clone()
    }

    fn program_name(&self) -> Option<String> {
        self.program_name.clone()
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

// ---------------------------------------------------------------------------
// FakeConfirmation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Answer {
    Confirm,
    Cancel,
    Fail,
}

/// Scripted operator that records every prompt it receives.
#[derive(Debug)]
pub struct FakeConfirmation {
    answer: Answer,
    prompts: Mutex<Vec<String>>,
}

impl FakeConfirmation {
    pub fn confirming() -> Self {
        Self::answering(Answer::Confirm)
    }

    pub fn cancelling() -> Self {
        Self::answering(Answer::Cancel)
    }

    /// Fails as if the console could not be read.
    pub fn failing() -> Self {
        Self::answering(Answer::Fail)
    }

    fn answering(answer: Answer) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Actions the operator was asked to acknowledge, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Confirmation for FakeConfirmation {
    fn await_acknowledgement(&self, action: &str) -> Result<Acknowledgement> {
        self.prompts.lock().unwrap().push(action.to_string());
        match self.answer {
            Answer::Confirm => Ok(Acknowledgement::Confirmed),
            Answer::Cancel => Ok(Acknowledgement::Cancelled),
            Answer::Fail => Err(TelemetryError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "console closed",
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeRepositoryInspector
// ---------------------------------------------------------------------------

/// Inspector returning a fixed repository, optionally only for one directory.
#[derive(Debug, Default)]
pub struct FakeRepositoryInspector {
    repository: Option<RepositoryInfo>,
    directory: Option<PathBuf>,
    opened: Mutex<Vec<PathBuf>>,
}

impl FakeRepositoryInspector {
    /// Every directory fails to open.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every directory opens as `repository`.
    pub fn with_repository(repository: RepositoryInfo) -> Self {
        Self {
            repository: Some(repository),
            ..Self::default()
        }
    }

    /// Only `directory` opens as `repository`.
    pub fn at(directory: &Path, repository: RepositoryInfo) -> Self {
        Self {
            repository: Some(repository),
            directory: Some(directory.to_path_buf()),
            ..Self::default()
        }
    }

    /// Directories passed to `open`, in order.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }
}

impl RepositoryInspector for FakeRepositoryInspector {
    fn open(&self, directory: &Path) -> Result<RepositoryInfo> {
        self.opened.lock().unwrap().push(directory.to_path_buf());
        let matches_dir = self.directory.as_deref().map_or(true, |d| d == directory);
        match &self.repository {
            Some(repository) if matches_dir => Ok(repository.clone()),
            _ => Err(TelemetryError::Git(format!(
                "not a git repository: {}",
                directory.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingClient
// ---------------------------------------------------------------------------

/// Client that keeps every tracked event and counts flushes.
#[derive(Debug, Default)]
pub struct RecordingClient {
    context: Mutex<Option<ClientContext>>,
    pending: Mutex<Vec<Event>>,
    delivered: Mutex<Vec<Event>>,
    flushes: Mutex<usize>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the context the dispatcher built this client with.
    pub fn with_context(context: ClientContext) -> Self {
        let client = Self::default();
        *client.context.lock().unwrap() = Some(context);
        client
    }

    pub fn context(&self) -> Option<ClientContext> {
        self.context.lock().unwrap().clone()
    }

    /// Events delivered by a flush.
    pub fn delivered(&self) -> Vec<Event> {
        self.delivered.lock().unwrap().clone()
    }

    /// Events tracked but not yet flushed.
    pub fn pending(&self) -> Vec<Event> {
        self.pending.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> usize {
        *self.flushes.lock().unwrap()
    }
}

#[async_trait]
impl TelemetryClient for RecordingClient {
    fn track(&self, event: Event) {
        self.pending.lock().unwrap().push(event);
    }

    async fn flush(&self) {
        let batch = std::mem::take(&mut *self.pending.lock().unwrap());
        self.delivered.lock().unwrap().extend(batch);
        *self.flushes.lock().unwrap() += 1;
    }
}
