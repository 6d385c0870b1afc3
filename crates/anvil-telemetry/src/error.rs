//! Error taxonomy for the telemetry subsystem.
//!
//! None of these cross the public `Telemetry` boundary: consent failures
//! collapse to "no consent", repository failures to an empty property set,
//! and transport failures are logged and dropped.

/// Telemetry errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse project file {path}: {reason}")]
    ProjectParse { path: String, reason: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("no home directory available for global anvil state")]
    NoHomeDirectory,

    #[error("entry program name is unavailable")]
    MissingProgramName,

    #[error("refusing to create awareness cookie from test host '{0}'")]
    TestHost(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        TelemetryError::Http(err.to_string())
    }
}

/// Result type for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;
