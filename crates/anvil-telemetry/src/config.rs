//! Telemetry configuration.

use std::time::Duration;

/// Collector endpoint receiving event envelopes.
pub const DEFAULT_ENDPOINT: &str = "https://dc.services.visualstudio.com/v2/track";

/// Instrumentation key identifying anvil on the collector.
pub const INSTRUMENTATION_KEY: &str = "5f3c1b7e-9a42-4d8e-b1c6-2e7d90a4f318";

/// Setting this to `1` or `true` disables sending.
pub const OPT_OUT_ENV_KEY: &str = "ANVIL_TELEMETRY_OPTOUT";

/// Overrides [`DEFAULT_ENDPOINT`].
pub const ENDPOINT_ENV_KEY: &str = "ANVIL_TELEMETRY_ENDPOINT";

/// Timestamp written by the tool launcher when it started compiling the build.
pub const START_TIME_ENV_KEY: &str = "ANVIL_TOOL_START_TIME";

/// Version of the tool launcher, reported as-is.
pub const TOOL_VERSION_ENV_KEY: &str = "ANVIL_TOOL_VERSION";

/// Pause between the disclosure and the Enter prompt.
const DEFAULT_DISCLOSURE_PAUSE: Duration = Duration::from_secs(3);

/// HTTP timeout for a single flush.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Collector URL
    pub endpoint: String,
    /// Instrumentation key attached to every envelope
    pub instrumentation_key: String,
    /// Delay before asking the operator to press Enter
    pub disclosure_pause: Duration,
    /// Upper bound for one flush request
    pub request_timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            endpoint: std::env::var(ENDPOINT_ENV_KEY)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            instrumentation_key: INSTRUMENTATION_KEY.to_string(),
            disclosure_pause: DEFAULT_DISCLOSURE_PAUSE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl TelemetryConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific collector
    pub fn new(endpoint: &str) -> Self {
        TelemetryConfig {
            endpoint: endpoint.to_string(),
            instrumentation_key: INSTRUMENTATION_KEY.to_string(),
            disclosure_pause: DEFAULT_DISCLOSURE_PAUSE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_instrumentation_key(mut self, key: &str) -> Self {
        self.instrumentation_key = key.to_string();
        self
    }

    pub fn with_disclosure_pause(mut self, pause: Duration) -> Self {
        self.disclosure_pause = pause;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
