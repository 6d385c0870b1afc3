//! Transport to the remote collector.
//!
//! [`CollectorClient`] queues events as envelopes and posts the queue on
//! [`TelemetryClient::flush`]. Delivery is best effort: failures are logged
//! at `debug` and the batch is dropped.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::event::{Event, Metrics};
use crate::properties::Properties;

/// Placeholder replacing identifying context fields.
pub const SCRUBBED: &str = "N/A";

const ENVELOPE_NAME: &str = "Microsoft.ApplicationInsights.Event";
const BASE_TYPE: &str = "EventData";
const EVENT_DATA_VERSION: u8 = 2;

const TAG_SESSION_ID: &str = "ai.session.id";
const TAG_LOCATION_IP: &str = "ai.location.ip";
const TAG_ROLE_INSTANCE: &str = "ai.cloud.roleInstance";

/// Queue-and-flush event sink.
#[async_trait]
pub trait TelemetryClient: Send + Sync {
    /// Enqueue an event for the next flush.
    fn track(&self, event: Event);

    /// Deliver everything queued so far. Never fails from the caller's view.
    async fn flush(&self);
}

/// Context tags attached to every envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub session_id: String,
    pub ip: String,
    pub cloud_role_instance: String,
}

impl ClientContext {
    /// Fresh random session with identifying fields scrubbed.
    pub fn scrubbed() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            ip: SCRUBBED.to_string(),
            cloud_role_instance: SCRUBBED.to_string(),
        }
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            (TAG_SESSION_ID, self.session_id.clone()),
            (TAG_LOCATION_IP, self.ip.clone()),
            (TAG_ROLE_INSTANCE, self.cloud_role_instance.clone()),
        ])
    }
}

/// Wire envelope for a single event.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub name: &'static str,
    pub time: DateTime<Utc>,
    #[serde(rename = "iKey")]
    pub instrumentation_key: String,
    pub tags: BTreeMap<&'static str, String>,
    pub data: EnvelopeData,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeData {
    #[serde(rename = "baseType")]
    pub base_type: &'static str,
    #[serde(rename = "baseData")]
    pub base_data: EventData,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventData {
    pub ver: u8,
    pub name: String,
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurements: Option<Metrics>,
}

/// HTTP client for the collector endpoint.
pub struct CollectorClient {
    endpoint: String,
    instrumentation_key: String,
    context: ClientContext,
    http: reqwest::Client,
    queue: Mutex<Vec<Envelope>>,
}

impl CollectorClient {
    /// Create a client for the configured endpoint.
    pub fn new(config: &TelemetryConfig, context: ClientContext) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("anvil-telemetry/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            instrumentation_key: config.instrumentation_key.clone(),
            context,
            http,
            queue: Mutex::new(Vec::new()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Number of envelopes waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    /// Wrap an event in an envelope carrying this client's context.
    pub fn envelope(&self, event: Event) -> Envelope {
        let name = event.name().to_string();
        let measurements = event.metrics().cloned();
        Envelope {
            name: ENVELOPE_NAME,
            time: Utc::now(),
            instrumentation_key: self.instrumentation_key.clone(),
            tags: self.context.tags(),
            data: EnvelopeData {
                base_type: BASE_TYPE,
                base_data: EventData {
                    ver: EVENT_DATA_VERSION,
                    name,
                    properties: event.properties().clone(),
                    measurements,
                },
            },
        }
    }

    async fn send(&self, batch: &[Envelope]) -> Result<()> {
        let response = self.http.post(&self.endpoint).json(batch).send().await?;
        if !response.status().is_success() {
            return Err(TelemetryError::Http(format!(
                "collector rejected batch with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Vec<Envelope>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TelemetryClient for CollectorClient {
    fn track(&self, event: Event) {
        let envelope = self.envelope(event);
        self.lock_queue().push(envelope);
    }

    async fn flush(&self) {
        let batch = std::mem::take(&mut *self.lock_queue());
        if batch.is_empty() {
            return;
        }

        match self.send(&batch).await {
            Ok(()) => debug!(event = "telemetry.flushed", count = batch.len()),
            Err(err) => debug!(
                event = "telemetry.flush_failed",
                count = batch.len(),
                error = %err
            ),
        }
    }
}
