//! Telemetry events.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::properties::Properties;

/// Numeric measurements attached to an event.
pub type Metrics = BTreeMap<String, f64>;

/// Names of the events anvil reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventName {
    BuildStarted,
    TargetSucceeded,
    BuildSetup,
    ScriptConverted,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::BuildStarted => "BuildStarted",
            EventName::TargetSucceeded => "TargetSucceeded",
            EventName::BuildSetup => "BuildSetup",
            EventName::ScriptConverted => "ScriptConverted",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named event with its properties and optional metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: EventName,
    properties: Properties,
    metrics: Option<Metrics>,
}

impl Event {
    pub fn new(name: EventName, properties: Properties) -> Self {
        Self {
            name,
            properties,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> EventName {
        self.name
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }
}
