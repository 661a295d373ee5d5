use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::refresh::RefreshPolicy;

/// Server-side run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Buffered chunks between the merger and the response body.
    pub channel_capacity: usize,
    /// Buffered frames between running tools and the merger.
    pub event_capacity: usize,
    /// Buffered tool calls waiting for the runner.
    pub call_capacity: usize,
    /// How long closing tool frames are still forwarded after a cancel.
    pub drain_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            event_capacity: 64,
            call_capacity: 16,
            drain_grace_ms: 1000,
        }
    }
}

impl ServerConfig {
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_call_capacity(mut self, capacity: usize) -> Self {
        self.call_capacity = capacity;
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

/// Client-side turn configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub project_id: String,
    pub base_url: String,
    pub chat_path: String,
    /// Switch to a tool's view when it completes.
    pub auto_switch_view: bool,
    /// Tool durations below this are not labelled.
    pub min_duration_label_ms: u64,
    pub refresh: RefreshPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            base_url: "http://localhost:3000".into(),
            chat_path: "/api/chat".into(),
            auto_switch_view: true,
            min_duration_label_ms: 1000,
            refresh: RefreshPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn min_duration_label(&self) -> Duration {
        Duration::from_millis(self.min_duration_label_ms)
    }
}
