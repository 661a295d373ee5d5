use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::StreamError;
use crate::events::ToolEvent;
use crate::frame::encode_bytes;
use crate::source::ChannelSource;

/// Write side of the tool-event stream. Each event becomes one frame sent as
/// a single chunk. The stream ends when the last emitter clone is dropped.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<Bytes>,
}

impl EventEmitter {
    /// Create an emitter and the source the merger reads from.
    pub fn channel(capacity: usize) -> (Self, ChannelSource) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, ChannelSource::new(rx))
    }

    pub async fn emit(&self, event: &ToolEvent) -> Result<(), StreamError> {
        self.tx
            .send(encode_bytes(event))
            .await
            .map_err(|_| StreamError::Closed)
    }
}

/// Handed to a running tool so it can report stages and code changes.
pub struct Progress {
    tool: String,
    emitter: EventEmitter,
}

impl Progress {
    pub(crate) fn new(tool: impl Into<String>, emitter: EventEmitter) -> Self {
        Self {
            tool: tool.into(),
            emitter,
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub async fn stage(&self, stage_id: &str, message: &str) {
        self.send(ToolEvent::stage(&self.tool, stage_id, message))
            .await;
    }

    pub async fn code_change(
        &self,
        file: &str,
        description: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) {
        self.send(ToolEvent::CodeChange {
            tool: self.tool.clone(),
            file: file.to_string(),
            description: description.to_string(),
            before: before.map(str::to_string),
            after: after.map(str::to_string),
        })
        .await;
    }

    async fn send(&self, event: ToolEvent) {
        if let Err(e) = self.emitter.emit(&event).await {
            debug!(tool = %self.tool, error = %e, "progress event dropped");
        }
    }
}
