pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod merge;
pub mod refresh;
pub mod registry;
pub mod routes;
pub mod server;
pub mod source;
pub mod tools;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use client::{drive, ChatTurn, HttpArtifactFetcher, NoUi, StreamClient, TurnOutcome, UiSink};
pub use config::{ClientConfig, ServerConfig};
pub use error::{ArtifactError, DecodeError, StreamError, ToolError};
pub use events::{FrameKind, ToolEvent};
pub use frame::{decode_all, encode, FrameDecoder, Segment};
pub use merge::{MergeReport, SourceOutcome, StreamMerger};
pub use refresh::{
    Artifact, ArtifactCache, ArtifactFetcher, ArtifactRefresher, RefreshOutcome, RefreshPolicy,
};
pub use registry::{Effect, ToolRegistry, ToolState, ToolStatus};
pub use routes::{ArtifactType, CanvasMode, View};
pub use source::{ChannelSource, ChunkSource, TokenSource};
pub use tools::{
    EventEmitter, Progress, RunnerSummary, ToolCall, ToolHandler, ToolOutput, ToolRunner, ToolSet,
};

/// How a run ended, on both sides of the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub merge: MergeReport,
    pub tools: RunnerSummary,
}

/// Server side of one chat request. Wire up the tool catalog once, then
/// `start` a run per request.
pub struct Orchestrator {
    tools: Arc<ToolSet>,
    config: ServerConfig,
}

impl Orchestrator {
    pub fn new(tools: ToolSet) -> Self {
        Self {
            tools: Arc::new(tools),
            config: ServerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Channel for handing tool calls to a run. Dropping the sender tells the
    /// runner no more calls are coming.
    pub fn call_channel(&self) -> (mpsc::Sender<ToolCall>, mpsc::Receiver<ToolCall>) {
        mpsc::channel(self.config.call_capacity.max(1))
    }

    /// Start a run: model text from `model`, tool calls from `calls`, merged
    /// into one byte stream. Must be called inside a tokio runtime.
    pub fn start<M>(&self, model: M, calls: mpsc::Receiver<ToolCall>) -> RunHandle
    where
        M: ChunkSource + 'static,
    {
        let cancel = CancellationToken::new();
        let (sink, output) = mpsc::channel(self.config.channel_capacity.max(1));
        let (emitter, tool_source) = EventEmitter::channel(self.config.event_capacity);

        let runner = ToolRunner::new(Arc::clone(&self.tools), emitter, cancel.clone());
        let runner_task = tokio::spawn(runner.run(calls));
        let merger =
            StreamMerger::new(sink, cancel.clone()).with_drain_grace(self.config.drain_grace());

        let task = tokio::spawn(async move {
            let merge = merger.run(model, tool_source).await;
            let tools = match runner_task.await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(error = %e, "tool runner task failed");
                    RunnerSummary::default()
                }
            };
            info!(
                completed = tools.completed,
                failed = tools.failed,
                skipped = tools.skipped,
                cancelled = tools.cancelled,
                "run finished"
            );
            RunReport { merge, tools }
        });

        RunHandle {
            output,
            cancel,
            task,
        }
    }
}

/// A running orchestration. Read the merged output with `next_chunk`, or
/// return it from an axum handler to stream it as the response body.
pub struct RunHandle {
    output: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Cancelling stops both producers and closes the output.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.output.recv().await
    }

    /// Drain the whole output, then wait for the run report.
    pub async fn collect(mut self) -> Result<(Vec<u8>, RunReport), StreamError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.output.recv().await {
            body.extend_from_slice(&chunk);
        }
        let report = self
            .task
            .await
            .map_err(|e| StreamError::Producer(e.to_string()))?;
        Ok((body, report))
    }

    pub(crate) fn into_parts(self) -> (mpsc::Receiver<Bytes>, CancellationToken, JoinHandle<RunReport>) {
        (self.output, self.cancel, self.task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::tests::ScriptedSource;
    use crate::tools::runner::tests::demo_tools;
    use serde_json::json;
    use std::time::Duration;

    async fn start_with(model: ScriptedSource, calls: &[&str]) -> RunHandle {
        let orchestrator = Orchestrator::new(demo_tools());
        let (tx, rx) = orchestrator.call_channel();
        for name in calls {
            tx.send(ToolCall::new(*name, json!({}))).await.unwrap();
        }
        drop(tx);
        orchestrator.start(model, rx)
    }

    #[tokio::test]
    async fn text_and_frames_share_one_stream() {
        let model = ScriptedSource::paced(&["Working ", "on it. ", "All done."], Duration::from_millis(3));
        let handle = start_with(model, &["generate_leads", "generate_pricing"]).await;
        let (body, report) = handle.collect().await.unwrap();

        assert_eq!(report.merge.model, SourceOutcome::Ended);
        assert_eq!(report.merge.tools, SourceOutcome::Ended);
        assert_eq!(report.tools.completed, 1);
        assert_eq!(report.tools.failed, 1);

        let (events, text) = decode_all(&body);
        assert_eq!(text, "Working on it. All done.");
        for tool in ["generate_leads", "generate_pricing"] {
            let terminal = events
                .iter()
                .filter(|e| e.tool() == tool && e.is_terminal())
                .count();
            assert_eq!(terminal, 1, "{tool} needs exactly one terminal event");
        }
    }

    #[tokio::test]
    async fn decoded_stream_reconciles_into_registry() {
        let model = ScriptedSource::chunks(&["Let me look. "]);
        let handle = start_with(model, &["generate_leads", "generate_outreach", "mystery_tool"]).await;
        let (body, _) = handle.collect().await.unwrap();

        let mut registry = ToolRegistry::new();
        let mut decoder = FrameDecoder::new();
        for chunk in body.chunks(7) {
            for segment in decoder.feed(chunk) {
                if let Segment::Event(event) = segment {
                    registry.apply(&event);
                }
            }
        }
        decoder.finish();

        assert!(registry.is_settled());
        assert_eq!(registry.get("generate_leads").unwrap().state, ToolState::Complete);
        assert_eq!(registry.get("generate_outreach").unwrap().state, ToolState::Error);
        assert_eq!(registry.get("mystery_tool").unwrap().state, ToolState::Error);
        assert_eq!(decoder.dropped_frames(), 0);
    }

    #[tokio::test]
    async fn cancel_fails_running_tools_and_closes_output() {
        let model = ScriptedSource::chunks(&["Building. "]).then_hang();
        let mut handle = start_with(model, &["generate_website"]).await;
        let cancel = handle.cancel_token();

        let started = encode(&ToolEvent::started("generate_website", "Hanging"));
        let mut body = Vec::new();
        loop {
            let seen = String::from_utf8_lossy(&body).into_owned();
            if seen.contains("Building. ") && seen.contains(&started) {
                break;
            }
            body.extend_from_slice(&handle.next_chunk().await.unwrap());
        }
        cancel.cancel();

        let (rest, report) = handle.collect().await.unwrap();
        body.extend_from_slice(&rest);
        assert!(report.tools.cancelled);
        assert_eq!(report.tools.failed, 1);
        assert_eq!(report.merge.model, SourceOutcome::Cancelled);
        assert_eq!(report.merge.tools, SourceOutcome::Ended);

        let (events, text) = decode_all(&body);
        assert_eq!(text, "Building. ");
        assert_eq!(
            events,
            vec![
                ToolEvent::started("generate_website", "Hanging"),
                ToolEvent::failed("generate_website", "tool cancelled"),
            ]
        );
    }

    #[tokio::test]
    async fn model_failure_still_drains_tools() {
        let model = ScriptedSource::chunks(&["partial"]).then_fail("upstream reset");
        let handle = start_with(model, &["generate_leads"]).await;
        let (body, report) = handle.collect().await.unwrap();

        assert_eq!(report.merge.model, SourceOutcome::Failed("producer failed: upstream reset".into()));
        let (events, text) = decode_all(&body);
        assert_eq!(text, "partial");
        assert!(events.iter().any(|e| matches!(e, ToolEvent::Completed { tool, .. } if tool == "generate_leads")));
    }
}
