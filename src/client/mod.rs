//! Browser-side half of the protocol: decode the response body, keep the
//! tool registry current, and push the results to the UI.

pub mod http;

use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::StreamError;
use crate::events::ToolEvent;
use crate::frame::{FrameDecoder, Segment};
use crate::refresh::{ArtifactRefresher, RefreshOutcome};
use crate::registry::{Effect, ToolRegistry, ToolStatus};
use crate::routes::{CanvasMode, View};

pub use http::{HttpArtifactFetcher, StreamClient};

/// Error shown on tools the stream left running.
const DANGLING_TOOL_ERROR: &str = "stream ended before the tool finished";

/// UI collaborator. View and canvas changes are required; rendering hooks
/// default to no-ops.
pub trait UiSink: Send {
    fn set_active_view(&mut self, view: View);

    fn set_canvas_mode(&mut self, mode: CanvasMode);

    fn render_text(&mut self, _text: &str) {}

    fn render_tools(&mut self, _tools: &[ToolStatus]) {}
}

/// Headless sink that ignores every call.
pub struct NoUi;

impl UiSink for NoUi {
    fn set_active_view(&mut self, _view: View) {}

    fn set_canvas_mode(&mut self, _mode: CanvasMode) {}
}

/// Final state of a finished turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    pub tools: Vec<ToolStatus>,
    pub dropped_frames: usize,
    pub refreshes: Vec<RefreshOutcome>,
}

/// State for rendering one chat turn. Owns the decoder and the tool registry
/// for exactly one orchestration run.
pub struct ChatTurn<U> {
    decoder: FrameDecoder,
    registry: ToolRegistry,
    text: String,
    ui: U,
    refresher: Option<ArtifactRefresher>,
    auto_switch_view: bool,
}

impl<U: UiSink> ChatTurn<U> {
    pub fn new(ui: U, config: &ClientConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            registry: ToolRegistry::new().with_min_duration_label(config.min_duration_label()),
            text: String::new(),
            ui,
            refresher: None,
            auto_switch_view: config.auto_switch_view,
        }
    }

    /// Re-fetch artifacts through `refresher` when tools complete.
    pub fn with_refresher(mut self, refresher: ArtifactRefresher) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Decode one network chunk and apply everything it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Segment> {
        let segments = self.decoder.feed(chunk);
        self.apply(&segments);
        segments
    }

    /// Start over for a new run. Nothing from the previous run survives.
    pub fn reset(&mut self) {
        if let Some(refresher) = self.refresher.as_mut() {
            refresher.reset();
        }
        self.decoder = FrameDecoder::new();
        self.registry.reset();
        self.text.clear();
    }

    /// End of stream: flush the decoder, close out tools the server never
    /// finished, and wait for scheduled artifact refreshes.
    pub async fn finish(mut self) -> TurnOutcome {
        let tail = self.decoder.finish();
        self.apply(&tail);

        let dangling: Vec<String> = self.registry.running().map(|t| t.name.clone()).collect();
        if !dangling.is_empty() {
            warn!(tools = ?dangling, "stream ended with running tools");
            for name in dangling {
                self.registry.apply(&ToolEvent::failed(name, DANGLING_TOOL_ERROR));
            }
            self.ui.render_tools(self.registry.tools());
        }

        let refreshes = match self.refresher.as_mut() {
            Some(refresher) => refresher.settle().await,
            None => Vec::new(),
        };

        info!(
            tools = self.registry.len(),
            dropped_frames = self.decoder.dropped_frames(),
            "turn finished"
        );
        TurnOutcome {
            text: std::mem::take(&mut self.text),
            dropped_frames: self.decoder.dropped_frames(),
            tools: std::mem::take(&mut self.registry).into_tools(),
            refreshes,
        }
    }

    /// Abandon the turn. Pending refreshes are cancelled and partial tool
    /// state is discarded.
    pub fn abort(self) {
        if let Some(refresher) = &self.refresher {
            refresher.cancel();
        }
        info!(tools = self.registry.len(), "turn aborted, discarding tool state");
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    fn apply(&mut self, segments: &[Segment]) {
        let mut tools_changed = false;
        for segment in segments {
            match segment {
                Segment::Text(text) => {
                    self.text.push_str(text);
                    self.ui.render_text(text);
                }
                Segment::Event(event) => {
                    tools_changed = true;
                    for effect in self.registry.apply(event) {
                        self.dispatch(effect);
                    }
                }
            }
        }
        if tools_changed {
            self.ui.render_tools(self.registry.tools());
        }
    }

    fn dispatch(&mut self, effect: Effect) {
        match effect {
            Effect::SetView(view) => {
                if self.auto_switch_view {
                    self.ui.set_active_view(view);
                }
            }
            Effect::SetCanvasMode(mode) => self.ui.set_canvas_mode(mode),
            Effect::RefreshArtifact {
                tool,
                artifact,
                lagging,
            } => match self.refresher.as_mut() {
                Some(refresher) => refresher.schedule(&tool, artifact, lagging),
                None => debug!(tool = %tool, artifact = %artifact, "no refresher, skipping artifact refresh"),
            },
        }
    }
}

/// Pump a response body into `turn` until it ends, fails, or `cancel` fires.
pub async fn drive<U, S, E>(
    turn: &mut ChatTurn<U>,
    body: S,
    cancel: &CancellationToken,
) -> Result<(), StreamError>
where
    U: UiSink,
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    tokio::pin!(body);
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            next = body.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                turn.feed(&chunk);
            }
            Some(Err(e)) => return Err(StreamError::Request(e.to_string())),
            None => return Ok(()),
        }
    }
}
