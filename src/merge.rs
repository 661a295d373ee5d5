use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::source::ChunkSource;

/// How one side of the merge stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    Ended,
    Failed(String),
    Cancelled,
    /// The client went away; the run was cancelled.
    SinkClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub model: SourceOutcome,
    pub tools: SourceOutcome,
}

/// Fans the model token stream and the tool-event stream into one output
/// channel, first-ready-first-written.
///
/// Each source gets its own reader task. Chunks are forwarded whole, so a
/// frame is never split by a chunk from the other source. The output closes
/// only once both readers have stopped.
///
/// On cancellation the model reader stops at once. The tool reader keeps
/// forwarding for up to `drain_grace` so the runner's closing `failed` frames
/// still reach a listening client.
pub struct StreamMerger {
    sink: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    drain_grace: Duration,
}

/// Default time the tool reader keeps draining after cancellation.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(1);

impl StreamMerger {
    pub fn new(sink: mpsc::Sender<Bytes>, cancel: CancellationToken) -> Self {
        Self {
            sink,
            cancel,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub async fn run<M, T>(self, model: M, tools: T) -> MergeReport
    where
        M: ChunkSource + 'static,
        T: ChunkSource + 'static,
    {
        let model_task = tokio::spawn(pump(
            "model",
            model,
            self.sink.clone(),
            self.cancel.clone(),
            Duration::ZERO,
        ));
        let tools_task = tokio::spawn(pump(
            "tools",
            tools,
            self.sink.clone(),
            self.cancel.clone(),
            self.drain_grace,
        ));
        drop(self.sink);

        let (model, tools) = tokio::join!(model_task, tools_task);
        let report = MergeReport {
            model: model.unwrap_or_else(|e| SourceOutcome::Failed(e.to_string())),
            tools: tools.unwrap_or_else(|e| SourceOutcome::Failed(e.to_string())),
        };
        info!(model = ?report.model, tools = ?report.tools, "merged stream closed");
        report
    }
}

async fn pump<S: ChunkSource>(
    name: &'static str,
    mut source: S,
    sink: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    grace: Duration,
) -> SourceOutcome {
    let stopped = async {
        cancel.cancelled().await;
        if !grace.is_zero() {
            debug!(source = name, grace_ms = grace.as_millis() as u64, "cancelled, draining");
            tokio::time::sleep(grace).await;
        }
    };
    tokio::pin!(stopped);

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut stopped => {
                debug!(source = name, "cancelled while waiting on source");
                return SourceOutcome::Cancelled;
            }
            next = source.next_chunk() => next,
        };

        match next {
            Ok(Some(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                let sent = tokio::select! {
                    biased;
                    _ = &mut stopped => return SourceOutcome::Cancelled,
                    sent = sink.send(chunk) => sent,
                };
                if sent.is_err() {
                    warn!(source = name, "output closed by client, cancelling run");
                    cancel.cancel();
                    return SourceOutcome::SinkClosed;
                }
            }
            Ok(None) => {
                debug!(source = name, "source ended");
                return SourceOutcome::Ended;
            }
            Err(e) => {
                warn!(source = name, error = %e, "source failed, draining the other side");
                return SourceOutcome::Failed(e.to_string());
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::StreamError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays scripted steps, optionally sleeping before each one.
    pub(crate) struct ScriptedSource {
        steps: VecDeque<(Duration, Result<Option<Bytes>, StreamError>)>,
    }

    impl ScriptedSource {
        pub(crate) fn chunks(chunks: &[&str]) -> Self {
            Self {
                steps: chunks
                    .iter()
                    .map(|c| (Duration::ZERO, Ok(Some(Bytes::from(c.to_string())))))
                    .collect(),
            }
        }

        pub(crate) fn paced(chunks: &[&str], delay: Duration) -> Self {
            Self {
                steps: chunks
                    .iter()
                    .map(|c| (delay, Ok(Some(Bytes::from(c.to_string())))))
                    .collect(),
            }
        }

        pub(crate) fn then_fail(mut self, message: &str) -> Self {
            self.steps
                .push_back((Duration::ZERO, Err(StreamError::Producer(message.into()))));
            self
        }

        pub(crate) fn then_hang(mut self) -> Self {
            self.steps.push_back((Duration::from_secs(3600), Ok(None)));
            self
        }
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError> {
            match self.steps.pop_front() {
                Some((delay, step)) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    step
                }
                None => Ok(None),
            }
        }
    }

    async fn collect(mut rx: mpsc::Receiver<Bytes>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.push(String::from_utf8(chunk.to_vec()).unwrap());
        }
        out
    }

    fn subsequence(haystack: &[String], needle: &[&str]) -> bool {
        let mut it = haystack.iter();
        needle.iter().all(|n| it.any(|h| h == n))
    }

    #[tokio::test]
    async fn both_sources_fully_forwarded_in_order() {
        let (tx, rx) = mpsc::channel(16);
        let merger = StreamMerger::new(tx, CancellationToken::new());
        let model = ScriptedSource::chunks(&["a", "b", "c"]);
        let tools = ScriptedSource::chunks(&["1", "2"]);

        let (report, out) = tokio::join!(merger.run(model, tools), collect(rx));
        assert_eq!(report.model, SourceOutcome::Ended);
        assert_eq!(report.tools, SourceOutcome::Ended);
        assert_eq!(out.len(), 5);
        assert!(subsequence(&out, &["a", "b", "c"]));
        assert!(subsequence(&out, &["1", "2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn output_stays_open_until_both_end() {
        let (tx, mut rx) = mpsc::channel(16);
        let merger = StreamMerger::new(tx, CancellationToken::new());
        let model = ScriptedSource::chunks(&["quick"]);
        let tools = ScriptedSource::paced(&["slow"], Duration::from_secs(5));
        let task = tokio::spawn(merger.run(model, tools));

        assert_eq!(rx.recv().await, Some(Bytes::from("quick")));
        assert_eq!(rx.recv().await, Some(Bytes::from("slow")));
        assert_eq!(rx.recv().await, None);
        let report = task.await.unwrap();
        assert_eq!(report.tools, SourceOutcome::Ended);
    }

    #[tokio::test]
    async fn failing_source_keeps_the_other_side() {
        let (tx, rx) = mpsc::channel(16);
        let merger = StreamMerger::new(tx, CancellationToken::new());
        let model = ScriptedSource::chunks(&["partial "]).then_fail("provider reset");
        let tools = ScriptedSource::chunks(&["f1", "f2"]);

        let (report, out) = tokio::join!(merger.run(model, tools), collect(rx));
        assert_eq!(report.model, SourceOutcome::Failed("producer failed: provider reset".into()));
        assert_eq!(report.tools, SourceOutcome::Ended);
        assert!(out.contains(&"partial ".to_string()));
        assert!(subsequence(&out, &["f1", "f2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_output_cancels_both_sides() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let merger = StreamMerger::new(tx, cancel.clone());
        let model = ScriptedSource::paced(&["m1", "m2", "m3"], Duration::from_millis(10));
        let tools = ScriptedSource::chunks(&[]).then_hang();
        let task = tokio::spawn(merger.run(model, tools));

        assert_eq!(rx.recv().await, Some(Bytes::from("m1")));
        drop(rx);

        let report = task.await.unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(report.model, SourceOutcome::SinkClosed);
        assert_eq!(report.tools, SourceOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_pumps() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let merger = StreamMerger::new(tx, cancel);
        let model = ScriptedSource::chunks(&[]).then_hang();
        let tools = ScriptedSource::chunks(&[]).then_hang();

        let (report, out) = tokio::join!(merger.run(model, tools), collect(rx));
        assert_eq!(report.model, SourceOutcome::Cancelled);
        assert_eq!(report.tools, SourceOutcome::Cancelled);
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tool_side_drains_closing_frames_after_cancel() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let merger = StreamMerger::new(tx, cancel.clone());
        let model = ScriptedSource::chunks(&[]).then_hang();
        let (tool_tx, tool_rx) = mpsc::channel(4);
        let tools = crate::source::ChannelSource::new(tool_rx);
        let task = tokio::spawn(merger.run(model, tools));

        cancel.cancel();
        tool_tx.send(Bytes::from("closing")).await.unwrap();
        drop(tool_tx);

        let out = collect(rx).await;
        let report = task.await.unwrap();
        assert_eq!(out, vec!["closing".to_string()]);
        assert_eq!(report.model, SourceOutcome::Cancelled);
        assert_eq!(report.tools, SourceOutcome::Ended);
    }
}
