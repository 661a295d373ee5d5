use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handler::{ToolCall, ToolOutput};
use super::progress::{EventEmitter, Progress};
use super::set::ToolSet;
use crate::error::ToolError;
use crate::events::ToolEvent;

/// Counts for one run of the tool runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

struct Finished {
    name: String,
    elapsed: Duration,
    result: Result<ToolOutput, ToolError>,
}

/// Executes tool calls for one run and reports their lifecycle as frames.
///
/// Every tool that is announced with `started` gets exactly one terminal
/// event, whether it returns, errors, panics, or the run is cancelled. Once
/// the call channel closes and the last tool is terminal, the runner drops
/// its emitter, which ends the tool-event stream.
pub struct ToolRunner {
    tools: Arc<ToolSet>,
    emitter: EventEmitter,
    cancel: CancellationToken,
}

impl ToolRunner {
    pub fn new(tools: Arc<ToolSet>, emitter: EventEmitter, cancel: CancellationToken) -> Self {
        Self {
            tools,
            emitter,
            cancel,
        }
    }

    pub async fn run(self, mut calls: mpsc::Receiver<ToolCall>) -> RunnerSummary {
        let mut running: JoinSet<Finished> = JoinSet::new();
        let mut in_flight: HashMap<Id, String> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut summary = RunnerSummary::default();
        let mut calls_open = true;

        loop {
            if !calls_open && running.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    running.abort_all();
                    summary.cancelled = true;
                    for (_, name) in in_flight.drain() {
                        self.emit(&ToolEvent::failed(&name, ToolError::Cancelled.to_string())).await;
                        summary.failed += 1;
                    }
                    info!("tool runner cancelled");
                    break;
                }
                Some(joined) = running.join_next_with_id(), if !running.is_empty() => {
                    self.settle(joined, &mut in_flight, &mut summary).await;
                }
                call = calls.recv(), if calls_open => match call {
                    Some(call) => {
                        if !seen.insert(call.name.clone()) {
                            warn!(tool = %call.name, "tool already ran in this run, skipping");
                            summary.skipped += 1;
                            continue;
                        }
                        let name = call.name.clone();
                        match self.launch(&mut running, call).await {
                            Some(id) => {
                                in_flight.insert(id, name);
                            }
                            None => summary.failed += 1,
                        }
                    }
                    None => calls_open = false,
                },
            }
        }

        debug!(?summary, "closing tool-event stream");
        summary
    }

    /// Announce and spawn a tool. Returns the task id, or `None` if the tool
    /// could not be started.
    async fn launch(&self, running: &mut JoinSet<Finished>, call: ToolCall) -> Option<Id> {
        let ToolCall { name, input } = call;
        let Some(handler) = self.tools.get(&name) else {
            warn!(tool = %name, "unknown tool requested");
            self.emit(&ToolEvent::started(&name, &name)).await;
            self.emit(&ToolEvent::failed(&name, ToolError::Unknown(name.clone()).to_string()))
                .await;
            return None;
        };

        self.emit(&ToolEvent::started(&name, handler.label())).await;
        info!(tool = %name, "tool started");

        let progress = Progress::new(&name, self.emitter.clone());
        let handle = running.spawn(async move {
            let started = Instant::now();
            let result = AssertUnwindSafe(handler.run(&input, &progress))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ToolError::Panicked));
            Finished {
                name,
                elapsed: started.elapsed(),
                result,
            }
        });
        Some(handle.id())
    }

    /// Account for a joined tool task. A task that ended without a result
    /// still gets its terminal event.
    async fn settle(
        &self,
        joined: Result<(Id, Finished), JoinError>,
        in_flight: &mut HashMap<Id, String>,
        summary: &mut RunnerSummary,
    ) {
        match joined {
            Ok((id, finished)) => {
                in_flight.remove(&id);
                if self.report(finished).await {
                    summary.completed += 1;
                } else {
                    summary.failed += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, "tool task ended without a result");
                if let Some(name) = in_flight.remove(&e.id()) {
                    let error = if e.is_panic() {
                        ToolError::Panicked
                    } else {
                        ToolError::Cancelled
                    };
                    self.emit(&ToolEvent::failed(&name, error.to_string())).await;
                    summary.failed += 1;
                }
            }
        }
    }

    /// Emit the terminal event for a finished tool. Returns true on success.
    async fn report(&self, finished: Finished) -> bool {
        let Finished {
            name,
            elapsed,
            result,
        } = finished;
        let (event, ok) = match result {
            Ok(output) if output.success == Some(false) => {
                let message = if output.summary.is_empty() {
                    "tool reported failure".to_string()
                } else {
                    output.summary
                };
                (ToolEvent::failed(&name, message), false)
            }
            Ok(_) => (ToolEvent::completed(&name, Some(round_tenths(elapsed))), true),
            Err(e) => (ToolEvent::failed(&name, e.to_string()), false),
        };
        if ok {
            info!(tool = %name, elapsed_ms = elapsed.as_millis() as u64, "tool completed");
        } else {
            warn!(tool = %name, "tool failed");
        }
        self.emit(&event).await;
        ok
    }

    async fn emit(&self, event: &ToolEvent) {
        if let Err(e) = self.emitter.emit(event).await {
            debug!(tool = event.tool(), error = %e, "tool event not delivered");
        }
    }
}

fn round_tenths(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 10.0).round() / 10.0
}
