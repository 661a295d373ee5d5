use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::events::ToolEvent;
use crate::routes::{self, ArtifactType, CanvasMode, View};

/// Lifecycle of one tool within a run. `Pending` exists for completeness;
/// entries are created directly in `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    Pending,
    Running,
    Complete,
    Error,
}

impl ToolState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Active,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub id: String,
    pub message: String,
    pub state: StageState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeChange {
    pub file: String,
    pub description: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Client-side view of one tool, derived from its events.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub label: String,
    pub state: ToolState,
    pub stages: Vec<Stage>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_label: Option<String>,
    pub error: Option<String>,
    pub changes: Vec<CodeChange>,
}

impl ToolStatus {
    pub fn active_stage(&self) -> Option<&Stage> {
        self.stages.iter().find(|s| s.state == StageState::Active)
    }
}

/// Side effects the caller should perform after applying an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SetView(View),
    SetCanvasMode(CanvasMode),
    RefreshArtifact {
        tool: String,
        artifact: ArtifactType,
        lagging: bool,
    },
}

/// Tool status map for one orchestration run.
///
/// Every transition is routed by the event's tool name and is safe under any
/// interleaving of events from concurrently running tools. Invalid or
/// repeated transitions are no-ops.
pub struct ToolRegistry {
    tools: Vec<ToolStatus>,
    min_duration_label: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            min_duration_label: Duration::from_secs(1),
        }
    }

    /// Durations shorter than this get no label.
    pub fn with_min_duration_label(mut self, threshold: Duration) -> Self {
        self.min_duration_label = threshold;
        self
    }

    /// Forget every entry. Call before the first event of a new run.
    pub fn reset(&mut self) {
        self.tools.clear();
    }

    pub fn apply(&mut self, event: &ToolEvent) -> Vec<Effect> {
        self.apply_at(event, Utc::now())
    }

    /// Apply an event as if observed at `now`.
    pub fn apply_at(&mut self, event: &ToolEvent, now: DateTime<Utc>) -> Vec<Effect> {
        match event {
            ToolEvent::Started { tool, label } => self.start(tool, label, now),
            ToolEvent::Stage {
                tool,
                stage_id,
                message,
            } => {
                self.stage(tool, stage_id, message);
                Vec::new()
            }
            ToolEvent::Completed {
                tool,
                duration_secs,
            } => self.complete(tool, *duration_secs, now),
            ToolEvent::Failed { tool, error } => {
                self.fail(tool, error, now);
                Vec::new()
            }
            ToolEvent::CodeChange {
                tool,
                file,
                description,
                before,
                after,
            } => {
                if let Some(entry) = self.entry_mut(tool) {
                    entry.changes.push(CodeChange {
                        file: file.clone(),
                        description: description.clone(),
                        before: before.clone(),
                        after: after.clone(),
                    });
                } else {
                    debug!(tool = %tool, "code change for unknown tool, ignoring");
                }
                Vec::new()
            }
        }
    }

    fn start(&mut self, tool: &str, label: &str, now: DateTime<Utc>) -> Vec<Effect> {
        if self.get(tool).is_some() {
            debug!(tool, "duplicate start, ignoring");
            return Vec::new();
        }
        self.tools.push(ToolStatus {
            name: tool.to_string(),
            label: label.to_string(),
            state: ToolState::Running,
            stages: Vec::new(),
            started_at: now,
            completed_at: None,
            duration_label: None,
            error: None,
            changes: Vec::new(),
        });
        routes::canvas_on_start(tool)
            .map(Effect::SetCanvasMode)
            .into_iter()
            .collect()
    }

    fn stage(&mut self, tool: &str, stage_id: &str, message: &str) {
        let Some(entry) = self.running_mut(tool) else {
            debug!(tool, stage_id, "stage without a running tool, ignoring");
            return;
        };
        for stage in entry.stages.iter_mut() {
            if stage.state == StageState::Active {
                stage.state = StageState::Complete;
            }
        }
        entry.stages.push(Stage {
            id: stage_id.to_string(),
            message: message.to_string(),
            state: StageState::Active,
        });
    }

    fn complete(&mut self, tool: &str, duration_secs: Option<f64>, now: DateTime<Utc>) -> Vec<Effect> {
        let threshold = self.min_duration_label;
        let Some(entry) = self.running_mut(tool) else {
            debug!(tool, "completion for unknown or finished tool, ignoring");
            return Vec::new();
        };
        entry.state = ToolState::Complete;
        entry.completed_at = Some(now);
        close_stages(entry);
        let secs = duration_secs.unwrap_or_else(|| {
            (now - entry.started_at).num_milliseconds().max(0) as f64 / 1000.0
        });
        entry.duration_label = duration_label(secs, threshold);

        let mut effects = Vec::new();
        if let Some(view) = routes::view_for(tool) {
            effects.push(Effect::SetView(view));
        }
        if let Some(mode) = routes::canvas_on_complete(tool) {
            effects.push(Effect::SetCanvasMode(mode));
        }
        if let Some(artifact) = routes::artifact_for(tool) {
            effects.push(Effect::RefreshArtifact {
                tool: tool.to_string(),
                artifact,
                lagging: routes::is_lagging(tool),
            });
        }
        effects
    }

    fn fail(&mut self, tool: &str, error: &str, now: DateTime<Utc>) {
        let Some(entry) = self.running_mut(tool) else {
            debug!(tool, "failure for unknown or finished tool, ignoring");
            return;
        };
        entry.state = ToolState::Error;
        entry.completed_at = Some(now);
        entry.error = Some(error.to_string());
        close_stages(entry);
    }

    pub fn get(&self, tool: &str) -> Option<&ToolStatus> {
        self.tools.iter().find(|t| t.name == tool)
    }

    fn entry_mut(&mut self, tool: &str) -> Option<&mut ToolStatus> {
        self.tools.iter_mut().find(|t| t.name == tool)
    }

    fn running_mut(&mut self, tool: &str) -> Option<&mut ToolStatus> {
        self.entry_mut(tool)
            .filter(|t| t.state == ToolState::Running)
    }

    /// Entries in the order their tools started.
    pub fn tools(&self) -> &[ToolStatus] {
        &self.tools
    }

    pub fn running(&self) -> impl Iterator<Item = &ToolStatus> {
        self.tools.iter().filter(|t| t.state == ToolState::Running)
    }

    /// True once every started tool has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.tools.iter().all(|t| t.state.is_terminal())
    }

    pub fn into_tools(self) -> Vec<ToolStatus> {
        self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn close_stages(entry: &mut ToolStatus) {
    for stage in entry.stages.iter_mut() {
        stage.state = StageState::Complete;
    }
}

/// Human label for a tool duration, or `None` when it is too short to show.
pub fn duration_label(secs: f64, threshold: Duration) -> Option<String> {
    if !secs.is_finite() || secs < threshold.as_secs_f64() {
        return None;
    }
    if secs < 60.0 {
        Some(format!("{secs:.1}s"))
    } else {
        let whole = secs.round() as u64;
        Some(format!("{}m {}s", whole / 60, whole % 60))
    }
}
