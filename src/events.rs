use serde::Serialize;

/// Lifecycle events reported by a running tool. These travel inline with the
/// model's text and are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolEvent {
    Started {
        tool: String,
        label: String,
    },
    Stage {
        tool: String,
        stage_id: String,
        message: String,
    },
    Completed {
        tool: String,
        duration_secs: Option<f64>,
    },
    Failed {
        tool: String,
        error: String,
    },
    CodeChange {
        tool: String,
        file: String,
        description: String,
        before: Option<String>,
        after: Option<String>,
    },
}

impl ToolEvent {
    pub fn started(tool: impl Into<String>, label: impl Into<String>) -> Self {
        Self::Started {
            tool: tool.into(),
            label: label.into(),
        }
    }

    pub fn stage(
        tool: impl Into<String>,
        stage_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Stage {
            tool: tool.into(),
            stage_id: stage_id.into(),
            message: message.into(),
        }
    }

    pub fn completed(tool: impl Into<String>, duration_secs: Option<f64>) -> Self {
        Self::Completed {
            tool: tool.into(),
            duration_secs,
        }
    }

    pub fn failed(tool: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.into(),
            error: error.into(),
        }
    }

    /// Name of the tool this event belongs to.
    pub fn tool(&self) -> &str {
        match self {
            Self::Started { tool, .. }
            | Self::Stage { tool, .. }
            | Self::Completed { tool, .. }
            | Self::Failed { tool, .. }
            | Self::CodeChange { tool, .. } => tool,
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Started { .. } => FrameKind::Work,
            Self::Stage { .. } => FrameKind::Progress,
            Self::Completed { .. } => FrameKind::WorkDone,
            Self::Failed { .. } => FrameKind::WorkError,
            Self::CodeChange { .. } => FrameKind::CodeChange,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Wire tag for each event variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Work,
    Progress,
    WorkDone,
    WorkError,
    CodeChange,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "WORK",
            Self::Progress => "PROGRESS",
            Self::WorkDone => "WORK_DONE",
            Self::WorkError => "WORK_ERROR",
            Self::CodeChange => "CODE_CHANGE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WORK" => Some(Self::Work),
            "PROGRESS" => Some(Self::Progress),
            "WORK_DONE" => Some(Self::WorkDone),
            "WORK_ERROR" => Some(Self::WorkError),
            "CODE_CHANGE" => Some(Self::CodeChange),
            _ => None,
        }
    }

    /// Number of fields following the kind, tool name included.
    pub fn field_count(self) -> usize {
        match self {
            Self::Work | Self::WorkDone | Self::WorkError => 2,
            Self::Progress => 3,
            Self::CodeChange => 5,
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
