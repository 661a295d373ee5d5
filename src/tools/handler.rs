use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::progress::Progress;
use crate::error::ToolError;

/// A tool's execution handler. Consumers implement this for each tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Label shown while the tool is running.
    fn label(&self) -> &str;

    /// Do the work. Report finer-grained progress through `progress`.
    async fn run(&self, input: &Value, progress: &Progress) -> Result<ToolOutput, ToolError>;
}

/// What a tool hands back. `success: Some(false)` is reported as a failure
/// with `summary` as the message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: Option<bool>,
    pub summary: String,
}

impl ToolOutput {
    pub fn ok(summary: impl Into<String>) -> Self {
        Self {
            success: Some(true),
            summary: summary.into(),
        }
    }

    pub fn unsuccessful(summary: impl Into<String>) -> Self {
        Self {
            success: Some(false),
            summary: summary.into(),
        }
    }
}

/// A request to run one tool in the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }
}
