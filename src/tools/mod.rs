pub mod handler;
pub mod progress;
pub mod runner;
pub mod set;

pub use handler::{ToolCall, ToolHandler, ToolOutput};
pub use progress::{EventEmitter, Progress};
pub use runner::{RunnerSummary, ToolRunner};
pub use set::ToolSet;
