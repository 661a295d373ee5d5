#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("producer failed: {0}")]
    Producer(String),
    #[error("output channel closed")]
    Closed,
    #[error("run cancelled")]
    Cancelled,
    #[error("request failed: {0}")]
    Request(String),
    #[error("server returned {status}: {body}")]
    Http { status: u16, body: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("{0}")]
    Failed(String),
    #[error("tool panicked")]
    Panicked,
    #[error("tool cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found: {project}/{artifact_type}")]
    NotFound {
        project: String,
        artifact_type: String,
    },
    #[error("store error: {0}")]
    Store(String),
    #[error("failed to parse artifact: {0}")]
    Parse(String),
}

/// Why a frame was discarded. Never surfaced to callers; logged and skipped.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown frame kind: {0}")]
    UnknownKind(String),
    #[error("{kind} expects {expected} fields, got {got}")]
    FieldCount {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("frame has an empty tool name")]
    EmptyTool,
    #[error("field is not valid percent-encoded UTF-8")]
    Encoding,
    #[error("frame is not valid UTF-8")]
    Utf8,
    #[error("frame was never closed")]
    Unterminated,
    #[error("frame body exceeds {0} bytes")]
    TooLarge(usize),
}
