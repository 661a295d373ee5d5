use std::borrow::Cow;

use bytes::Bytes;
use tracing::{debug, warn};

use super::{CLOSE, MAX_FIELD_CHARS, MAX_TOOL_NAME_CHARS, OPEN, PLACEHOLDER_TOOL, SEPARATOR};
use crate::events::ToolEvent;

/// Encode an event as a single newline-terminated frame.
///
/// Never fails. Tool names outside `[A-Za-z0-9_.-]` are rewritten, over-long
/// values are truncated, and everything is percent-encoded before it touches
/// the wire.
pub fn encode(event: &ToolEvent) -> String {
    let tool = sanitize_tool_name(event.tool());
    let fields: Vec<Cow<'_, str>> = match event {
        ToolEvent::Started { label, .. } => vec![escape(label)],
        ToolEvent::Stage {
            stage_id, message, ..
        } => vec![escape(stage_id), escape(message)],
        ToolEvent::Completed { duration_secs, .. } => {
            vec![Cow::Owned(format_duration(*duration_secs))]
        }
        ToolEvent::Failed { error, .. } => vec![escape(error)],
        ToolEvent::CodeChange {
            file,
            description,
            before,
            after,
            ..
        } => vec![
            escape(file),
            escape(description),
            before.as_deref().map(escape).unwrap_or_default(),
            after.as_deref().map(escape).unwrap_or_default(),
        ],
    };

    let kind = event.kind().as_str();
    let mut out = String::with_capacity(
        OPEN.len() + kind.len() + tool.len() + fields.iter().map(|f| f.len() + 1).sum::<usize>() + 8,
    );
    out.push_str(OPEN);
    out.push_str(kind);
    out.push(SEPARATOR);
    out.push_str(&tool);
    for field in &fields {
        out.push(SEPARATOR);
        out.push_str(field);
    }
    out.push_str(CLOSE);
    out.push('\n');
    out
}

pub fn encode_bytes(event: &ToolEvent) -> Bytes {
    Bytes::from(encode(event))
}

/// Replace frame markers in model text so ordinary tokens can never open a frame.
pub fn guard_text(text: &str) -> Cow<'_, str> {
    if !text.contains(OPEN) && !text.contains(CLOSE) {
        return Cow::Borrowed(text);
    }
    debug!("model text contained frame markers, replacing");
    Cow::Owned(text.replace(OPEN, "[").replace(CLOSE, "]"))
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn sanitize_tool_name(name: &str) -> Cow<'_, str> {
    if name.is_empty() {
        warn!("tool event without a tool name, using placeholder");
        return Cow::Borrowed(PLACEHOLDER_TOOL);
    }
    let fits = name.chars().count() <= MAX_TOOL_NAME_CHARS;
    if fits && name.chars().all(is_name_char) {
        return Cow::Borrowed(name);
    }
    let cleaned: String = name
        .chars()
        .take(MAX_TOOL_NAME_CHARS)
        .map(|c| if is_name_char(c) { c } else { '_' })
        .collect();
    warn!(original = name, sanitized = %cleaned, "tool name not frame-safe, sanitized");
    Cow::Owned(cleaned)
}

fn truncate(value: &str) -> &str {
    match value.char_indices().nth(MAX_FIELD_CHARS) {
        Some((idx, _)) => {
            debug!(len = value.len(), "truncating frame field");
            &value[..idx]
        }
        None => value,
    }
}

fn escape(value: &str) -> Cow<'_, str> {
    urlencoding::encode(truncate(value))
}

fn format_duration(duration: Option<f64>) -> String {
    match duration {
        Some(secs) if secs.is_finite() && secs >= 0.0 => format!("{secs}"),
        Some(secs) => {
            warn!(secs, "dropping invalid tool duration");
            String::new()
        }
        None => String::new(),
    }
}
