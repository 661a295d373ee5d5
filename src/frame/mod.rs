//! Inline wire framing for tool events.
//!
//! A frame is one line embedded in the model's text:
//!
//! ```text
//! ⟦WORK:generate_leads:Finding%20prospects⟧
//! ```
//!
//! Every field after the kind is percent-encoded, so field values can never
//! contain a marker, the `:` separator, or a newline.

pub mod decoder;
pub mod encoder;

pub use decoder::{decode_all, FrameDecoder, Segment};
pub use encoder::{encode, encode_bytes, guard_text};

pub const OPEN: &str = "\u{27E6}";
pub const CLOSE: &str = "\u{27E7}";
pub const SEPARATOR: char = ':';

/// Longest frame body the decoder will wait for before dropping it.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Free-form values are cut to this many characters before encoding.
pub const MAX_FIELD_CHARS: usize = 1000;

pub const MAX_TOOL_NAME_CHARS: usize = 128;

/// Substituted when a frame would otherwise carry an empty tool name.
pub const PLACEHOLDER_TOOL: &str = "unknown_tool";
