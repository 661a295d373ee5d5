use tracing::{debug, warn};

use super::{CLOSE, MAX_FRAME_BYTES, OPEN, SEPARATOR};
use crate::error::DecodeError;
use crate::events::{FrameKind, ToolEvent};

const OPEN_BYTES: &[u8] = OPEN.as_bytes();
const CLOSE_BYTES: &[u8] = CLOSE.as_bytes();

/// One piece of decoder output, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Event(ToolEvent),
}

/// Where the body of a frame that starts at a given offset ends.
enum Body {
    /// Close marker found at this offset.
    Closed(usize),
    /// Malformed span ends at this offset (exclusive).
    Malformed(usize),
    /// Body ran past the size limit at this offset; the rest of the frame is
    /// discarded as it arrives.
    Oversized(usize),
    /// Need more bytes to decide. Body bytes before this offset are checked.
    Incomplete(usize),
}

/// Incremental decoder for the merged text/frame stream.
///
/// Output does not depend on how the input is chunked: feeding a stream in one
/// piece or split at arbitrary byte offsets yields the same events and the
/// same concatenated text. Only bytes that could still turn into an open
/// marker, a frame body, or a multi-byte character are held back.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Text bytes not yet emitted because they end in a partial UTF-8 sequence.
    text: Vec<u8>,
    /// A frame just closed; a directly following newline belongs to it.
    swallow_newline: bool,
    /// Inside an oversized frame; bytes are dropped up to its end.
    discarding: bool,
    /// Body bytes of the pending frame at `buf[0]` already scanned.
    body_scanned: usize,
    dropped: usize,
    decoded: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a network chunk through the decoder.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Segment> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        self.scan(&mut out, false);
        out
    }

    /// Flush everything still buffered at end of stream. An unterminated
    /// frame is dropped; held-back text is emitted.
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        self.scan(&mut out, true);
        self.swallow_newline = false;
        self.discarding = false;
        self.body_scanned = 0;
        out
    }

    /// Frames discarded as malformed so far.
    pub fn dropped_frames(&self) -> usize {
        self.dropped
    }

    pub fn decoded_frames(&self) -> usize {
        self.decoded
    }

    fn scan(&mut self, out: &mut Vec<Segment>, at_eof: bool) {
        let mut pos = 0;

        loop {
            if self.discarding {
                pos = self.skip_oversized(pos, at_eof);
                if self.discarding {
                    break;
                }
                continue;
            }

            if self.swallow_newline {
                if pos == self.buf.len() {
                    break;
                }
                if self.buf[pos] == b'\n' {
                    pos += 1;
                }
                self.swallow_newline = false;
            }

            let rest = &self.buf[pos..];
            let Some(open_at) = find(rest, OPEN_BYTES) else {
                let keep = if at_eof {
                    0
                } else {
                    partial_suffix(rest, OPEN_BYTES)
                };
                let text_end = self.buf.len() - keep;
                self.push_text(pos, text_end);
                self.flush_text(out, !at_eof);
                pos = text_end;
                break;
            };

            let open = pos + open_at;
            let body_start = open + OPEN_BYTES.len();
            let resume = if open == 0 {
                std::mem::take(&mut self.body_scanned)
            } else {
                0
            };
            match self.locate_body(body_start, resume, at_eof) {
                Body::Closed(close) => {
                    self.push_text(pos, open);
                    self.flush_text(out, false);
                    match parse_frame(&self.buf[body_start..close]) {
                        Ok(event) => {
                            self.decoded += 1;
                            out.push(Segment::Event(event));
                        }
                        Err(e) => self.drop_frame(&e),
                    }
                    pos = close + CLOSE_BYTES.len();
                    self.swallow_newline = true;
                }
                Body::Malformed(end) => {
                    self.push_text(pos, open);
                    self.flush_text(out, false);
                    self.drop_frame(&DecodeError::Unterminated);
                    pos = end;
                }
                Body::Oversized(end) => {
                    self.push_text(pos, open);
                    self.flush_text(out, false);
                    self.drop_frame(&DecodeError::TooLarge(MAX_FRAME_BYTES));
                    self.discarding = true;
                    pos = end;
                }
                Body::Incomplete(scanned) => {
                    self.push_text(pos, open);
                    self.flush_text(out, false);
                    self.body_scanned = scanned;
                    pos = open;
                    break;
                }
            }
        }

        self.buf.drain(..pos);
    }

    fn locate_body(&self, body_start: usize, resume: usize, at_eof: bool) -> Body {
        let body = &self.buf[body_start..];
        let mut i = resume;
        while i < body.len() && i <= MAX_FRAME_BYTES {
            let tail = &body[i..];
            if tail[0] == b'\n' {
                return Body::Malformed(body_start + i);
            }
            if tail.starts_with(CLOSE_BYTES) {
                return Body::Closed(body_start + i);
            }
            if tail.starts_with(OPEN_BYTES) {
                return Body::Malformed(body_start + i);
            }
            if !at_eof && (is_proper_prefix(tail, CLOSE_BYTES) || is_proper_prefix(tail, OPEN_BYTES))
            {
                return Body::Incomplete(i);
            }
            i += 1;
        }
        if i > MAX_FRAME_BYTES {
            return Body::Oversized(body_start + i);
        }
        if at_eof {
            Body::Malformed(self.buf.len())
        } else {
            Body::Incomplete(i)
        }
    }

    /// Drop the rest of an oversized frame. It ends after a close marker, or
    /// before a newline or a new open marker. Returns where scanning resumes.
    fn skip_oversized(&mut self, pos: usize, at_eof: bool) -> usize {
        let rest = &self.buf[pos..];
        for i in 0..rest.len() {
            let tail = &rest[i..];
            if tail[0] == b'\n' || tail.starts_with(OPEN_BYTES) {
                self.discarding = false;
                return pos + i;
            }
            if tail.starts_with(CLOSE_BYTES) {
                self.discarding = false;
                self.swallow_newline = true;
                return pos + i + CLOSE_BYTES.len();
            }
            if !at_eof && (is_proper_prefix(tail, CLOSE_BYTES) || is_proper_prefix(tail, OPEN_BYTES))
            {
                return pos + i;
            }
        }
        if at_eof {
            self.discarding = false;
        }
        self.buf.len()
    }

    fn drop_frame(&mut self, error: &DecodeError) {
        self.dropped += 1;
        warn!(error = %error, dropped = self.dropped, "dropping malformed frame");
    }

    fn push_text(&mut self, from: usize, to: usize) {
        if from < to {
            self.text.extend_from_slice(&self.buf[from..to]);
        }
    }

    /// Emit accumulated text as UTF-8, replacing invalid sequences the way
    /// `String::from_utf8_lossy` does. With `hold_partial`, a trailing
    /// incomplete sequence stays buffered for the next chunk.
    fn flush_text(&mut self, out: &mut Vec<Segment>, hold_partial: bool) {
        if self.text.is_empty() {
            return;
        }
        let mut emitted = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.text[start..]) {
                Ok(valid) => {
                    emitted.push_str(valid);
                    start = self.text.len();
                    break;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    emitted.push_str(
                        std::str::from_utf8(&self.text[start..valid_end]).unwrap_or_default(),
                    );
                    match e.error_len() {
                        Some(len) => {
                            emitted.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None if hold_partial => {
                            start = valid_end;
                            break;
                        }
                        None => {
                            emitted.push(char::REPLACEMENT_CHARACTER);
                            start = self.text.len();
                            break;
                        }
                    }
                }
            }
        }
        self.text.drain(..start);
        if !emitted.is_empty() {
            out.push(Segment::Text(emitted));
        }
    }
}

/// Decode a complete byte stream in one pass, returning events and clean text.
pub fn decode_all(input: &[u8]) -> (Vec<ToolEvent>, String) {
    let mut decoder = FrameDecoder::new();
    let mut segments = decoder.feed(input);
    segments.extend(decoder.finish());
    split_segments(segments)
}

pub(crate) fn split_segments(segments: Vec<Segment>) -> (Vec<ToolEvent>, String) {
    let mut events = Vec::new();
    let mut text = String::new();
    for segment in segments {
        match segment {
            Segment::Text(t) => text.push_str(&t),
            Segment::Event(e) => events.push(e),
        }
    }
    (events, text)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the longest suffix of `haystack` that is a proper prefix of `marker`.
fn partial_suffix(haystack: &[u8], marker: &[u8]) -> usize {
    (1..marker.len())
        .rev()
        .find(|&n| haystack.len() >= n && haystack.ends_with(&marker[..n]))
        .unwrap_or(0)
}

fn is_proper_prefix(tail: &[u8], marker: &[u8]) -> bool {
    tail.len() < marker.len() && marker.starts_with(tail)
}

fn parse_frame(body: &[u8]) -> Result<ToolEvent, DecodeError> {
    let body = std::str::from_utf8(body).map_err(|_| DecodeError::Utf8)?;
    let mut parts = body.split(SEPARATOR);
    let raw_kind = parts.next().unwrap_or_default();
    let kind = FrameKind::parse(raw_kind).ok_or_else(|| DecodeError::UnknownKind(raw_kind.into()))?;

    let fields = parts
        .map(|f| {
            urlencoding::decode(f)
                .map(|s| s.into_owned())
                .map_err(|_| DecodeError::Encoding)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if fields.len() != kind.field_count() {
        return Err(DecodeError::FieldCount {
            kind: kind.as_str(),
            expected: kind.field_count(),
            got: fields.len(),
        });
    }

    let mut fields = fields.into_iter();
    let mut next = || fields.next().unwrap_or_default();
    let tool = next();
    if tool.is_empty() {
        return Err(DecodeError::EmptyTool);
    }

    let event = match kind {
        FrameKind::Work => ToolEvent::Started { tool, label: next() },
        FrameKind::Progress => ToolEvent::Stage {
            tool,
            stage_id: next(),
            message: next(),
        },
        FrameKind::WorkDone => ToolEvent::Completed {
            duration_secs: parse_duration(&next()),
            tool,
        },
        FrameKind::WorkError => ToolEvent::Failed { tool, error: next() },
        FrameKind::CodeChange => ToolEvent::CodeChange {
            tool,
            file: next(),
            description: next(),
            before: non_empty(next()),
            after: non_empty(next()),
        },
    };
    Ok(event)
}

fn parse_duration(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Some(secs),
        _ => {
            debug!(raw, "ignoring unparseable tool duration");
            None
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;

    fn sample_stream() -> String {
        let mut s = String::from("Let me research that — ");
        s.push_str(&encode(&ToolEvent::started("market_research", "Researching market")));
        s.push_str("Looking at competitors… ");
        s.push_str(&encode(&ToolEvent::stage("market_research", "fetch", "Loading sources")));
        s.push_str(&encode(&ToolEvent::started("generate_leads", "Finding prospects")));
        s.push_str("résumé ");
        s.push_str(&encode(&ToolEvent::failed("generate_leads", "quota: exceeded ⟦retry⟧")));
        s.push_str(&encode(&ToolEvent::completed("market_research", Some(4.25))));
        s.push_str("Done.");
        s
    }

    fn decode_chunks(chunks: &[&[u8]]) -> (Vec<ToolEvent>, String) {
        let mut decoder = FrameDecoder::new();
        let mut segments = Vec::new();
        for chunk in chunks {
            segments.extend(decoder.feed(chunk));
        }
        segments.extend(decoder.finish());
        split_segments(segments)
    }

    #[test]
    fn round_trip_leads_example() {
        let mut stream = String::new();
        stream.push_str(&encode(&ToolEvent::started("generate_leads", "Finding prospects")));
        stream.push_str(&encode(&ToolEvent::stage("generate_leads", "fetch", "Loading")));
        stream.push_str(&encode(&ToolEvent::completed("generate_leads", Some(2.3))));

        let (events, text) = decode_all(stream.as_bytes());
        assert_eq!(
            events,
            vec![
                ToolEvent::started("generate_leads", "Finding prospects"),
                ToolEvent::stage("generate_leads", "fetch", "Loading"),
                ToolEvent::completed("generate_leads", Some(2.3)),
            ]
        );
        assert_eq!(text, "");
    }

    #[test]
    fn single_split_at_every_byte_matches_whole() {
        let stream = sample_stream();
        let bytes = stream.as_bytes();
        let expected = decode_all(bytes);
        assert_eq!(expected.0.len(), 5);

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_chunks(&[a, b]), expected, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_whole() {
        let stream = sample_stream();
        let bytes = stream.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_chunks(&chunks), decode_all(bytes));
    }

    #[test]
    fn uneven_chunk_sizes_match_whole() {
        let stream = sample_stream();
        let bytes = stream.as_bytes();
        let expected = decode_all(bytes);
        for size in 2..=7 {
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(decode_chunks(&chunks), expected, "chunk size {size}");
        }
    }

    #[test]
    fn text_is_not_held_back() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.feed("hello world".as_bytes());
        assert_eq!(out, vec![Segment::Text("hello world".into())]);
    }

    #[test]
    fn partial_open_marker_is_held_back() {
        let mut decoder = FrameDecoder::new();
        let open = OPEN.as_bytes();
        let out = decoder.feed(&[b"hi ".as_slice(), &open[..2]].concat());
        assert_eq!(out, vec![Segment::Text("hi ".into())]);

        let mut rest = open[2..].to_vec();
        rest.extend_from_slice(b"WORK:t:go");
        rest.extend_from_slice(CLOSE.as_bytes());
        let out = decoder.feed(&rest);
        assert_eq!(out, vec![Segment::Event(ToolEvent::started("t", "go"))]);
    }

    #[test]
    fn newline_after_frame_swallowed_across_chunks() {
        let frame = encode(&ToolEvent::started("t", "go"));
        let (without_newline, newline) = frame.split_at(frame.len() - 1);

        let mut decoder = FrameDecoder::new();
        let first = decoder.feed(without_newline.as_bytes());
        assert_eq!(first, vec![Segment::Event(ToolEvent::started("t", "go"))]);
        let second = decoder.feed(format!("{newline}next").as_bytes());
        assert_eq!(second, vec![Segment::Text("next".into())]);
    }

    #[test]
    fn missing_field_is_dropped_without_breaking_neighbours() {
        let mut stream = String::from("before ");
        stream.push_str(&encode(&ToolEvent::started("a", "A")));
        stream.push_str("\u{27E6}WORK:onlyonefield\u{27E7}");
        stream.push_str(&encode(&ToolEvent::completed("a", None)));
        stream.push_str("after");

        let mut decoder = FrameDecoder::new();
        let mut segments = decoder.feed(stream.as_bytes());
        segments.extend(decoder.finish());
        assert_eq!(decoder.dropped_frames(), 1);

        let (events, text) = split_segments(segments);
        assert_eq!(
            events,
            vec![ToolEvent::started("a", "A"), ToolEvent::completed("a", None)]
        );
        assert_eq!(text, "before after");
    }

    #[test]
    fn unknown_kind_and_bad_encoding_are_dropped() {
        let stream = "x\u{27E6}EXPLODE:t:1\u{27E7}y\u{27E6}WORK:t:%FF\u{27E7}z";
        let mut decoder = FrameDecoder::new();
        let mut segments = decoder.feed(stream.as_bytes());
        segments.extend(decoder.finish());
        assert_eq!(decoder.dropped_frames(), 2);
        assert_eq!(split_segments(segments), (vec![], "xyz".to_string()));
    }

    #[test]
    fn newline_inside_frame_ends_it() {
        let (events, text) = decode_all("a\u{27E6}WORK:t\nb".as_bytes());
        assert!(events.is_empty());
        assert_eq!(text, "a\nb");
    }

    #[test]
    fn second_open_marker_restarts_frame() {
        let stream = format!(
            "\u{27E6}WORK:broken{}",
            encode(&ToolEvent::started("t", "ok"))
        );
        let (events, text) = decode_all(stream.as_bytes());
        assert_eq!(events, vec![ToolEvent::started("t", "ok")]);
        assert_eq!(text, "");
    }

    #[test]
    fn unterminated_frame_dropped_at_finish() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.feed("tail \u{27E6}WORK:t:lab".as_bytes());
        assert_eq!(out, vec![Segment::Text("tail ".into())]);
        assert!(decoder.finish().is_empty());
        assert_eq!(decoder.dropped_frames(), 1);
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let mut stream = String::from("x\u{27E6}WORK:t:");
        stream.push_str(&"a".repeat(MAX_FRAME_BYTES + 10));
        stream.push_str("\u{27E7}\ny");
        stream.push_str(&encode(&ToolEvent::started("t", "ok")));
        let bytes = stream.as_bytes();

        let mut decoder = FrameDecoder::new();
        let mut segments = decoder.feed(bytes);
        segments.extend(decoder.finish());
        assert_eq!(decoder.dropped_frames(), 1);
        let expected = (vec![ToolEvent::started("t", "ok")], "xy".to_string());
        assert_eq!(split_segments(segments), expected);

        for size in [1, 7, 4096] {
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(decode_chunks(&chunks), expected, "chunk size {size}");
        }
    }

    #[test]
    fn oversized_frame_ends_at_newline_or_open_marker() {
        let mut stream = String::from("a\u{27E6}WORK:");
        stream.push_str(&"b".repeat(MAX_FRAME_BYTES + 1));
        stream.push_str("\nc\u{27E6}WORK:");
        stream.push_str(&"d".repeat(MAX_FRAME_BYTES + 1));
        stream.push_str(&encode(&ToolEvent::started("t", "ok")));

        let (events, text) = decode_all(stream.as_bytes());
        assert_eq!(events, vec![ToolEvent::started("t", "ok")]);
        assert_eq!(text, "a\nc");
    }

    #[test]
    fn large_frame_fed_byte_at_a_time() {
        let label = "L".repeat(MAX_FRAME_BYTES - 32);
        let stream = format!("\u{27E6}WORK:t:{label}\u{27E7}");
        let mut decoder = FrameDecoder::new();
        let mut segments = Vec::new();
        for byte in stream.as_bytes().chunks(1) {
            segments.extend(decoder.feed(byte));
        }
        segments.extend(decoder.finish());
        assert_eq!(segments, vec![Segment::Event(ToolEvent::started("t", label))]);
    }

    #[test]
    fn invalid_utf8_text_replaced_like_lossy() {
        let bytes = b"ok \xFF\xC3 done \xE2\x82";
        let (_, text) = decode_all(bytes);
        assert_eq!(text, String::from_utf8_lossy(bytes));

        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_chunks(&chunks).1, text);
    }

    #[test]
    fn code_change_optionals_decode_as_none() {
        let event = ToolEvent::CodeChange {
            tool: "edit_website".into(),
            file: "styles.css".into(),
            description: "Tighten spacing".into(),
            before: Some("margin: 2rem".into()),
            after: None,
        };
        let (events, _) = decode_all(encode(&event).as_bytes());
        assert_eq!(events, vec![event]);
    }
}
