//! Decoder for the daemon's multiplexed log stream.
//!
//! A stream is a run of frames laid out as
//! `[origin: u8][0u8; 3][length: u32 BE][payload; length]`, where each payload
//! is `"<RFC3339 timestamp> <text>\n"`. The caller accumulates the whole
//! response body first; decoding never buffers across calls.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const FRAME_HEADER_LEN: usize = 8;

static ANSI_SEQUENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m|\[\d+m").expect("ANSI pattern must compile"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    #[error("frame at offset {offset} needs {needed} bytes but only {available} remain")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unknown stream origin tag {tag} at offset {offset}")]
    UnknownOrigin { tag: u8, offset: usize },

    #[error("frame at offset {offset} carries no timestamp")]
    MissingTimestamp { offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamOrigin {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StreamOrigin::Stdin),
            1 => Some(StreamOrigin::Stdout),
            2 => Some(StreamOrigin::Stderr),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOrigin::Stdin => "stdin",
            StreamOrigin::Stdout => "stdout",
            StreamOrigin::Stderr => "stderr",
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: String,
    pub origin: StreamOrigin,
    pub text: String,
}

impl LogLine {
    /// Timestamp cut to whole seconds with the `T` separator replaced by a space.
    pub fn display_timestamp(&self) -> String {
        self.timestamp
            .chars()
            .take(19)
            .map(|c| if c == 'T' { ' ' } else { c })
            .collect()
    }

    /// Human-readable form: `[YYYY-MM-DD HH:MM:SS] text` with color codes
    /// removed and test-runner markers replaced by check marks.
    pub fn render(&self) -> String {
        let text = ANSI_SEQUENCE.replace_all(&self.text, "");
        let text = text.replace("(pass)", "(✓)").replace("(fail)", "(✗)");
        format!("[{}] {}", self.display_timestamp(), text)
    }
}

/// Decode every frame in `bytes`.
///
/// Any truncated frame fails the whole call so a partially received stream is
/// never mistaken for output.
pub fn decode(bytes: &[u8]) -> Result<Vec<LogLine>, LogError> {
    let mut lines = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        if remaining.len() < FRAME_HEADER_LEN {
            return Err(LogError::Truncated {
                offset,
                needed: FRAME_HEADER_LEN,
                available: remaining.len(),
            });
        }

        let tag = remaining[0];
        let origin = StreamOrigin::from_tag(tag).ok_or(LogError::UnknownOrigin { tag, offset })?;
        let length =
            u32::from_be_bytes([remaining[4], remaining[5], remaining[6], remaining[7]]) as usize;
        let payload = &remaining[FRAME_HEADER_LEN..];
        if payload.len() < length {
            return Err(LogError::Truncated {
                offset,
                needed: FRAME_HEADER_LEN + length,
                available: remaining.len(),
            });
        }

        let payload = String::from_utf8_lossy(&payload[..length]);
        let payload = payload.strip_suffix('\n').unwrap_or(&payload);
        let payload = payload.strip_suffix('\r').unwrap_or(payload);
        let (timestamp, text) = payload
            .split_once(' ')
            .ok_or(LogError::MissingTimestamp { offset })?;

        lines.push(LogLine {
            timestamp: timestamp.to_string(),
            origin,
            text: text.to_string(),
        });
        offset += FRAME_HEADER_LEN + length;
    }

    Ok(lines)
}

/// Render decoded lines one per row.
pub fn render(lines: &[LogLine]) -> String {
    lines
        .iter()
        .map(LogLine::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build one frame. Used by tests and the scripted daemon.
pub fn encode_frame(origin: StreamOrigin, payload: &[u8]) -> Vec<u8> {
    let tag = match origin {
        StreamOrigin::Stdin => 0u8,
        StreamOrigin::Stdout => 1,
        StreamOrigin::Stderr => 2,
    };
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.push(tag);
    frame.extend_from_slice(&[0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}
