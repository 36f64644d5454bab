//! Wire format of the terminal session channel
//!
//! Every transport message is one unit. Binary messages carry raw terminal
//! bytes and are written verbatim. Text messages are either the literal
//! `quit` sentinel or a JSON array tagged by its first element:
//!
//! ```text
//! ["set_size", rows, cols]
//! ["set_size", rows, cols, x, y]
//! ["stdin", "<utf8 data>"]
//! ```

use bytes::Bytes;
use serde_json::Value;

use crate::pty::WindowSize;

/// Sentinel text message that ends a session gracefully
pub const QUIT: &str = "quit";

const TAG_SET_SIZE: &str = "set_size";
const TAG_STDIN: &str = "stdin";

/// Control arrays carry at most a tag plus four fields
const MAX_CONTROL_FIELDS: usize = 5;

/// A single message on the data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw terminal bytes
    Binary(Bytes),
    /// `quit` or a JSON control message
    Text(String),
}

impl Payload {
    /// Build a binary payload
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Build a text payload
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// The quit sentinel
    pub fn quit() -> Self {
        Self::Text(QUIT.to_string())
    }
}

/// Decoded form of a text payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Peer is leaving; end the session without error
    Quit,
    /// Resize the pty. `x`/`y` are pixel dimensions and stay unchanged when absent.
    SetSize {
        rows: u16,
        cols: u16,
        x: Option<u16>,
        y: Option<u16>,
    },
    /// Keystrokes to inject into the host pty
    Stdin(String),
    /// Anything that matches no known shape
    Unmatched(String),
}

impl ControlMessage {
    /// Decode a text payload.
    ///
    /// The `quit` sentinel is checked before any JSON parsing. Everything
    /// else must be a 1-5 element JSON array whose first element names a
    /// known variant with the right field count and types; otherwise the
    /// raw text comes back as [`ControlMessage::Unmatched`].
    pub fn parse(text: &str) -> Self {
        if text == QUIT {
            return Self::Quit;
        }

        let unmatched = || Self::Unmatched(text.to_string());

        let fields: Vec<Value> = match serde_json::from_str(text) {
            Ok(fields) => fields,
            Err(_) => return unmatched(),
        };
        if fields.is_empty() || fields.len() > MAX_CONTROL_FIELDS {
            return unmatched();
        }

        match fields[0].as_str() {
            Some(TAG_SET_SIZE) => parse_set_size(&fields).unwrap_or_else(unmatched),
            Some(TAG_STDIN) if fields.len() == 2 => match fields[1].as_str() {
                Some(data) => Self::Stdin(data.to_string()),
                None => unmatched(),
            },
            _ => unmatched(),
        }
    }

    /// Full `set_size` message describing a local window
    pub fn set_size(size: WindowSize) -> Self {
        Self::SetSize {
            rows: size.rows,
            cols: size.cols,
            x: Some(size.x),
            y: Some(size.y),
        }
    }

    /// Encode for the wire
    pub fn to_wire(&self) -> String {
        match self {
            Self::Quit => QUIT.to_string(),
            Self::SetSize { rows, cols, x, y } => {
                if x.is_none() && y.is_none() {
                    serde_json::json!([TAG_SET_SIZE, rows, cols]).to_string()
                } else {
                    serde_json::json!([
                        TAG_SET_SIZE,
                        rows,
                        cols,
                        x.unwrap_or(0),
                        y.unwrap_or(0)
                    ])
                    .to_string()
                }
            }
            Self::Stdin(data) => serde_json::json!([TAG_STDIN, data]).to_string(),
            Self::Unmatched(raw) => raw.clone(),
        }
    }

    /// Window size after applying a `SetSize` to `current`.
    ///
    /// Returns `None` for every other variant.
    pub fn resized(&self, current: WindowSize) -> Option<WindowSize> {
        match *self {
            Self::SetSize { rows, cols, x, y } => Some(WindowSize {
                rows,
                cols,
                x: x.unwrap_or(current.x),
                y: y.unwrap_or(current.y),
            }),
            _ => None,
        }
    }
}

fn parse_set_size(fields: &[Value]) -> Option<ControlMessage> {
    let rows = dimension(fields.get(1)?)?;
    let cols = dimension(fields.get(2)?)?;
    // A 4-element array has no complete pixel pair; only rows/cols apply.
    let (x, y) = if fields.len() == MAX_CONTROL_FIELDS {
        (Some(dimension(&fields[3])?), Some(dimension(&fields[4])?))
    } else {
        (None, None)
    };
    Some(ControlMessage::SetSize { rows, cols, x, y })
}

fn dimension(value: &Value) -> Option<u16> {
    value.as_u64().and_then(|n| u16::try_from(n).ok())
}
