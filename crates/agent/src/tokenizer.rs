//! Stream tokenizer: splits one incrementally-arriving model output stream
//! into response text, private thoughts and tool calls.
//!
//! The model marks its channels inline:
//!
//! ```text
//! <think>reasoning</think>visible reply<tool_call>{"name": "...", "arguments": {...}}</tool_call>
//! ```
//!
//! Delimiters may arrive split across any number of chunks. Only a trailing
//! fragment that could still become a delimiter is withheld; everything else
//! in the Normal state is forwarded as soon as it arrives.

use jarvis_core::message::{ToolCallRequest, generate_call_id};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";
pub const TOOL_OPEN: &str = "<tool_call>";
pub const TOOL_CLOSE: &str = "</tool_call>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerState {
    Normal,
    Thinking,
    ToolDef,
}

/// One demultiplexed span of model output.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Response(String),
    /// Trimmed; never empty
    Thought(String),
    ToolCall {
        request: ToolCallRequest,
        /// The span between the tool-call delimiters, as received
        raw: String,
    },
}

#[derive(Debug)]
pub struct StreamTokenizer {
    state: TokenizerState,
    buffer: String,
    tool_tags: bool,
    /// A synthesized `<think>` from the reasoning side channel is open
    reasoning_open: bool,
}

impl Default for StreamTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTokenizer {
    /// A tokenizer that recognizes thinking and tool-call delimiters.
    pub fn new() -> Self {
        Self {
            state: TokenizerState::Normal,
            buffer: String::new(),
            tool_tags: true,
            reasoning_open: false,
        }
    }

    /// A tokenizer that recognizes thinking delimiters only. Used when tool
    /// calls arrive out of band, or not at all.
    pub fn without_tool_tags() -> Self {
        Self {
            tool_tags: false,
            ..Self::new()
        }
    }

    pub fn state(&self) -> TokenizerState {
        self.state
    }

    /// Feed a text fragment.
    pub fn push(&mut self, text: &str) -> Vec<Segment> {
        if self.reasoning_open {
            self.reasoning_open = false;
            self.buffer.push_str(THINK_CLOSE);
        }
        self.buffer.push_str(text);
        self.scan()
    }

    /// Feed a fragment reported through a backend's reasoning side field.
    /// It is treated as if wrapped in thinking delimiters.
    pub fn push_reasoning(&mut self, text: &str) -> Vec<Segment> {
        if !self.reasoning_open {
            self.reasoning_open = true;
            self.buffer.push_str(THINK_OPEN);
        }
        self.buffer.push_str(text);
        self.scan()
    }

    /// End of stream: release whatever is still buffered and reset to Normal.
    pub fn flush(&mut self) -> Vec<Segment> {
        let mut segments = if self.reasoning_open {
            self.reasoning_open = false;
            self.buffer.push_str(THINK_CLOSE);
            self.scan()
        } else {
            Vec::new()
        };

        let rest = std::mem::take(&mut self.buffer);
        match self.state {
            TokenizerState::Normal => {
                if !rest.is_empty() {
                    segments.push(Segment::Response(rest));
                }
            }
            TokenizerState::Thinking => segments.extend(thought(&rest)),
            TokenizerState::ToolDef => {
                debug!(bytes = rest.len(), "Discarding unterminated tool call at end of stream");
            }
        }
        self.state = TokenizerState::Normal;
        segments
    }

    fn scan(&mut self) -> Vec<Segment> {
        let mut segments = Vec::new();
        loop {
            let progressed = match self.state {
                TokenizerState::Normal => self.scan_normal(&mut segments),
                TokenizerState::Thinking => self.scan_thinking(&mut segments),
                TokenizerState::ToolDef => self.scan_tool_def(&mut segments),
            };
            if !progressed {
                return segments;
            }
        }
    }

    /// Returns true after a state transition, so the loop re-scans the
    /// remaining buffer in the new state.
    fn scan_normal(&mut self, out: &mut Vec<Segment>) -> bool {
        let openers: &[&str] = if self.tool_tags {
            &[THINK_OPEN, TOOL_OPEN]
        } else {
            &[THINK_OPEN]
        };

        if let Some((pos, delim)) = earliest(&self.buffer, openers) {
            if pos > 0 {
                out.push(Segment::Response(self.buffer[..pos].to_string()));
            }
            self.buffer.drain(..pos + delim.len());
            self.state = if delim == THINK_OPEN {
                TokenizerState::Thinking
            } else {
                TokenizerState::ToolDef
            };
            return true;
        }

        let keep = partial_suffix(&self.buffer, openers);
        let ready = self.buffer.len() - keep;
        if ready > 0 {
            out.push(Segment::Response(self.buffer[..ready].to_string()));
            self.buffer.drain(..ready);
        }
        false
    }

    fn scan_thinking(&mut self, out: &mut Vec<Segment>) -> bool {
        let closers: &[&str] = if self.tool_tags {
            &[THINK_CLOSE, TOOL_OPEN]
        } else {
            &[THINK_CLOSE]
        };

        let Some((pos, delim)) = earliest(&self.buffer, closers) else {
            return false;
        };
        out.extend(thought(&self.buffer[..pos]));
        self.buffer.drain(..pos + delim.len());
        self.state = if delim == THINK_CLOSE {
            TokenizerState::Normal
        } else {
            TokenizerState::ToolDef
        };
        true
    }

    fn scan_tool_def(&mut self, out: &mut Vec<Segment>) -> bool {
        let Some(pos) = self.buffer.find(TOOL_CLOSE) else {
            return false;
        };
        let raw: String = self.buffer[..pos].to_string();
        self.buffer.drain(..pos + TOOL_CLOSE.len());
        self.state = TokenizerState::Normal;

        match parse_tool_call(&raw) {
            Some(request) => out.push(Segment::ToolCall { request, raw }),
            None => warn!(payload = %raw.trim(), "Dropping malformed tool call"),
        }
        true
    }
}

fn thought(span: &str) -> Option<Segment> {
    let trimmed = span.trim();
    (!trimmed.is_empty()).then(|| Segment::Thought(trimmed.to_string()))
}

/// The first occurrence of any delimiter, with ties going to the earlier
/// entry in `delims`.
fn earliest<'d>(buffer: &str, delims: &[&'d str]) -> Option<(usize, &'d str)> {
    delims
        .iter()
        .filter_map(|d| buffer.find(d).map(|pos| (pos, *d)))
        .min_by_key(|(pos, _)| *pos)
}

/// Length of the trailing fragment that is a proper prefix of some delimiter.
///
/// Every delimiter starts with `<` and contains no other `<`, so only the
/// last `<` in the buffer can begin one.
fn partial_suffix(buffer: &str, delims: &[&str]) -> usize {
    let Some(pos) = buffer.rfind('<') else {
        return 0;
    };
    let tail = &buffer[pos..];
    if delims.iter().any(|d| d.len() > tail.len() && d.starts_with(tail)) {
        tail.len()
    } else {
        0
    }
}

/// Parse `{"name": ..., "arguments": {...}}`. Arguments may also arrive as a
/// JSON-encoded string holding an object.
pub fn parse_tool_call(raw: &str) -> Option<ToolCallRequest> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    let object = value.as_object()?;
    let name = object.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let arguments: Map<String, Value> = match object.get("arguments")? {
        Value::Object(map) => map.clone(),
        Value::String(encoded) => serde_json::from_str(encoded).ok()?,
        _ => return None,
    };
    Some(ToolCallRequest {
        id: generate_call_id(),
        name: name.to_string(),
        arguments,
    })
}
