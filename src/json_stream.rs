//! Incremental extraction of JSON objects from streamed model text
//!
//! The model replies with a stream of text fragments, not framed messages. An
//! object may span many fragments, several objects may complete inside one
//! fragment, and arbitrary prose may surround them. [`JsonStreamExtractor`]
//! buffers the text and hands back every object as soon as its closing brace
//! arrives.

use serde_json::Value;
use tracing::debug;

/// Buffers longer than this without any `{` are considered noise
const MAX_UNBRACED_CHARS: usize = 2000;
/// Characters kept when noise is trimmed
const RETAINED_TAIL_CHARS: usize = 200;

/// Stateful accumulator that splits a text stream into JSON values.
#[derive(Debug, Default)]
pub struct JsonStreamExtractor {
    buffer: String,
}

impl JsonStreamExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every value completed by it, in stream order.
    ///
    /// Candidates that balance but fail to parse are dropped. An unbalanced
    /// candidate stays buffered until a later chunk closes it.
    pub fn process(&mut self, chunk: &str) -> Vec<Value> {
        self.buffer.push_str(chunk);
        let mut values = Vec::new();

        loop {
            let Some(start) = self.buffer.find('{') else {
                self.trim_noise();
                break;
            };

            let Some(end) = find_object_end(&self.buffer.as_bytes()[start..]) else {
                break;
            };
            let end = start + end;

            let candidate: String = self.buffer[start..=end]
                .chars()
                .filter(|c| *c != '\n')
                .collect();
            self.buffer.drain(..=end);

            match serde_json::from_str::<Value>(&candidate) {
                Ok(value) => values.push(value),
                Err(e) => debug!("Discarding malformed candidate ({}): {}", e, candidate),
            }
        }

        values
    }

    /// Text received but not yet extracted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Forget any partially received object.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn trim_noise(&mut self) {
        let chars = self.buffer.chars().count();
        if chars <= MAX_UNBRACED_CHARS {
            return;
        }
        let cut = self
            .buffer
            .char_indices()
            .nth(chars - RETAINED_TAIL_CHARS)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        self.buffer.drain(..cut);
    }
}

/// Offset of the brace closing the object that opens at `text[0]`.
///
/// Works on bytes: every structural character is ASCII and never appears
/// inside a multi-byte UTF-8 sequence.
fn find_object_end(text: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &byte) in text.iter().enumerate() {
        if in_string {
            if byte == b'\\' && !escape {
                escape = true;
            } else if byte == b'"' && !escape {
                in_string = false;
            } else {
                escape = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
