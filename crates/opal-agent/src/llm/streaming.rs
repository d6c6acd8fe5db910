//! SSE stream parsing and delta accumulation.
//!
//! OpenAI-compatible servers stream chat completions as `data:` lines whose
//! JSON payloads carry `choices[0].delta` objects.  Text arrives as plain
//! content deltas; tool calls arrive as fragments keyed by `index` — the id
//! and name in the first fragment, argument JSON split across the rest.
//! The stream terminates with a `data: [DONE]` sentinel (a closed connection
//! is also treated as end-of-stream).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::types::{Message, StreamDelta, ToolCallFragment, Usage};

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

/// One parsed SSE line.
#[derive(Debug, Clone)]
pub enum SseLine {
    /// A content/tool-call/usage delta.
    Delta(StreamDelta),
    /// The `[DONE]` terminator.
    Done,
}

/// Parse a single SSE line.
///
/// Returns `Ok(None)` for lines that carry nothing for the accumulator
/// (blank lines, comments, `event:` fields, empty deltas).
pub fn parse_sse_line(line: &str) -> Result<Option<SseLine>> {
    let line = line.trim_end();

    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }
    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        // `event:` or other SSE fields; nothing to extract.
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(SseLine::Done));
    }

    let v: Value = serde_json::from_str(data).map_err(|e| AgentError::LlmParse {
        reason: format!("invalid JSON in SSE data: {e}"),
    })?;

    let mut delta = StreamDelta::default();

    let d = &v["choices"][0]["delta"];
    if let Some(text) = d["content"].as_str() {
        if !text.is_empty() {
            delta.content = Some(text.to_owned());
        }
    }
    if let Some(calls) = d["tool_calls"].as_array() {
        for call in calls {
            delta.tool_calls.push(ToolCallFragment {
                index: call["index"].as_u64().unwrap_or(0) as u32,
                id: call["id"].as_str().map(str::to_owned),
                name: call["function"]["name"].as_str().map(str::to_owned),
                arguments: call["function"]["arguments"]
                    .as_str()
                    .unwrap_or_default()
                    .to_owned(),
            });
        }
    }
    if v["usage"].is_object() {
        delta.usage = Some(parse_usage(&v["usage"]));
    }

    if delta.content.is_none() && delta.tool_calls.is_empty() && delta.usage.is_none() {
        return Ok(None);
    }
    Ok(Some(SseLine::Delta(delta)))
}

/// Extract a [`Usage`] from a provider `usage` object.
pub fn parse_usage(v: &Value) -> Usage {
    Usage {
        prompt_tokens: v["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: v["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: v["total_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// In-progress tool call assembled from fragments.
#[derive(Debug, Default)]
struct FragmentBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates [`StreamDelta`]s into a complete assistant message.
///
/// Tool-call ids are stable per `index` for the life of the stream; argument
/// strings are well-formed JSON only once the stream ends, so nothing here
/// attempts to parse them.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    builders: BTreeMap<u32, FragmentBuilder>,
    usage: Usage,
}

impl StreamAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta in.
    pub fn push(&mut self, delta: StreamDelta) {
        if let Some(text) = delta.content {
            self.content.push_str(&text);
        }
        for fragment in delta.tool_calls {
            let builder = self.builders.entry(fragment.index).or_default();
            if let Some(id) = fragment.id {
                builder.id = id;
            }
            if let Some(name) = fragment.name {
                builder.name = name;
            }
            builder.arguments.push_str(&fragment.arguments);
        }
        if let Some(usage) = delta.usage {
            self.usage = usage;
        }
    }

    /// Finish the stream: build the assistant message and usage.
    pub fn finish(self) -> (Message, Usage) {
        let tool_calls: Vec<_> = self
            .builders
            .into_values()
            .map(|b| crate::llm::types::ToolCall {
                id: b.id,
                name: b.name,
                arguments: b.arguments,
            })
            .collect();

        let message = if tool_calls.is_empty() {
            Message::assistant(self.content)
        } else {
            Message::assistant_tool_calls(self.content, tool_calls)
        };
        (message, self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_deltas_concatenate() {
        let mut acc = StreamAccumulator::new();
        for chunk in ["Hel", "lo", " world"] {
            if let Some(SseLine::Delta(d)) = parse_sse_line(&format!(
                r#"data: {{"choices":[{{"delta":{{"content":"{chunk}"}}}}]}}"#
            ))
            .unwrap()
            {
                acc.push(d);
            }
        }
        let (message, _) = acc.finish();
        assert_eq!(message.content, "Hello world");
        assert!(message.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_fragments_accumulate_by_index() {
        let lines = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"list_files","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"c2","function":{"name":"read_file","arguments":"{}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\".\"}"}}]}}]}"#,
        ];

        let mut acc = StreamAccumulator::new();
        for line in lines {
            if let Some(SseLine::Delta(d)) = parse_sse_line(line).unwrap() {
                acc.push(d);
            }
        }
        let (message, _) = acc.finish();

        assert_eq!(message.tool_calls.len(), 2);
        assert_eq!(message.tool_calls[0].id, "c1");
        assert_eq!(message.tool_calls[0].arguments, r#"{"path":"."}"#);
        assert_eq!(message.tool_calls[1].id, "c2");
        assert_eq!(message.tool_calls[1].name, "read_file");
    }

    #[test]
    fn usage_arrives_on_terminal_delta() {
        let mut acc = StreamAccumulator::new();
        let line = r#"data: {"choices":[{"delta":{}}],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        if let Some(SseLine::Delta(d)) = parse_sse_line(line).unwrap() {
            acc.push(d);
        }
        let (_, usage) = acc.finish();
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn done_sentinel_and_noise_lines() {
        assert!(matches!(
            parse_sse_line("data: [DONE]").unwrap(),
            Some(SseLine::Done)
        ));
        assert!(parse_sse_line("").unwrap().is_none());
        assert!(parse_sse_line(": keepalive").unwrap().is_none());
        assert!(parse_sse_line("event: message").unwrap().is_none());
        assert!(parse_sse_line("data: {not json").is_err());
    }
}
