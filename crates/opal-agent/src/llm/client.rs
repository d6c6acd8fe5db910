//! LLM client contract and OpenAI-compatible implementation.
//!
//! The engine consumes only the [`LlmClient`] trait: one-shot [`chat`] and
//! incremental [`chat_stream`].  [`OpenAiClient`] implements it against any
//! OpenAI-compatible chat-completions endpoint (OpenAI, Ollama, vLLM,
//! LMStudio); the endpoint, credentials, and model come from the request's
//! [`ModelProfile`], so one shared client serves every session and provider.
//!
//! [`chat`]: LlmClient::chat
//! [`chat_stream`]: LlmClient::chat_stream
//! [`ModelProfile`]: crate::profile::ModelProfile

use std::collections::VecDeque;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::llm::retry::{RetryConfig, retry_transient};
use crate::llm::streaming::{SseLine, parse_sse_line, parse_usage};
use crate::llm::types::{ChatRequest, ChatResponse, Message, StreamDelta, ToolCall};

/// A lazily produced, finite sequence of deltas; a completed stream is a
/// resolved request.
pub type DeltaStream = BoxStream<'static, Result<StreamDelta>>;

/// The contract the engine drives LLM providers through.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat request and return the full assembled response.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Send a chat request and return a stream of incremental deltas.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream>;
}

/// Client for OpenAI-compatible chat-completions endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    retry: RetryConfig,
}

impl OpenAiClient {
    /// Create a client with the default retry policy.
    pub fn new() -> Result<Self> {
        Self::with_retry(RetryConfig::default())
    }

    /// Create a client with an explicit retry policy.
    pub fn with_retry(retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::LlmTransport {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, retry })
    }

    /// Issue the POST, retrying transient failures, and return a response
    /// whose status is success.
    async fn send(&self, request: &ChatRequest, body: Value) -> Result<reqwest::Response> {
        let profile = &request.profile;
        let url = profile.chat_url();

        retry_transient(&self.retry, || {
            let mut req = self
                .http
                .post(&url)
                .timeout(profile.timeout)
                .json(&body);
            if !profile.api_key.is_empty() {
                req = req.bearer_auth(&profile.api_key);
            }
            async move {
                let resp = req.send().await?;
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                let reason = resp.text().await.unwrap_or_default();
                Err(AgentError::LlmHttp {
                    status: status.as_u16(),
                    reason,
                })
            }
        })
        .await
    }

    fn build_body(request: &ChatRequest, stream: bool) -> Value {
        let profile = &request.profile;
        let mut body = json!({
            "model": profile.model_id,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
            "stream": stream,
        });

        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        if let Some(t) = profile.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = profile.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if stream {
            // Ask for usage on the terminal delta; servers that do not
            // understand the option ignore it.
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = Self::build_body(request, false);
        let resp = self.send(request, body).await?;

        let v: Value = resp.json().await.map_err(|e| AgentError::LlmParse {
            reason: format!("invalid JSON response: {e}"),
        })?;

        let message = parse_wire_message(&v["choices"][0]["message"])?;
        debug!(
            model = %request.profile.model_id,
            tool_calls = message.tool_calls.len(),
            "chat response parsed"
        );
        Ok(ChatResponse {
            message,
            usage: parse_usage(&v["usage"]),
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream> {
        let body = Self::build_body(request, true);
        let resp = self.send(request, body).await?;

        let bytes = resp.bytes_stream().boxed();
        let stream = futures::stream::unfold(
            (bytes, String::new(), VecDeque::<String>::new(), false),
            |(mut bytes, mut buffer, mut lines, mut finished)| async move {
                loop {
                    while let Some(line) = lines.pop_front() {
                        match parse_sse_line(&line) {
                            Ok(Some(SseLine::Delta(delta))) => {
                                return Some((Ok(delta), (bytes, buffer, lines, finished)));
                            }
                            Ok(Some(SseLine::Done)) => return None,
                            Ok(None) => {}
                            Err(e) => {
                                finished = true;
                                return Some((Err(e), (bytes, buffer, lines, finished)));
                            }
                        }
                    }
                    if finished {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            buffer.push_str(&String::from_utf8_lossy(&chunk));
                            while let Some(pos) = buffer.find('\n') {
                                let line = buffer[..pos].trim_end_matches('\r').to_owned();
                                buffer.drain(..=pos);
                                lines.push_back(line);
                            }
                        }
                        Some(Err(e)) => {
                            finished = true;
                            return Some((
                                Err(AgentError::LlmStream {
                                    reason: e.to_string(),
                                }),
                                (bytes, buffer, lines, finished),
                            ));
                        }
                        // Channel close is a valid end-of-stream signal.
                        None => return None,
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}

// ---------------------------------------------------------------------------
// Wire mapping
// ---------------------------------------------------------------------------

fn wire_message(message: &Message) -> Value {
    let mut m = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        m["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments },
                })
            })
            .collect();
    }
    if let Some(id) = &message.tool_call_id {
        m["tool_call_id"] = json!(id);
    }
    if let Some(name) = &message.name {
        m["name"] = json!(name);
    }
    m
}

fn parse_wire_message(v: &Value) -> Result<Message> {
    if v.is_null() {
        return Err(AgentError::LlmParse {
            reason: "response has no choices[0].message".into(),
        });
    }

    let content = v["content"].as_str().unwrap_or_default().to_owned();
    let mut tool_calls = Vec::new();
    if let Some(calls) = v["tool_calls"].as_array() {
        for call in calls {
            tool_calls.push(ToolCall {
                id: call["id"].as_str().unwrap_or_default().to_owned(),
                name: call["function"]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_owned(),
                arguments: call["function"]["arguments"]
                    .as_str()
                    .unwrap_or_default()
                    .to_owned(),
            });
        }
    }

    Ok(if tool_calls.is_empty() {
        Message::assistant(content)
    } else {
        Message::assistant_tool_calls(content, tool_calls)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Role;
    use crate::profile::ModelProfile;
    use crate::tools::ToolDescriptor;

    fn request() -> ChatRequest {
        ChatRequest {
            profile: ModelProfile::openai_compatible(
                "ollama",
                "http://localhost:11434/v1",
                "",
                "qwen",
            ),
            messages: vec![
                Message::system("be brief"),
                Message::user("hi"),
                Message::assistant_tool_calls(
                    "",
                    vec![ToolCall {
                        id: "c1".into(),
                        name: "list_files".into(),
                        arguments: r#"{"path":"."}"#.into(),
                    }],
                ),
                Message::tool_result("c1", "3 files"),
            ],
            tools: vec![ToolDescriptor::new("list_files", "List files")],
        }
    }

    #[test]
    fn body_carries_messages_tools_and_sampling() {
        let body = OpenAiClient::build_body(&request(), false);
        assert_eq!(body["model"], "qwen");
        assert_eq!(body["messages"].as_array().unwrap().len(), 4);
        assert_eq!(body["messages"][3]["tool_call_id"], "c1");
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["name"],
            "list_files"
        );
        assert_eq!(body["tools"][0]["function"]["name"], "list_files");
        assert_eq!(body["stream"], false);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn streaming_body_requests_usage() {
        let body = OpenAiClient::build_body(&request(), true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn wire_message_parses_tool_calls() {
        let v = serde_json::json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "c9",
                "type": "function",
                "function": { "name": "bash", "arguments": "{\"cmd\":\"ls\"}" }
            }]
        });
        let m = parse_wire_message(&v).unwrap();
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.tool_calls[0].id, "c9");
        assert_eq!(m.tool_calls[0].arguments, "{\"cmd\":\"ls\"}");
    }
}
