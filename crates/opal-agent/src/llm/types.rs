//! Core types for LLM interaction.
//!
//! These types model the data flowing between the engine and LLM providers.
//! They are provider-agnostic at this layer; the [`super::client`] module
//! translates them into the OpenAI-compatible wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::ToolDescriptor;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the LLM.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

impl Role {
    /// The lowercase string stored in the session log.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// A tool invocation requested by the LLM.
///
/// `arguments` is the raw JSON string exactly as the model emitted it; the
/// gateway parses and validates it at invocation time, never earlier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier assigned by the LLM for correlating results.
    pub id: String,
    /// The name of the tool to invoke.
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,

    /// The textual content.  May be empty for assistant turns that carry
    /// only tool calls.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant (assistant turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which tool call this message answers (tool turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Optional participant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    /// Whether this message is a compression summary.
    #[serde(default)]
    pub is_compressed: bool,

    /// The original sequence a compression summary replaces, retained so
    /// expansion is lossless.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_messages: Vec<Message>,
}

impl Message {
    fn base(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            metadata: Map::new(),
            is_compressed: false,
            source_messages: Vec::new(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content.into())
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content.into())
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content.into())
    }

    /// Create an assistant message that carries tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut m = Self::base(Role::Assistant, content.into());
        m.tool_calls = tool_calls;
        m
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::base(Role::Tool, content.into());
        m.tool_call_id = Some(tool_call_id.into());
        m
    }

    /// Create a compression summary replacing `sources`.
    pub fn compressed(summary: impl Into<String>, sources: Vec<Message>) -> Self {
        let mut m = Self::base(Role::Assistant, summary.into());
        m.is_compressed = true;
        m.source_messages = sources;
        m
    }
}

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// A full request to send to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// The resolved model binding for this run.
    pub profile: crate::profile::ModelProfile,

    /// The conversation window.
    pub messages: Vec<Message>,

    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDescriptor>,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens generated by the model.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Provider-reported total (prompt + completion).
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// The assembled response from one LLM turn.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The assistant message (content, tool calls, or both).
    pub message: Message,
    /// Token usage for the turn (zeroed when the provider omits it).
    pub usage: Usage,
}

// ---------------------------------------------------------------------------
// Streaming deltas
// ---------------------------------------------------------------------------

/// A fragment of an in-progress tool call, keyed by `index`.
///
/// The id and name arrive on the first fragment for an index; argument JSON
/// arrives in pieces across subsequent fragments.
#[derive(Debug, Clone, Default)]
pub struct ToolCallFragment {
    /// Position in the assistant's tool_calls array.
    pub index: u32,
    /// Call id (first fragment only).
    pub id: Option<String>,
    /// Tool name (first fragment only).
    pub name: Option<String>,
    /// A piece of the arguments JSON string.
    pub arguments: String,
}

/// One incremental delta from a streaming chat response.
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    /// A piece of assistant text content.
    pub content: Option<String>,
    /// Tool-call fragments carried by this delta.
    pub tool_calls: Vec<ToolCallFragment>,
    /// Usage, populated on the terminal delta when the provider supplies it.
    pub usage: Option<Usage>,
}

/// Rough token estimate used by the compression trigger (≈ 4 chars/token).
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages
        .iter()
        .map(|m| {
            m.content.len()
                + m.tool_calls
                    .iter()
                    .map(|c| c.name.len() + c.arguments.len())
                    .sum::<usize>()
        })
        .sum();
    chars / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);

        let tool = Message::tool_result("c1", "ok");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn compressed_retains_sources() {
        let sources = vec![Message::user("a"), Message::assistant("b")];
        let summary = Message::compressed("a then b", sources.clone());
        assert!(summary.is_compressed);
        assert_eq!(summary.source_messages, sources);
    }

    #[test]
    fn role_string_round_trip() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("bogus"), None);
    }

    #[test]
    fn token_estimate_scales_with_content() {
        let short = vec![Message::user("hi")];
        let long = vec![Message::user("x".repeat(4000))];
        assert!(estimate_tokens(&long) > estimate_tokens(&short));
        assert_eq!(estimate_tokens(&long), 1000);
    }
}
