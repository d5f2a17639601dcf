//! Inflight engine protocol types
//!
//! Message types for the inference engine's JSON call surface. The engine
//! owns the schema; these structs cover the subset the runtime reads and
//! writes, and pass everything else through untouched.

use serde::{Deserialize, Serialize};

/// Role of a chat message author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single chat message (role/content pair)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Author role
    pub role: Role,

    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Generation settings
///
/// The typed fields are the knobs the caller layer commonly sets. Anything
/// else is carried in `extra` and forwarded to the engine unvalidated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationSettings {
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling probability mass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Frequency penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    /// Presence penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    /// Engine-defined options passed through as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Stream options forwarded to the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamOptions {
    /// Request a trailing usage block with the final chunk
    #[serde(default)]
    pub include_usage: bool,
}

/// A chat-completion request payload as submitted to the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    /// Request identifier; the runtime is the authority on uniqueness
    pub request_id: String,

    /// Ordered conversation history
    pub messages: Vec<ChatMessage>,

    /// Generation settings
    #[serde(default)]
    pub settings: GenerationSettings,

    /// Whether results are streamed (always true on this surface)
    pub stream: bool,

    /// Stream options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

/// Why the engine stopped generating
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// Natural end of generation
    Stop,

    /// Context or max_tokens limit reached
    Length,

    /// Generation was cancelled
    Abort,

    /// Engine-side error ended the stream
    Error,
}

/// Incremental content delta within a streamed chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamDelta {
    /// New text since the previous chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A single choice within a streamed chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamChoice {
    /// Choice index within the chunk
    #[serde(default)]
    pub index: u32,

    /// Content delta
    #[serde(default)]
    pub delta: StreamDelta,

    /// Present on the final chunk of the stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Token usage reported by the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    /// Tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: u32,

    /// Tokens generated
    #[serde(default)]
    pub completion_tokens: u32,

    /// Prompt + completion
    #[serde(default)]
    pub total_tokens: u32,

    /// Engine performance metrics, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<UsageExtra>,
}

/// Extended performance metrics from the engine's usage block
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageExtra {
    /// Time to first token, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_s: Option<f64>,

    /// Prefill throughput, tokens per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefill_tokens_per_s: Option<f64>,

    /// Tokens processed during prefill
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefill_tokens: Option<u64>,

    /// Tokens accepted by jump-forward decoding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump_forward_tokens: Option<u64>,

    /// End-to-end request latency, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_to_end_latency_s: Option<f64>,

    /// Mean latency between tokens, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inter_token_latency_s: Option<f64>,

    /// Decode throughput, tokens per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_tokens_per_s: Option<f64>,

    /// Tokens processed during decode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_tokens: Option<u64>,
}

/// A streamed chunk as delivered by the engine callback
///
/// Chunks are tagged with the request id they belong to. A chunk may carry
/// content deltas, a finish reason, a trailing usage block, or an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionChunk {
    /// Request this chunk belongs to
    #[serde(alias = "request_id")]
    pub id: String,

    /// Choices in this chunk (empty for usage-only trailers)
    #[serde(default)]
    pub choices: Vec<StreamChoice>,

    /// Usage block, typically on the final chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Engine-side error message for this request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionChunk {
    /// Concatenated content deltas across all choices
    pub fn content(&self) -> String {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
            .collect()
    }

    /// First finish reason carried by this chunk, if any
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.iter().find_map(|c| c.finish_reason)
    }
}
