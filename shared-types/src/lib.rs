//! Shared types between the monitoring core and the web UI
//!
//! These types cross two boundaries:
//! - JSON over HTTP/WebSocket from the agent backend (lenient: historical
//!   payloads were produced by several backend generations)
//! - serialization to the UI layer (ts-rs export)
//!
//! Normalization of dynamically-shaped wire fields happens here, at the
//! deserialization boundary. Nothing downstream sees alternate field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Trace / Span model
// ============================================================================

/// Lifecycle status shared by traces and spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Running
    }
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One end-to-end execution of a backend task.
///
/// Invariant: `status = running` implies `ended_at` is absent;
/// a terminal status implies `ended_at` is present.
/// `child_traces`, when present, are ordered by creation time and represent
/// successive refinement turns within one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct Trace {
    pub id: String,
    #[serde(default)]
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input_prompt: String,
    /// Opaque serialized payload; may embed JSON, may not.
    #[serde(default)]
    pub final_output: Option<String>,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    /// Absent from list responses; populated by the detail endpoint.
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub operational_summary: Option<OperationalSummary>,
    #[serde(default)]
    pub child_traces: Vec<Trace>,
}

/// One sub-step within a trace's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct Span {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Some backends report this under `span_type` or `type`; all three
    /// wire names land in this one field.
    #[serde(alias = "span_type", alias = "type")]
    pub kind: SpanKind,
    #[serde(default)]
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    // llm_call
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub cached: Option<bool>,
    // tool_call
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<String>,
    #[serde(default)]
    pub tool_output: Option<String>,
    // handoff
    #[serde(default)]
    pub from_agent: Option<String>,
    #[serde(default)]
    pub to_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum SpanKind {
    Function,
    Agent,
    Handoff,
    Tool,
    LlmCall,
    ToolCall,
    AgentRun,
}

/// Backend-reported counters attached to a finished trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct OperationalSummary {
    #[serde(default)]
    pub cache_hits: u64,
    #[serde(default)]
    pub cache_misses: u64,
    #[serde(default)]
    pub extractions_attempted: u64,
    #[serde(default)]
    pub extraction_failures: u64,
}

/// Partial trace keyed by id, applied as a shallow merge.
///
/// Push events carry only the fields they know about; a later `trace_ended`
/// must overwrite status and final output without disturbing anything the
/// event did not carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceUpdate {
    pub id: String,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input_prompt: Option<String>,
    #[serde(default)]
    pub final_output: Option<String>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub total_duration_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub operational_summary: Option<OperationalSummary>,
}

impl TraceUpdate {
    /// Shallow merge: `None` fields leave the target untouched.
    pub fn apply(self, trace: &mut Trace) {
        if let Some(status) = self.status {
            trace.status = status;
        }
        if let Some(started_at) = self.started_at {
            trace.started_at = started_at;
        }
        if let Some(ended_at) = self.ended_at {
            trace.ended_at = Some(ended_at);
        }
        if let Some(input_prompt) = self.input_prompt {
            trace.input_prompt = input_prompt;
        }
        if let Some(final_output) = self.final_output {
            trace.final_output = Some(final_output);
        }
        if let Some(total_tokens) = self.total_tokens {
            trace.total_tokens = total_tokens;
        }
        if let Some(total_duration_ms) = self.total_duration_ms {
            trace.total_duration_ms = total_duration_ms;
        }
        if let Some(error) = self.error {
            trace.error = Some(error);
        }
        if let Some(summary) = self.operational_summary {
            trace.operational_summary = Some(summary);
        }
    }

    /// Seed a fresh trace from a partial update (unknown id path).
    pub fn into_trace(self) -> Trace {
        Trace {
            id: self.id,
            status: self.status.unwrap_or_default(),
            started_at: self.started_at.unwrap_or_else(Utc::now),
            ended_at: self.ended_at,
            input_prompt: self.input_prompt.unwrap_or_default(),
            final_output: self.final_output,
            total_tokens: self.total_tokens.unwrap_or(0),
            total_duration_ms: self.total_duration_ms.unwrap_or(0),
            error: self.error,
            spans: Vec::new(),
            operational_summary: self.operational_summary,
            child_traces: Vec::new(),
        }
    }
}

// ============================================================================
// Conversation model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One turn of a discovery conversation.
///
/// Appended, never mutated in place; the only removal path is the
/// error-state rollback of an optimistic user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct ConversationMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Trace that produced (assistant) or was triggered by (user) this turn.
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Result payload visible at this point in the conversation, kept so a
    /// user can rewind to an earlier turn without re-fetching.
    #[serde(default)]
    pub results_snapshot: Option<DiscoveryResult>,
}

impl ConversationMessage {
    /// Construct a live-session turn with a fresh id and wall-clock stamp.
    pub fn live(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            trace_id: None,
            results_snapshot: None,
        }
    }
}

/// Structured form of a trace's final output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct DiscoveryResult {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub no_results_message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl DiscoveryResult {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub retailer: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

// ============================================================================
// Push stream
// ============================================================================

/// Wire frame pushed by the backend event stream.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct PushEvent {
    pub event_type: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    #[ts(type = "unknown")]
    pub data: serde_json::Value,
}

/// Transport health of the push channel, surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

// ============================================================================
// Tests
// ============================================================================
