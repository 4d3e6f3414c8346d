//! Session-level event types (type + payload).
//!
//! Message-carrying variants use `serde_json::Value`; the server serializes
//! its `Message` type into that so this crate stays dependency-light.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One session event: the wire shape of a single SSE data frame.
/// The envelope (session_id, event_id) is applied separately.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Sent once when a client subscribes to the event stream.
    Connected { session_id: String },
    /// Keepalive; emitted roughly every 15 seconds.
    Ping,
    /// A model call has begun.
    GenerationStarted,
    /// One streamed fragment of model output.
    GenerationProgress { token: String },
    /// Assistant message finalized and persisted.
    GenerationComplete { message: Value },
    /// A non-assistant message was appended (tool output, hook output, system).
    MessageAdded { message: Value },
    /// A tool invocation awaits confirmation.
    ToolPending {
        tool_id: String,
        tooluse: Value,
        auto_confirm: bool,
    },
    /// Tool execution has begun.
    ToolExecuting { tool_id: String },
    /// Chat config updated (including auto-naming).
    ConfigChanged {
        config: Value,
        changed_fields: Vec<String>,
    },
    /// Generation or tool execution was cancelled.
    Interrupted,
    /// Unrecoverable error in the step worker.
    Error { error: String },
}

impl SessionEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// The `type` discriminator string, as it appears on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            SessionEvent::Connected { .. } => "connected",
            SessionEvent::Ping => "ping",
            SessionEvent::GenerationStarted => "generation_started",
            SessionEvent::GenerationProgress { .. } => "generation_progress",
            SessionEvent::GenerationComplete { .. } => "generation_complete",
            SessionEvent::MessageAdded { .. } => "message_added",
            SessionEvent::ToolPending { .. } => "tool_pending",
            SessionEvent::ToolExecuting { .. } => "tool_executing",
            SessionEvent::ConfigChanged { .. } => "config_changed",
            SessionEvent::Interrupted => "interrupted",
            SessionEvent::Error { .. } => "error",
        }
    }
}
