use serde::{Deserialize, Serialize};
use serde_json::Value;


// ===================================================================
// Host protocol inputs
// ===================================================================

/// Host that submitted the plan under review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    Claude,
    Opencode,
    Dev,
}

/// Claude Code `PermissionRequest` hook event, as delivered on stdin.
///
/// Every field is optional: hook payloads vary across host versions and a
/// missing field must never fail the parse on its own.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookEvent {
    pub session_id: Option<String>,
    pub transcript_path: Option<String>,
    pub cwd: Option<String>,
    pub permission_mode: Option<String>,
    pub hook_event_name: Option<String>,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    /// Kept untyped: hosts send arbitrary shapes here and only the `plan`
    /// string inside matters.
    pub tool_input: Option<Value>,
}

impl HookEvent {
    /// Extract the plan text carried in `tool_input.plan`, if any.
    pub fn plan(&self) -> Option<&str> {
        self.tool_input.as_ref()?.get("plan")?.as_str()
    }

    pub fn history_key_source(&self) -> HistoryKeySource {
        HistoryKeySource {
            session_id: self.session_id.clone(),
            transcript_path: self.transcript_path.clone(),
            cwd: self.cwd.clone(),
            hook_event_name: self.hook_event_name.clone(),
            tool_name: self.tool_name.clone(),
            ..HistoryKeySource::default()
        }
    }
}

/// OpenCode `submit_plan` tool-call payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub command: Option<String>,
    pub tool: Option<String>,
    pub plan: Option<String>,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub cwd: Option<String>,
    pub metadata: Option<ToolCallMetadata>,
}

/// Nested metadata block some OpenCode versions use instead of top-level
/// identity fields. Direct fields win when both are present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolCallMetadata {
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub cwd: Option<String>,
}

// ===================================================================
// Session model
// ===================================================================

/// Identity material a session key can be derived from, in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryKeySource {
    pub session_id: Option<String>,
    pub transcript_path: Option<String>,
    pub cwd: Option<String>,
    pub hook_event_name: Option<String>,
    pub tool_name: Option<String>,
    pub opencode_session_id: Option<String>,
    pub opencode_conversation_id: Option<String>,
}

/// A successfully parsed review request, independent of which host sent it.
#[derive(Debug, Clone)]
pub struct PlanReviewRequest {
    pub host: Host,
    pub plan_content: String,
    pub history_key_source: HistoryKeySource,
}

/// The reviewer's verdict, produced exactly once per session.
#[derive(Debug, Clone)]
pub struct PlanReviewDecision {
    pub approved: bool,
    pub feedback: Option<String>,
    pub annotations: Option<Vec<Annotation>>,
}

// ===================================================================
// Annotations
// ===================================================================

/// A single localized edit request against one plan block.
///
/// Offsets are character positions within the block, half-open
/// `[start_offset, end_offset)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    pub block_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(default)]
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Deletion,
    Replacement,
    Insertion,
    Comment,
}

// ===================================================================
// Host protocol outputs
// ===================================================================

/// Envelope Claude Code expects on stdout for a hook decision.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    pub hook_specific_output: HookSpecificOutput,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    pub hook_event_name: String,
    pub decision: HookDecision,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDecision {
    pub behavior: HookBehavior,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookBehavior {
    Allow,
    Deny,
}

/// Single-line JSON result for an OpenCode `submit_plan` call.
#[derive(Debug, Serialize, Deserialize)]
pub struct ToolCallOutput {
    pub ok: bool,
    pub decision: ToolCallVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallVerdict {
    Approve,
    Deny,
}
