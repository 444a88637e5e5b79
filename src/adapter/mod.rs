use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::dev;
use crate::types::{
    Host, HookBehavior, HookDecision, HookEvent, HookOutput, HookSpecificOutput,
    HistoryKeySource, PlanReviewDecision, PlanReviewRequest, ToolCallOutput, ToolCallPayload,
    ToolCallVerdict,
};

#[cfg(test)]
mod tests;

// ===================================================================
// Adapter selection
// ===================================================================

/// Which host protocol handles this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Claude,
    Opencode,
}

/// Structural classification of the stdin payload, used to pick an adapter
/// when the environment does not pin one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent {
    /// Claude Code hook event: `tool_input` object or a PermissionRequest
    /// event name.
    Hook,
    /// OpenCode tool call: a `submit_plan` discriminator or an explicit
    /// opencode host hint.
    ToolCall,
    /// Blank, unparsable, or ambiguous input.
    Unrecognized,
}

/// Classify stdin without committing to a full parse. Checks run in order:
/// explicit tool-call discriminators first, then the host hint, then hook
/// event markers.
pub fn classify(stdin_text: &str) -> InboundEvent {
    if stdin_text.trim().is_empty() {
        return InboundEvent::Unrecognized;
    }
    let value: Value = match serde_json::from_str(stdin_text) {
        Ok(value) => value,
        Err(_) => return InboundEvent::Unrecognized,
    };

    let command = string_field(&value, "command").or_else(|| string_field(&value, "tool"));
    if command.as_deref() == Some("submit_plan") {
        return InboundEvent::ToolCall;
    }
    if string_field(&value, "host").map(|host| host.to_lowercase()).as_deref() == Some("opencode")
    {
        return InboundEvent::ToolCall;
    }
    if value.get("tool_input").is_some_and(Value::is_object)
        || string_field(&value, "hook_event_name").as_deref() == Some("PermissionRequest")
    {
        return InboundEvent::Hook;
    }
    InboundEvent::Unrecognized
}

pub fn select_adapter(config: &RuntimeConfig, event: InboundEvent) -> AdapterKind {
    if let Some(kind) = config.host_override {
        return kind;
    }
    match event {
        InboundEvent::ToolCall => AdapterKind::Opencode,
        // Ambiguous input falls back to the hook adapter.
        InboundEvent::Hook | InboundEvent::Unrecognized => AdapterKind::Claude,
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field)?.as_str().map(str::to_string)
}

// ===================================================================
// Request parsing
// ===================================================================

/// A controlled parse failure. The session emits the captured streams
/// verbatim and exits with the given code; for OpenCode this is a soft deny
/// on stdout with exit 0, never a hard error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub exit_code: i32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl ParseFailure {
    fn hard(message: &str) -> Self {
        Self {
            exit_code: 1,
            stdout: None,
            stderr: Some(message.to_string()),
        }
    }

    fn soft_deny(feedback: &str) -> Self {
        let output = ToolCallOutput {
            ok: false,
            decision: ToolCallVerdict::Deny,
            feedback: Some(feedback.to_string()),
            message: feedback.to_string(),
        };
        Self {
            exit_code: 0,
            stdout: Some(serde_json::to_string(&output).expect("Failed to serialize output")),
            stderr: None,
        }
    }
}

pub fn parse_request(
    kind: AdapterKind,
    stdin_text: &str,
    config: &RuntimeConfig,
) -> Result<PlanReviewRequest, ParseFailure> {
    if config.dev_mode {
        return Ok(dev_request(kind));
    }
    match kind {
        AdapterKind::Claude => parse_hook_request(stdin_text, config),
        AdapterKind::Opencode => parse_tool_call_request(stdin_text),
    }
}

fn parse_hook_request(
    stdin_text: &str,
    config: &RuntimeConfig,
) -> Result<PlanReviewRequest, ParseFailure> {
    let event: HookEvent = serde_json::from_str(stdin_text).map_err(|_| {
        ParseFailure::hard("open-plan-annotator: failed to parse stdin hook event\n")
    })?;

    let mut plan_content = event.plan().unwrap_or_default().to_string();
    if plan_content.is_empty() {
        plan_content = latest_plan_file(&config.plans_fallback_dir).unwrap_or_default();
    }
    if plan_content.is_empty() {
        return Err(ParseFailure::hard(
            "open-plan-annotator: no plan content found\n",
        ));
    }

    Ok(PlanReviewRequest {
        host: Host::Claude,
        history_key_source: event.history_key_source(),
        plan_content,
    })
}

fn parse_tool_call_request(stdin_text: &str) -> Result<PlanReviewRequest, ParseFailure> {
    let payload: ToolCallPayload = serde_json::from_str(stdin_text).map_err(|_| {
        ParseFailure::soft_deny(
            "OpenCode submit_plan payload was not valid JSON. Submit again with a JSON object containing a non-empty `plan`.",
        )
    })?;

    let command = non_blank(payload.command)
        .or_else(|| non_blank(payload.tool))
        .unwrap_or_else(|| "submit_plan".to_string());
    if command != "submit_plan" {
        return Err(ParseFailure::soft_deny(&format!(
            "Unsupported OpenCode command `{command}`. Expected `submit_plan`."
        )));
    }

    let Some(plan_content) = non_blank(payload.plan) else {
        return Err(ParseFailure::soft_deny(
            "No plan content was provided in OpenCode `submit_plan` payload (`plan`). Please include the full plan text and submit again.",
        ));
    };

    let metadata = payload.metadata.unwrap_or_default();
    let session_id = non_blank(payload.session_id).or_else(|| non_blank(metadata.session_id));
    let conversation_id =
        non_blank(payload.conversation_id).or_else(|| non_blank(metadata.conversation_id));
    let cwd = non_blank(payload.cwd)
        .or_else(|| non_blank(metadata.cwd))
        .or_else(|| {
            std::env::current_dir()
                .ok()
                .map(|dir| dir.to_string_lossy().into_owned())
        });

    Ok(PlanReviewRequest {
        host: Host::Opencode,
        plan_content,
        history_key_source: HistoryKeySource {
            opencode_session_id: session_id,
            opencode_conversation_id: conversation_id,
            cwd,
            hook_event_name: Some("submit_plan".to_string()),
            tool_name: Some("submit_plan".to_string()),
            ..HistoryKeySource::default()
        },
    })
}

fn dev_request(kind: AdapterKind) -> PlanReviewRequest {
    let cwd = std::env::current_dir()
        .ok()
        .map(|dir| dir.to_string_lossy().into_owned());
    let history_key_source = match kind {
        AdapterKind::Claude => HistoryKeySource {
            session_id: Some("dev-session".to_string()),
            hook_event_name: Some("PermissionRequest".to_string()),
            tool_name: Some("ExitPlanMode".to_string()),
            cwd,
            ..HistoryKeySource::default()
        },
        AdapterKind::Opencode => HistoryKeySource {
            opencode_session_id: Some("dev-session".to_string()),
            opencode_conversation_id: Some("dev-conversation".to_string()),
            cwd,
            ..HistoryKeySource::default()
        },
    };
    PlanReviewRequest {
        host: Host::Dev,
        plan_content: dev::DEV_PLAN.to_string(),
        history_key_source,
    }
}

/// Trim a string option, treating blank values as absent.
fn non_blank(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Newest `*.md` file in the plans directory, by modification time. Any
/// error on the way means no fallback plan.
fn latest_plan_file(plans_dir: &Path) -> Option<String> {
    let entries = fs::read_dir(plans_dir).ok()?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }
    let (_, path) = newest?;
    fs::read_to_string(path).ok().filter(|text| !text.is_empty())
}

// ===================================================================
// Decision formatting
// ===================================================================

/// Format the final decision as the host's single stdout line.
pub fn format_decision(kind: AdapterKind, decision: &PlanReviewDecision) -> String {
    match kind {
        AdapterKind::Claude => {
            let hook_decision = if decision.approved {
                HookDecision {
                    behavior: HookBehavior::Allow,
                    message: None,
                }
            } else {
                HookDecision {
                    behavior: HookBehavior::Deny,
                    message: Some(
                        decision
                            .feedback
                            .clone()
                            .unwrap_or_else(|| "Plan changes requested.".to_string()),
                    ),
                }
            };
            let output = HookOutput {
                hook_specific_output: HookSpecificOutput {
                    hook_event_name: "PermissionRequest".to_string(),
                    decision: hook_decision,
                },
            };
            serde_json::to_string(&output).expect("Failed to serialize output")
        }
        AdapterKind::Opencode => {
            let output = if decision.approved {
                ToolCallOutput {
                    ok: true,
                    decision: ToolCallVerdict::Approve,
                    feedback: None,
                    message: "Plan approved.".to_string(),
                }
            } else {
                ToolCallOutput {
                    ok: false,
                    decision: ToolCallVerdict::Deny,
                    feedback: Some(
                        decision
                            .feedback
                            .clone()
                            .unwrap_or_else(|| "Plan changes requested.".to_string()),
                    ),
                    message: "Plan changes requested.".to_string(),
                }
            };
            serde_json::to_string(&output).expect("Failed to serialize output")
        }
    }
}
