use super::*;
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------

fn test_config(tmp: &TempDir) -> RuntimeConfig {
    let config_dir = tmp.path().join("open-plan-annotator");
    RuntimeConfig {
        host_override: None,
        package_manager: "npm".to_string(),
        dev_mode: false,
        shutdown_delay: Duration::from_millis(1200),
        history_root: config_dir.join("history"),
        preferences_path: config_dir.join("preferences.json"),
        update_cache_path: config_dir.join("update-check.json"),
        plans_fallback_dir: tmp.path().join("plans"),
        config_dir,
    }
}

fn hook_event_json(plan: &str) -> String {
    format!(
        r#"{{
            "session_id": "sess-1",
            "transcript_path": "/tmp/sess-1.jsonl",
            "cwd": "/work",
            "hook_event_name": "PermissionRequest",
            "tool_name": "ExitPlanMode",
            "tool_input": {{ "plan": {plan} }}
        }}"#,
        plan = serde_json::to_string(plan).unwrap()
    )
}

fn soft_deny_feedback(failure: &ParseFailure) -> String {
    assert_eq!(failure.exit_code, 0);
    assert!(failure.stderr.is_none());
    let output: ToolCallOutput =
        serde_json::from_str(failure.stdout.as_deref().unwrap()).unwrap();
    assert!(!output.ok);
    assert_eq!(output.decision, ToolCallVerdict::Deny);
    assert_eq!(output.feedback.as_deref(), Some(output.message.as_str()));
    output.message
}

// ---------------------------------------------------------------
// Classification and selection
// ---------------------------------------------------------------

#[test]
fn submit_plan_discriminator_classifies_as_tool_call() {
    assert_eq!(
        classify(r#"{"command": "submit_plan", "plan": "p"}"#),
        InboundEvent::ToolCall
    );
    assert_eq!(
        classify(r#"{"tool": "submit_plan", "plan": "p"}"#),
        InboundEvent::ToolCall
    );
}

#[test]
fn opencode_host_hint_classifies_as_tool_call() {
    assert_eq!(
        classify(r#"{"host": "OpenCode", "plan": "p"}"#),
        InboundEvent::ToolCall
    );
}

#[test]
fn hook_markers_classify_as_hook() {
    assert_eq!(
        classify(r#"{"tool_input": {"plan": "p"}}"#),
        InboundEvent::Hook
    );
    assert_eq!(
        classify(r#"{"hook_event_name": "PermissionRequest"}"#),
        InboundEvent::Hook
    );
}

#[test]
fn blank_or_unparsable_input_is_unrecognized() {
    assert_eq!(classify(""), InboundEvent::Unrecognized);
    assert_eq!(classify("   \n"), InboundEvent::Unrecognized);
    assert_eq!(classify("{truncated"), InboundEvent::Unrecognized);
    assert_eq!(classify(r#"{"unrelated": true}"#), InboundEvent::Unrecognized);
}

#[test]
fn selection_defaults_to_claude_and_honors_the_override() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);

    assert_eq!(
        select_adapter(&config, InboundEvent::Unrecognized),
        AdapterKind::Claude
    );
    assert_eq!(
        select_adapter(&config, InboundEvent::ToolCall),
        AdapterKind::Opencode
    );

    config.host_override = Some(AdapterKind::Opencode);
    assert_eq!(
        select_adapter(&config, InboundEvent::Hook),
        AdapterKind::Opencode
    );
    config.host_override = Some(AdapterKind::Claude);
    assert_eq!(
        select_adapter(&config, InboundEvent::ToolCall),
        AdapterKind::Claude
    );
}

// ---------------------------------------------------------------
// Hook request parsing
// ---------------------------------------------------------------

#[test]
fn hook_request_carries_plan_and_key_material() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    let request = parse_request(
        AdapterKind::Claude,
        &hook_event_json("# Plan\n\nDo it."),
        &config,
    )
    .unwrap();

    assert_eq!(request.host, Host::Claude);
    assert_eq!(request.plan_content, "# Plan\n\nDo it.");
    assert_eq!(
        request.history_key_source.transcript_path.as_deref(),
        Some("/tmp/sess-1.jsonl")
    );
    assert_eq!(
        request.history_key_source.tool_name.as_deref(),
        Some("ExitPlanMode")
    );
}

#[test]
fn unparsable_hook_input_is_a_hard_failure() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    let failure = parse_request(AdapterKind::Claude, "not json at all", &config).unwrap_err();
    assert_eq!(failure.exit_code, 1);
    assert!(failure.stdout.is_none());
    assert_eq!(
        failure.stderr.as_deref(),
        Some("open-plan-annotator: failed to parse stdin hook event\n")
    );
}

#[test]
fn empty_plan_falls_back_to_newest_plans_file() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    fs::create_dir_all(&config.plans_fallback_dir).unwrap();
    fs::write(config.plans_fallback_dir.join("older.md"), "old plan").unwrap();
    std::thread::sleep(Duration::from_millis(25));
    fs::write(config.plans_fallback_dir.join("newer.md"), "new plan").unwrap();
    fs::write(config.plans_fallback_dir.join("ignored.txt"), "not a plan").unwrap();

    let request = parse_request(AdapterKind::Claude, &hook_event_json(""), &config).unwrap();
    assert_eq!(request.plan_content, "new plan");
}

#[test]
fn missing_plan_everywhere_is_a_hard_failure() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    let failure =
        parse_request(AdapterKind::Claude, r#"{"session_id": "s"}"#, &config).unwrap_err();
    assert_eq!(failure.exit_code, 1);
    assert_eq!(
        failure.stderr.as_deref(),
        Some("open-plan-annotator: no plan content found\n")
    );
}

// ---------------------------------------------------------------
// Tool-call request parsing
// ---------------------------------------------------------------

#[test]
fn tool_call_request_prefers_direct_fields_over_metadata() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let input = r#"{
        "command": "submit_plan",
        "plan": "  Ship the feature  ",
        "sessionId": "direct-session",
        "cwd": "/direct",
        "metadata": { "sessionId": "meta-session", "conversationId": "meta-conv", "cwd": "/meta" }
    }"#;

    let request = parse_request(AdapterKind::Opencode, input, &config).unwrap();
    assert_eq!(request.host, Host::Opencode);
    assert_eq!(request.plan_content, "Ship the feature");

    let source = &request.history_key_source;
    assert_eq!(source.opencode_session_id.as_deref(), Some("direct-session"));
    assert_eq!(source.opencode_conversation_id.as_deref(), Some("meta-conv"));
    assert_eq!(source.cwd.as_deref(), Some("/direct"));
    assert_eq!(source.hook_event_name.as_deref(), Some("submit_plan"));
    assert_eq!(source.tool_name.as_deref(), Some("submit_plan"));
    assert!(source.transcript_path.is_none());
}

#[test]
fn tool_call_without_cwd_uses_the_process_directory() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let input = r#"{"command": "submit_plan", "plan": "p"}"#;

    let request = parse_request(AdapterKind::Opencode, input, &config).unwrap();
    let expected = std::env::current_dir().unwrap();
    assert_eq!(
        request.history_key_source.cwd.as_deref(),
        Some(expected.to_string_lossy().as_ref())
    );
}

#[test]
fn invalid_tool_call_json_soft_denies() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    let failure = parse_request(AdapterKind::Opencode, "{broken", &config).unwrap_err();
    assert_eq!(
        soft_deny_feedback(&failure),
        "OpenCode submit_plan payload was not valid JSON. Submit again with a JSON object containing a non-empty `plan`."
    );
}

#[test]
fn unsupported_command_soft_denies_with_the_command_name() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    let failure = parse_request(
        AdapterKind::Opencode,
        r#"{"command": "run_tests", "plan": "p"}"#,
        &config,
    )
    .unwrap_err();
    assert_eq!(
        soft_deny_feedback(&failure),
        "Unsupported OpenCode command `run_tests`. Expected `submit_plan`."
    );
}

#[test]
fn missing_or_blank_plan_soft_denies() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let expected = "No plan content was provided in OpenCode `submit_plan` payload (`plan`). Please include the full plan text and submit again.";

    for input in [
        r#"{"command": "submit_plan"}"#,
        r#"{"command": "submit_plan", "plan": "   "}"#,
        // Absent command defaults to submit_plan and still requires a plan.
        r#"{"sessionId": "oc-1"}"#,
    ] {
        let failure = parse_request(AdapterKind::Opencode, input, &config).unwrap_err();
        assert_eq!(soft_deny_feedback(&failure), expected);
    }
}

// ---------------------------------------------------------------
// Development mode
// ---------------------------------------------------------------

#[test]
fn dev_mode_ignores_stdin_and_serves_the_canned_plan() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.dev_mode = true;

    let request = parse_request(AdapterKind::Claude, "", &config).unwrap();
    assert_eq!(request.host, Host::Dev);
    assert_eq!(request.plan_content, crate::dev::DEV_PLAN);
    assert_eq!(
        request.history_key_source.session_id.as_deref(),
        Some("dev-session")
    );
    assert_eq!(
        request.history_key_source.tool_name.as_deref(),
        Some("ExitPlanMode")
    );

    let request = parse_request(AdapterKind::Opencode, "garbage", &config).unwrap();
    assert_eq!(request.host, Host::Dev);
    assert_eq!(
        request.history_key_source.opencode_session_id.as_deref(),
        Some("dev-session")
    );
    assert_eq!(
        request
            .history_key_source
            .opencode_conversation_id
            .as_deref(),
        Some("dev-conversation")
    );
    assert!(request.history_key_source.session_id.is_none());
}

// ---------------------------------------------------------------
// Decision formatting
// ---------------------------------------------------------------

fn decision(approved: bool, feedback: Option<&str>) -> PlanReviewDecision {
    PlanReviewDecision {
        approved,
        feedback: feedback.map(str::to_string),
        annotations: None,
    }
}

#[test]
fn claude_approval_emits_the_allow_envelope() {
    let line = format_decision(AdapterKind::Claude, &decision(true, None));
    assert_eq!(
        line,
        r#"{"hookSpecificOutput":{"hookEventName":"PermissionRequest","decision":{"behavior":"allow"}}}"#
    );
}

#[test]
fn claude_denial_carries_feedback_or_the_default_message() {
    let line = format_decision(AdapterKind::Claude, &decision(false, Some("## Feedback")));
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["hookSpecificOutput"]["decision"]["behavior"], "deny");
    assert_eq!(
        value["hookSpecificOutput"]["decision"]["message"],
        "## Feedback"
    );

    let line = format_decision(AdapterKind::Claude, &decision(false, None));
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(
        value["hookSpecificOutput"]["decision"]["message"],
        "Plan changes requested."
    );
}

#[test]
fn opencode_decisions_use_the_tool_call_result_shape() {
    let line = format_decision(AdapterKind::Opencode, &decision(true, None));
    assert_eq!(
        line,
        r#"{"ok":true,"decision":"approve","message":"Plan approved."}"#
    );

    let line = format_decision(AdapterKind::Opencode, &decision(false, Some("fix step 3")));
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["ok"], false);
    assert_eq!(value["decision"], "deny");
    assert_eq!(value["feedback"], "fix step 3");
    assert_eq!(value["message"], "Plan changes requested.");
}
