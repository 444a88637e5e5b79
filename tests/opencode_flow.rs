mod common;

use common::{tool_call_event, TestHome};

#[tokio::test]
async fn approving_emits_the_tool_call_envelope() {
    let home = TestHome::new();
    let session = home.spawn_session(&tool_call_event("Refactor the cache layer", "oc-1"), &[]);

    let state: serde_json::Value = reqwest::get(session.url("/api/plan"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["plan"], "Refactor the cache layer");
    assert_eq!(state["version"], 1);

    reqwest::Client::new()
        .post(session.url("/api/approve"))
        .send()
        .await
        .unwrap();

    let output = session.finish();
    assert_eq!(output.code, 0);
    assert_eq!(
        output.stdout,
        "{\"ok\":true,\"decision\":\"approve\",\"message\":\"Plan approved.\"}\n"
    );
}

#[tokio::test]
async fn denying_returns_feedback_to_the_agent() {
    let home = TestHome::new();
    let session = home.spawn_session(&tool_call_event("Use polling for updates", "oc-2"), &[]);

    let body = serde_json::json!({
        "annotations": [{
            "type": "replacement",
            "text": "polling",
            "replacement": "a websocket push",
            "blockIndex": 0,
            "startOffset": 4,
            "endOffset": 11
        }]
    });
    reqwest::Client::new()
        .post(session.url("/api/deny"))
        .json(&body)
        .send()
        .await
        .unwrap();

    let output = session.finish();
    assert_eq!(output.code, 0);
    let decision: serde_json::Value = serde_json::from_str(output.stdout.trim()).unwrap();
    assert_eq!(decision["ok"], false);
    assert_eq!(decision["decision"], "deny");
    assert_eq!(decision["message"], "Plan changes requested.");
    let feedback = decision["feedback"].as_str().unwrap();
    assert!(feedback.contains("### Requested Replacements"), "got: {feedback}");
    assert!(feedback.contains("- Replace \"polling\" with \"a websocket push\""));
}

#[test]
fn invalid_json_soft_denies_instead_of_failing() {
    let home = TestHome::new();
    let (code, stdout, stderr) =
        home.run_once("{{{ nope", &[("OPEN_PLAN_ANNOTATOR_HOST", "opencode")]);
    assert_eq!(code, 0);
    assert!(stderr.is_empty(), "expected no stderr, got: {stderr}");
    let decision: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(decision["ok"], false);
    assert_eq!(decision["decision"], "deny");
    assert_eq!(
        decision["feedback"],
        "OpenCode submit_plan payload was not valid JSON. Submit again with a JSON object containing a non-empty `plan`."
    );
    assert_eq!(decision["feedback"], decision["message"]);
}

#[test]
fn unsupported_command_soft_denies() {
    // The `host` hint routes this to the OpenCode adapter without any env.
    let home = TestHome::new();
    let input = serde_json::json!({
        "host": "opencode",
        "command": "run_tests",
        "plan": "irrelevant"
    })
    .to_string();
    let (code, stdout, _) = home.run_once(&input, &[]);
    assert_eq!(code, 0);
    let decision: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(
        decision["feedback"],
        "Unsupported OpenCode command `run_tests`. Expected `submit_plan`."
    );
}

#[test]
fn missing_plan_soft_denies() {
    let home = TestHome::new();
    let input = serde_json::json!({ "command": "submit_plan", "sessionId": "oc-3" }).to_string();
    let (code, stdout, _) = home.run_once(&input, &[]);
    assert_eq!(code, 0);
    let decision: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(decision["ok"], false);
    assert_eq!(
        decision["feedback"],
        "No plan content was provided in OpenCode `submit_plan` payload (`plan`). Please include the full plan text and submit again."
    );
}

#[test]
fn host_override_beats_payload_classification() {
    // A well-formed tool call forced through the hook adapter has no
    // `tool_input`, so it fails the hook way.
    let home = TestHome::new();
    let (code, stdout, stderr) = home.run_once(
        &tool_call_event("some plan", "oc-4"),
        &[("OPEN_PLAN_ANNOTATOR_HOST", "claude")],
    );
    assert_eq!(code, 1);
    assert!(stdout.is_empty(), "expected no stdout, got: {stdout}");
    assert_eq!(stderr, "open-plan-annotator: no plan content found\n");
}
