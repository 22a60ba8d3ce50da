use serde_json::json;
use std::time::{Duration, Instant};
use streamseg_core::{
    Conversation, LifecycleError, MessageController, ReconcileSettings, StreamMode, ToolCall,
    ToolStatus, TransitionReason,
};

fn settle(ctl: &mut MessageController, at: Instant) {
    let transition = ctl.poll(at).expect("settle timer should fire");
    assert_eq!(transition.to, StreamMode::Stable);
}

#[test]
fn test_two_delta_bare_object() {
    let t0 = Instant::now();
    let mut ctl = MessageController::new(ReconcileSettings::default());

    ctl.append("{\"tool\":\"write_file\",\"args\":{\"pat", t0);
    let view = ctl.view();
    assert!(view.tool_calls.is_empty());
    assert!(view.in_progress.is_some());

    ctl.append("h\":\"x.txt\",\"content\":\"hi\"}}", t0 + Duration::from_millis(50));
    let view = ctl.view();
    assert_eq!(view.tool_calls.len(), 1);
    assert_eq!(view.tool_calls[0].args["path"], json!("x.txt"));
    assert!(view.in_progress.is_none());
}

#[test]
fn test_approval_preserved_across_growth() {
    let t0 = Instant::now();
    let mut ctl = MessageController::new(ReconcileSettings::default());
    ctl.append("Listing. {\"tool\":\"shell\",\"args\":{\"command\":\"ls\"}}", t0);
    settle(&mut ctl, t0 + Duration::from_secs(1));

    let id = ctl.view().tool_calls[0].id.clone();
    ctl.approve(&id, t0 + Duration::from_secs(1)).unwrap();

    // Large growth well after the last transition reopens streaming
    let more = format!(" {}", "Waiting for the output of the command to come back. ".repeat(3));
    let transition = ctl.append(&more, t0 + Duration::from_secs(3)).unwrap();
    assert_eq!(transition.to, StreamMode::Streaming);

    let view = ctl.view();
    assert_eq!(view.tool_calls.len(), 1);
    assert_eq!(view.tool_calls[0].id, id);
    assert_eq!(view.tool_calls[0].status, ToolStatus::Approved);
}

#[test]
fn test_terminal_status_is_monotonic() {
    let t0 = Instant::now();
    let mut ctl = MessageController::new(ReconcileSettings::default());
    ctl.append("{\"tool\":\"a\",\"args\":{\"x\":0}} {\"tool\":\"b\",\"args\":{}}", t0);
    let settled = t0 + Duration::from_secs(1);
    settle(&mut ctl, settled);

    let ids: Vec<_> = ctl.view().tool_calls.iter().map(|c| c.id.clone()).collect();
    ctl.reject(&ids[0], settled).unwrap();
    ctl.approve(&ids[1], settled).unwrap();
    ctl.record_result(&ids[1], json!("boom"), false, settled).unwrap();

    assert!(matches!(
        ctl.approve(&ids[0], settled),
        Err(LifecycleError::InvalidTransition { .. })
    ));
    assert!(ctl.reject(&ids[1], settled).is_err());

    // Re-parse of a rewritten snapshot leaves both calls where they were
    ctl.update(
        "{\"tool\":\"a\",\"args\":{\"x\":1}} {\"tool\":\"b\",\"args\":{}} and more",
        settled + Duration::from_millis(10),
    );
    let view = ctl.view();
    assert_eq!(view.tool_calls.len(), 2);
    assert_eq!(view.tool_calls[0].status, ToolStatus::Rejected);
    assert_eq!(view.tool_calls[0].args["x"], json!(0));
    assert_eq!(view.tool_calls[1].status, ToolStatus::Failed);
    assert_eq!(view.tool_calls[1].result, Some(json!("boom")));
}

#[test]
fn test_identity_survives_bare_to_fenced() {
    let t0 = Instant::now();
    let mut ctl = MessageController::new(ReconcileSettings::default());

    // Before the closing fence arrives the object parses as a bare call
    ctl.append("```json\n{\"tool\":\"read_file\",\"args\":{\"path\":\"a\"}}", t0);
    let first = ctl.view();
    assert_eq!(first.tool_calls.len(), 1);
    assert_eq!(first.clean_content, "```json");

    ctl.append("\n```\nDone.", t0 + Duration::from_millis(20));
    let second = ctl.view();
    assert_eq!(second.tool_calls.len(), 1);
    assert_eq!(second.tool_calls[0].id, first.tool_calls[0].id);
    assert_eq!(second.tool_calls[0].start_offset, Some(0));
    assert_eq!(second.clean_content, "Done.");
}

#[test]
fn test_auto_approve_after_settle() {
    let settings = ReconcileSettings {
        auto_approve: true,
        ..ReconcileSettings::default()
    };
    let t0 = Instant::now();
    let mut ctl = MessageController::new(settings);
    ctl.append("{\"tool\":\"shell\",\"args\":{}}", t0);
    assert_eq!(ctl.view().tool_calls[0].status, ToolStatus::Pending);

    settle(&mut ctl, t0 + Duration::from_secs(1));
    assert_eq!(ctl.view().tool_calls[0].status, ToolStatus::Approved);
}

#[test]
fn test_settle_misfire_is_superseded_by_growth() {
    let t0 = Instant::now();
    let mut ctl = MessageController::new(ReconcileSettings::default());
    ctl.append("a", t0);
    ctl.append("b", t0 + Duration::from_millis(900));

    // The first deadline has passed but growth moved it
    assert_eq!(ctl.poll(t0 + Duration::from_millis(1000)), None);
    assert_eq!(ctl.mode(), StreamMode::Streaming);
    settle(&mut ctl, t0 + Duration::from_millis(1900));
}

#[test]
fn test_persisted_history_resolves_immediately() {
    let stored: Vec<ToolCall> = serde_json::from_value(json!([
        {"id": "c1", "tool": "read_file", "args": {"path": "a"}, "status": "completed", "result": "aaa"},
        {"id": "c2", "tool": "shell", "args": {"command": "ls"}, "status": "failed", "result": {"code": 1}}
    ]))
    .unwrap();

    let mut conversation = Conversation::new(ReconcileSettings::default());
    conversation.load_persisted("m1", stored);
    let transition = conversation
        .update(
            "m1",
            "{\"tool\":\"read_file\",\"args\":{\"path\":\"a\"}}\nthen\n{\"tool\":\"shell\",\"args\":{\"command\":\"ls\"}}",
            Instant::now(),
        )
        .unwrap();

    assert_eq!(transition.reason, TransitionReason::ToolCallsResolved);
    let view = conversation.view("m1").unwrap();
    let ids: Vec<_> = view.segments.iter().filter_map(|s| s.tool_call_id()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    assert_eq!(view.clean_content, "then");
}
