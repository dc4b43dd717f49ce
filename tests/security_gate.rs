mod common;

use common::{
    ChannelBroker, ScriptedPlanner, SpyTool, build_harness, permissive_security, shell_action,
};
use deskpilot::orchestrator::PlannerStep;
use deskpilot::security::{ApprovalDecision, AutoApproveBroker, AutoDenyBroker, RuleKind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

#[tokio::test]
async fn disallowed_command_never_reaches_the_tool() {
    let tmp = TempDir::new().unwrap();
    let (spy, calls) = SpyTool::always_ok("shell");
    let planner = Arc::new(ScriptedPlanner::new(vec![PlannerStep::Actions(vec![
        shell_action("curl https://example.com"),
    ])]));

    let harness = build_harness(
        tmp.path(),
        &permissive_security(),
        Box::new(AutoApproveBroker),
        vec![Box::new(spy)],
        planner,
        5,
    );

    let report = harness.orchestrator.run_objective("fetch a page").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0, "tool must never be invoked");
    assert!(!report.success);
    assert!(report.failure.as_deref().unwrap().contains("disallowed_command"));
    // Fatal denial aborts immediately: one record, no further planning rounds.
    assert_eq!(report.iterations, 1);
    assert!(report.action_log[0].violation.is_some());
}

#[tokio::test]
async fn disallowed_path_never_reaches_the_tool() {
    let tmp = TempDir::new().unwrap();
    let (spy, calls) = SpyTool::always_ok("file_read");
    let mut args = serde_json::Map::new();
    args.insert("path".into(), serde_json::json!("/etc/passwd"));
    let action = deskpilot::tools::Action::new("file_read", args);

    let planner = Arc::new(ScriptedPlanner::new(vec![PlannerStep::Actions(vec![action])]));
    let harness = build_harness(
        tmp.path(),
        &permissive_security(),
        Box::new(AutoApproveBroker),
        vec![Box::new(spy)],
        planner,
        5,
    );

    let report = harness.orchestrator.run_objective("read passwd").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!report.success);
    assert!(report.failure.as_deref().unwrap().contains("disallowed_path"));
}

#[tokio::test]
async fn denied_approval_results_in_zero_executions() {
    let tmp = TempDir::new().unwrap();
    let (spy, calls) = SpyTool::always_ok("shell");
    let mut security = permissive_security();
    security.allowed_commands.push("rm".into());

    let planner = Arc::new(ScriptedPlanner::new(vec![PlannerStep::Actions(vec![
        shell_action("rm junk.txt"),
    ])]));

    let harness = build_harness(
        tmp.path(),
        &security,
        Box::new(AutoDenyBroker {
            reason: "operator said no".into(),
        }),
        vec![Box::new(spy)],
        planner,
        5,
    );

    let report = harness.orchestrator.run_objective("clean up").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // Approval denial is terminal for the action, not the run: the planner
    // got another round and reported done.
    assert!(report.success);
    let violation = report.action_log[0].violation.as_ref().unwrap();
    assert_eq!(violation.rule_kind, RuleKind::PendingApproval);
}

#[tokio::test]
async fn approved_action_executes_exactly_once() {
    let tmp = TempDir::new().unwrap();
    let (spy, calls) = SpyTool::always_ok("shell");
    let mut security = permissive_security();
    security.allowed_commands.push("rm".into());

    let planner = Arc::new(ScriptedPlanner::new(vec![PlannerStep::Actions(vec![
        shell_action("rm junk.txt"),
    ])]));

    let harness = build_harness(
        tmp.path(),
        &security,
        Box::new(AutoApproveBroker),
        vec![Box::new(spy)],
        planner,
        5,
    );

    let report = harness.orchestrator.run_objective("clean up").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(report.success);
    assert!(report.action_log[0].result.as_ref().unwrap().success);
}

#[tokio::test]
async fn execution_blocks_until_the_approval_resolves() {
    let tmp = TempDir::new().unwrap();
    let (spy, calls) = SpyTool::always_ok("shell");
    let mut security = permissive_security();
    security.allowed_commands.push("rm".into());
    security.approval_timeout_secs = 30;

    let (broker, decision_tx) = ChannelBroker::new();
    let planner = Arc::new(ScriptedPlanner::new(vec![PlannerStep::Actions(vec![
        shell_action("rm junk.txt"),
    ])]));

    let harness = build_harness(
        tmp.path(),
        &security,
        Box::new(broker),
        vec![Box::new(spy)],
        planner,
        5,
    );

    let run = tokio::spawn(async move {
        harness.orchestrator.run_objective("clean up").await.unwrap()
    });

    // The run is parked on the approval wait; nothing may have executed.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    decision_tx.send(ApprovalDecision::Approved).unwrap();
    let report = run.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(report.success);
}

#[tokio::test]
async fn dangerous_script_payload_blocks_with_zero_executions() {
    let tmp = TempDir::new().unwrap();
    let (spy, calls) = SpyTool::always_ok("run_script");
    let spy = spy.with_payload_args(&["code"]).requiring_approval();

    let mut args = serde_json::Map::new();
    args.insert(
        "code".into(),
        serde_json::json!("import os\nos.system('rm -rf /')"),
    );
    let action = deskpilot::tools::Action::new("run_script", args);

    let planner = Arc::new(ScriptedPlanner::new(vec![PlannerStep::Actions(vec![action])]));
    let harness = build_harness(
        tmp.path(),
        &permissive_security(),
        Box::new(AutoApproveBroker),
        vec![Box::new(spy)],
        planner,
        5,
    );

    let report = harness
        .orchestrator
        .run_objective("wipe the filesystem")
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!report.success);
    let failure = report.failure.as_deref().unwrap();
    assert!(failure.contains("dangerous_ast_pattern"), "got: {failure}");

    let violation = report.action_log[0].violation.as_ref().unwrap();
    assert_eq!(violation.rule_kind, RuleKind::DangerousAstPattern);
}
