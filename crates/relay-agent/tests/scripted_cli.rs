//! Drives a conversation against a scripted stand-in for the Claude CLI
//! over in-memory pipes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use relay_agent::{drive, AgentError, AgentTask, Result, RunSummary, ToolPolicy};
use relay_core::PermissionMode;
use relay_gate::{AgentSession, ChannelNotifier, Coordinator, GateConfig, GateEvent};
use relay_models::{Choice, PendingApproval, RiskLevel};
use relay_stream::OutputStream;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

struct FakeCli {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    out: WriteHalf<DuplexStream>,
}

impl FakeCli {
    async fn read(&mut self) -> Value {
        let line = self
            .lines
            .next_line()
            .await
            .unwrap()
            .expect("driver closed stdin");
        serde_json::from_str(&line).unwrap()
    }

    async fn write(&mut self, message: Value) {
        self.write_raw(&message.to_string()).await;
    }

    async fn write_raw(&mut self, line: &str) {
        self.out.write_all(line.as_bytes()).await.unwrap();
        self.out.write_all(b"\n").await.unwrap();
        self.out.flush().await.unwrap();
    }

    /// Consume the handshake and return the prompt text.
    async fn handshake(&mut self) -> String {
        let init = self.read().await;
        assert_eq!(init["type"], "control_request");
        assert_eq!(init["request"]["subtype"], "initialize");

        let user = self.read().await;
        assert_eq!(user["type"], "user");
        user["message"]["content"].as_str().unwrap().to_string()
    }

    async fn ask(&mut self, request_id: &str, tool: &str, input: Value) {
        self.write(json!({
            "type": "control_request",
            "request_id": request_id,
            "request": {"subtype": "can_use_tool", "tool_name": tool, "input": input},
        }))
        .await;
    }

    async fn finish(&mut self) {
        self.write(json!({
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "result": "done",
            "session_id": "conv-42",
            "total_cost_usd": 0.0125,
            "num_turns": 2,
            "duration_ms": 3400,
        }))
        .await;
    }
}

struct Harness {
    coordinator: Arc<Coordinator>,
    events: UnboundedReceiver<GateEvent>,
    session: Arc<AgentSession>,
    output: OutputStream,
    cli: FakeCli,
    driver: JoinHandle<Result<RunSummary>>,
    dir: TempDir,
}

impl Harness {
    async fn start(config: GateConfig, mode: PermissionMode) -> Self {
        let dir = TempDir::new().unwrap();
        let (notifier, events) = ChannelNotifier::new();
        let coordinator = Arc::new(Coordinator::new(config, Arc::new(notifier)));
        let (session, output) = coordinator.start_session(dir.path()).await;

        let (driver_io, cli_io) = tokio::io::duplex(64 * 1024);
        let (driver_read, driver_write) = tokio::io::split(driver_io);
        let (cli_read, cli_write) = tokio::io::split(cli_io);

        let gate = coordinator.gate();
        let policy = ToolPolicy::new(dir.path(), mode);
        let task = AgentTask::new("tidy the repo");
        let run_session = Arc::clone(&session);
        let driver = tokio::spawn(async move {
            drive(
                BufReader::new(driver_read),
                driver_write,
                &task,
                &run_session,
                &gate,
                &policy,
            )
            .await
        });

        Self {
            coordinator,
            events,
            session,
            output,
            cli: FakeCli {
                lines: BufReader::new(cli_read).lines(),
                out: cli_write,
            },
            driver,
            dir,
        }
    }

    async fn next_request(&mut self) -> PendingApproval {
        loop {
            match self.events.recv().await.expect("notifier closed") {
                GateEvent::ApprovalRequested(p) => return p,
                GateEvent::ApprovalClosed { .. } => continue,
            }
        }
    }

    /// Everything emitted so far, in order.
    async fn output_text(&mut self) -> String {
        self.session.output().finish("");
        let mut text = String::new();
        while let Some(chunk) = self.output.recv().await {
            text.push_str(&chunk.text);
            if chunk.is_final {
                break;
            }
        }
        text
    }

    async fn outcome(&mut self) -> Result<RunSummary> {
        (&mut self.driver).await.unwrap()
    }

    fn working_dir(&self) -> &Path {
        self.dir.path()
    }
}

#[tokio::test]
async fn approved_tool_call_round_trip() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::Default).await;
    assert_eq!(h.cli.handshake().await, "tidy the repo");

    h.cli
        .write(json!({"type": "system", "subtype": "init", "session_id": "conv-42", "model": "sonnet"}))
        .await;
    h.cli
        .write(json!({"type": "assistant", "message": {"role": "assistant", "content": [
            {"type": "thinking", "thinking": "hmm"},
            {"type": "text", "text": "Working on it"},
            {"type": "tool_use", "id": "tu1", "name": "Bash", "input": {"command": "make clean"}}
        ]}}))
        .await;
    h.cli.ask("req-1", "Bash", json!({"command": "make clean"})).await;

    let pending = h.next_request().await;
    assert_eq!(pending.action.tool_name, "Bash");
    assert_eq!(pending.action.description, "make clean");
    assert_eq!(pending.action.risk, RiskLevel::Medium);
    assert!(h
        .coordinator
        .decisions()
        .resolve(&pending.approval_id, Choice::Approve));

    let reply = h.cli.read().await;
    assert_eq!(reply["type"], "control_response");
    assert_eq!(reply["response"]["request_id"], "req-1");
    assert_eq!(reply["response"]["response"]["behavior"], "allow");
    assert_eq!(reply["response"]["response"]["updatedInput"]["command"], "make clean");

    h.cli
        .write(json!({"type": "user", "message": {"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": "tu1", "content": "make: *** No rule", "is_error": true}
        ]}}))
        .await;
    h.cli.finish().await;

    let summary = h.outcome().await.unwrap();
    assert_eq!(summary.conversation_id.as_deref(), Some("conv-42"));
    assert_eq!(summary.result.as_deref(), Some("done"));
    assert_eq!(summary.num_turns, Some(2));
    assert_eq!(summary.duration_ms, Some(3400));

    let text = h.output_text().await;
    assert_eq!(
        text,
        "Working on it\n🔧 Bash: make clean\n⚠️ make: *** No rule\n"
    );
    assert!(h.coordinator.store().is_empty());
}

#[tokio::test]
async fn safe_tools_and_outside_paths_skip_the_prompt() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::Default).await;
    h.cli.handshake().await;

    let inside = h.working_dir().join("src/lib.rs").display().to_string();
    h.cli.ask("req-1", "Read", json!({"file_path": inside})).await;
    let reply = h.cli.read().await;
    assert_eq!(reply["response"]["response"]["behavior"], "allow");

    h.cli.ask("req-2", "Write", json!({"file_path": "/etc/hosts", "content": "x"})).await;
    let reply = h.cli.read().await;
    assert_eq!(reply["response"]["request_id"], "req-2");
    assert_eq!(reply["response"]["response"]["behavior"], "deny");
    assert_eq!(reply["response"]["response"]["interrupt"], false);
    assert!(reply["response"]["response"]["message"]
        .as_str()
        .unwrap()
        .contains("outside the current project"));

    h.cli.finish().await;
    h.outcome().await.unwrap();
    assert!(h.events.try_recv().is_err());
    assert!(h.output_text().await.starts_with("🚫 Access denied"));
}

#[tokio::test]
async fn accept_edits_mode_allows_edits() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::AcceptEdits).await;
    h.cli.handshake().await;

    h.cli.ask("req-1", "Edit", json!({"file_path": "README.md"})).await;
    let reply = h.cli.read().await;
    assert_eq!(reply["response"]["response"]["behavior"], "allow");

    h.cli.finish().await;
    h.outcome().await.unwrap();
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn question_answer_is_returned_in_updated_input() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::Default).await;
    h.cli.handshake().await;

    let input = json!({"questions": [{
        "question": "Which test runner?",
        "header": "Tests",
        "options": [{"label": "nextest"}, {"label": "cargo test"}],
        "multiSelect": false
    }]});
    h.cli.ask("req-1", "AskUserQuestion", input.clone()).await;

    let pending = h.next_request().await;
    assert!(pending.action.is_question());
    assert_eq!(pending.action.options, vec!["nextest", "cargo test"]);
    assert!(h
        .coordinator
        .decisions()
        .resolve(&pending.approval_id, Choice::Answer("nextest".into())));

    let reply = h.cli.read().await;
    let body = &reply["response"]["response"];
    assert_eq!(body["behavior"], "allow");
    assert_eq!(body["updatedInput"]["answers"]["Which test runner?"], "nextest");
    assert_eq!(body["updatedInput"]["questions"], input["questions"]);

    h.cli.finish().await;
    h.outcome().await.unwrap();
}

#[tokio::test]
async fn plan_file_write_waits_for_plan_review() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::AcceptEdits).await;
    h.cli.handshake().await;

    let input = json!({"file_path": ".claude/plans/cleanup.md", "content": "1. drop dead code"});
    h.cli.ask("req-1", "Write", input).await;

    let pending = h.next_request().await;
    assert!(pending.action.is_plan());
    assert_eq!(pending.action.description, "1. drop dead code");
    h.coordinator
        .decisions()
        .resolve(&pending.approval_id, Choice::Deny);

    let reply = h.cli.read().await;
    assert_eq!(reply["response"]["response"]["behavior"], "deny");

    h.cli.finish().await;
    h.outcome().await.unwrap();
}

#[tokio::test]
async fn clarification_is_returned_to_the_agent() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::Default).await;
    h.cli.handshake().await;

    h.cli.ask("req-1", "Write", json!({"file_path": "db.yml"})).await;
    let pending = h.next_request().await;
    h.coordinator.decisions().resolve(
        &pending.approval_id,
        Choice::Clarify("use the staging database".into()),
    );

    let reply = h.cli.read().await;
    assert_eq!(reply["response"]["response"]["behavior"], "deny");
    assert_eq!(
        reply["response"]["response"]["message"],
        "User provided additional context: use the staging database"
    );
    assert_eq!(reply["response"]["response"]["interrupt"], false);

    h.cli.finish().await;
    assert!(h.outcome().await.is_ok());
}

#[tokio::test]
async fn plan_approval_goes_through_the_gate() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::Default).await;
    h.cli.handshake().await;

    h.cli
        .ask("req-1", "ExitPlanMode", json!({"plan": "1. split module\n2. add tests"}))
        .await;
    let pending = h.next_request().await;
    assert!(pending.action.is_plan());
    assert_eq!(pending.action.description, "1. split module\n2. add tests");
    h.coordinator
        .decisions()
        .resolve(&pending.approval_id, Choice::Deny);

    let reply = h.cli.read().await;
    assert_eq!(reply["response"]["response"]["message"], "User rejected the operation");

    h.cli.finish().await;
    h.outcome().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unanswered_permission_times_out() {
    let config = GateConfig::new().with_approval_timeout(Duration::from_secs(5));
    let mut h = Harness::start(config, PermissionMode::Default).await;
    h.cli.handshake().await;

    h.cli.ask("req-1", "Bash", json!({"command": "sudo reboot"})).await;
    let pending = h.next_request().await;
    assert_eq!(pending.action.risk, RiskLevel::High);

    let reply = h.cli.read().await;
    assert_eq!(reply["response"]["response"]["message"], "Permission request timed out");
    assert!(!h
        .coordinator
        .decisions()
        .resolve(&pending.approval_id, Choice::Approve));

    h.cli.finish().await;
    h.outcome().await.unwrap();
}

#[tokio::test]
async fn cancellation_interrupts_the_agent() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::Default).await;
    h.cli.handshake().await;

    h.cli.ask("req-1", "Bash", json!({"command": "deploy"})).await;
    h.next_request().await;
    assert!(h.coordinator.cancel(h.session.id()).await.unwrap());

    let reply = h.cli.read().await;
    assert_eq!(reply["response"]["response"]["behavior"], "deny");
    assert_eq!(reply["response"]["response"]["message"], "Task cancelled by user");
    assert_eq!(reply["response"]["response"]["interrupt"], true);

    let interrupt = h.cli.read().await;
    assert_eq!(interrupt["type"], "control_request");
    assert_eq!(interrupt["request"]["subtype"], "interrupt");

    let outcome = tokio::time::timeout(Duration::from_secs(1), h.outcome())
        .await
        .expect("driver should stop after cancellation");
    assert!(matches!(outcome, Err(AgentError::Cancelled)));
    assert!(h.coordinator.store().is_empty());
}

#[tokio::test]
async fn error_result_fails_the_run() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::Default).await;
    h.cli.handshake().await;

    h.cli.write(json!({"type": "stream_event", "event": {}})).await;
    h.cli
        .write(json!({"type": "result", "subtype": "error_max_turns", "is_error": true}))
        .await;

    match h.outcome().await {
        Err(AgentError::Backend(msg)) => assert_eq!(msg, "error_max_turns"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_output_fails_the_run() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::Default).await;
    h.cli.handshake().await;

    h.cli
        .write(json!({"type": "assistant", "message": {"content": [{"type": "text", "text": "step one"}]}}))
        .await;
    h.cli.write_raw("{garbage not json").await;
    h.cli.finish().await;

    match h.outcome().await {
        Err(AgentError::Protocol(msg)) => assert!(msg.starts_with("malformed message")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.output_text().await, "step one\n");
}

#[tokio::test]
async fn closed_output_without_result_is_an_early_exit() {
    let mut h = Harness::start(GateConfig::default(), PermissionMode::Default).await;
    h.cli.handshake().await;
    h.cli
        .write(json!({"type": "assistant", "message": {"content": [{"type": "text", "text": "partial"}]}}))
        .await;
    h.cli.out.shutdown().await.unwrap();

    assert!(matches!(
        h.outcome().await,
        Err(AgentError::ExitedEarly(_))
    ));
}
