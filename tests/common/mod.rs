#![allow(dead_code)]

use async_trait::async_trait;
use deskpilot::config::SecurityConfig;
use deskpilot::error::PlanningError;
use deskpilot::memory::{Memory, MemoryKind, SqliteMemory, embeddings::HashEmbedding};
use deskpilot::orchestrator::{ExecutionContext, Orchestrator, Planner, PlannerStep};
use deskpilot::security::{
    ApprovalBroker, ApprovalDecision, ApprovalRequest, SecurityGate,
};
use deskpilot::tools::{Tool, ToolContext, ToolOutput, ToolRegistry};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Tool double that counts invocations and answers from a closure.
pub struct SpyTool {
    pub tool_name: &'static str,
    pub calls: Arc<AtomicUsize>,
    pub approval_required: bool,
    pub payload_args: &'static [&'static str],
    pub behavior: Box<dyn Fn(&Map<String, Value>) -> ToolOutput + Send + Sync>,
}

impl SpyTool {
    pub fn always_ok(name: &'static str) -> (Self, Arc<AtomicUsize>) {
        Self::with_behavior(name, |_| ToolOutput::ok("ok"))
    }

    pub fn always_failing(name: &'static str, error: &'static str) -> (Self, Arc<AtomicUsize>) {
        Self::with_behavior(name, move |_| ToolOutput::failed(error))
    }

    pub fn with_behavior(
        name: &'static str,
        behavior: impl Fn(&Map<String, Value>) -> ToolOutput + Send + Sync + 'static,
    ) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tool_name: name,
                calls: Arc::clone(&calls),
                approval_required: false,
                payload_args: &[],
                behavior: Box::new(behavior),
            },
            calls,
        )
    }

    pub fn requiring_approval(mut self) -> Self {
        self.approval_required = true;
        self
    }

    pub fn with_payload_args(mut self, args: &'static [&'static str]) -> Self {
        self.payload_args = args;
        self
    }
}

#[async_trait]
impl Tool for SpyTool {
    fn name(&self) -> &str {
        self.tool_name
    }

    fn description(&self) -> &str {
        "test double"
    }

    fn requires_approval(&self) -> bool {
        self.approval_required
    }

    fn dangerous_patterns(&self) -> &[&str] {
        self.payload_args
    }

    async fn execute(
        &self,
        args: &Map<String, Value>,
        _ctx: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.behavior)(args))
    }
}

/// Planner double that replays a scripted sequence, then reports done.
pub struct ScriptedPlanner {
    steps: Mutex<VecDeque<PlannerStep>>,
}

impl ScriptedPlanner {
    pub fn new(steps: Vec<PlannerStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
        }
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn next_step(
        &self,
        _objective: &str,
        _context: &ExecutionContext,
    ) -> Result<PlannerStep, PlanningError> {
        Ok(self.steps.lock().await.pop_front().unwrap_or(
            PlannerStep::Done {
                summary: "objective satisfied".to_string(),
            },
        ))
    }
}

/// Broker double that waits on a channel — lets tests hold an action
/// blocked and resolve it explicitly.
pub struct ChannelBroker {
    receiver: Mutex<Option<tokio::sync::oneshot::Receiver<ApprovalDecision>>>,
}

impl ChannelBroker {
    pub fn new() -> (Self, tokio::sync::oneshot::Sender<ApprovalDecision>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (
            Self {
                receiver: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl ApprovalBroker for ChannelBroker {
    async fn request_approval(
        &self,
        _request: &ApprovalRequest,
    ) -> anyhow::Result<ApprovalDecision> {
        let rx = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("approval channel already consumed"))?;
        Ok(rx.await?)
    }
}

pub fn permissive_security() -> SecurityConfig {
    SecurityConfig {
        allowed_commands: vec![
            "ls".into(),
            "echo".into(),
            "cat".into(),
            "python".into(),
            "python3".into(),
        ],
        danger_keywords: vec!["rm".into(), "install".into(), "reboot".into()],
        approval_timeout_secs: 5,
        ..SecurityConfig::default()
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub memory: Arc<dyn Memory>,
}

/// Wire a full engine against a temp workspace: registry, gate, sqlite
/// memory (hash embeddings), retry controller, orchestrator.
pub fn build_harness(
    state_dir: &Path,
    security: &SecurityConfig,
    broker: Box<dyn ApprovalBroker>,
    tools: Vec<Box<dyn Tool>>,
    planner: Arc<dyn Planner>,
    max_iterations: u32,
) -> Harness {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    let registry = Arc::new(registry);

    let gate = Arc::new(SecurityGate::new(
        security,
        state_dir,
        Arc::clone(&registry),
        broker,
    ));

    let memory: Arc<dyn Memory> = Arc::new(
        SqliteMemory::open(state_dir, Arc::new(HashEmbedding::new(64))).unwrap(),
    );

    let orchestrator = Orchestrator::new(
        planner,
        gate,
        registry,
        Arc::clone(&memory),
        ToolContext::new(state_dir),
        max_iterations,
        Duration::from_secs(10),
    );

    Harness {
        orchestrator,
        memory,
    }
}

/// Count exported entries of one kind.
pub async fn entries_of_kind(memory: &Arc<dyn Memory>, kind: MemoryKind) -> usize {
    memory
        .export()
        .await
        .unwrap()
        .iter()
        .filter(|e| e.kind == kind)
        .count()
}

pub fn shell_action(command: &str) -> deskpilot::tools::Action {
    let mut args = Map::new();
    args.insert("command".into(), serde_json::json!(command));
    deskpilot::tools::Action::new("shell", args)
}
