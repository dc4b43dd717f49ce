pub mod planner;

pub use planner::{Planner, PlannerStep, SingleCommandPlanner};

use crate::error::{MemoryError, PilotError, Result, ToolError};
use crate::memory::{Memory, MemoryDraft, MemoryKind};
use crate::retry::{RetryController, RetryTier, record_attempt};
use crate::security::{SecurityGate, SecurityViolation};
use crate::tools::{Action, ActionResult, ToolContext, ToolRegistry};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Loop states, used for structured trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LoopState {
    Planning,
    Validating,
    Executing,
    Observing,
    Retrying,
    Done,
    Failed,
}

/// One line of the run's audit log: the action, what the gate said, what
/// execution produced, and which retry tier (if any) produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub iteration: u32,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<SecurityViolation>,
    /// `None` for the initial dispatch; the tier for healing attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_tier: Option<RetryTier>,
}

/// Per-objective-run state. Owned by exactly one run, never shared.
pub struct ExecutionContext {
    pub objective: String,
    pub records: Vec<ActionRecord>,
    pub iteration: u32,
    pub current_tier: Option<RetryTier>,
    pub approved: HashSet<String>,
    pub cancel: CancellationToken,
    started: Instant,
}

impl ExecutionContext {
    pub fn new(objective: impl Into<String>) -> Self {
        Self::with_cancel(objective, CancellationToken::new())
    }

    pub fn with_cancel(objective: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            objective: objective.into(),
            records: Vec::new(),
            iteration: 0,
            current_tier: None,
            approved: HashSet::new(),
            cancel,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// The run's final report: always the success flag, iteration count, and
/// the full action log; on failure the specific reason.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectiveReport {
    pub success: bool,
    pub objective: String,
    pub iterations: u32,
    pub final_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub action_log: Vec<ActionRecord>,
    pub total_duration: Duration,
}

/// Snapshot for the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub registered_tools: Vec<String>,
    pub max_iterations: u32,
    pub memory_backend: String,
}

/// The closed-loop engine: plan, validate, execute, observe; heal failures;
/// record everything. Collaborators are injected `Arc`s; the gate and
/// memory are shared across concurrent runs, contexts never are.
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    gate: Arc<SecurityGate>,
    registry: Arc<ToolRegistry>,
    retry: RetryController,
    memory: Arc<dyn Memory>,
    tool_ctx: ToolContext,
    max_iterations: u32,
    action_timeout: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: Arc<dyn Planner>,
        gate: Arc<SecurityGate>,
        registry: Arc<ToolRegistry>,
        memory: Arc<dyn Memory>,
        tool_ctx: ToolContext,
        max_iterations: u32,
        action_timeout: Duration,
    ) -> Self {
        let retry = RetryController::new(
            Arc::clone(&memory),
            Arc::clone(&gate),
            Arc::clone(&registry),
            action_timeout,
        );
        Self {
            planner,
            gate,
            registry,
            retry,
            memory,
            tool_ctx,
            max_iterations,
            action_timeout,
        }
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            registered_tools: self
                .registry
                .tool_names()
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_iterations: self.max_iterations,
            memory_backend: self.memory.name().to_string(),
        }
    }

    pub async fn run_objective(&self, objective: &str) -> Result<ObjectiveReport> {
        self.run_with_cancel(objective, CancellationToken::new())
            .await
    }

    /// Drive one objective to a terminal state. Infrastructure failures
    /// (planner, memory) surface as errors; policy denials and exhausted
    /// retries come back inside the report.
    pub async fn run_with_cancel(
        &self,
        objective: &str,
        cancel: CancellationToken,
    ) -> Result<ObjectiveReport> {
        let mut ctx = ExecutionContext::with_cancel(objective, cancel);
        tracing::info!(
            objective,
            max_iterations = self.max_iterations,
            tools = self.registry.len(),
            "objective run started"
        );

        loop {
            if ctx.iteration >= self.max_iterations {
                let reason = format!(
                    "maximum iterations ({}) reached without completing objective",
                    self.max_iterations
                );
                let report = self
                    .finish(&mut ctx, false, &reason, Some(reason.clone()))
                    .await?;
                return Ok(report);
            }
            ctx.iteration += 1;
            tracing::debug!(state = %LoopState::Planning, iteration = ctx.iteration, "loop transition");

            let step = self
                .planner
                .next_step(objective, &ctx)
                .await
                .map_err(PilotError::Planning)?;

            let actions = match step {
                PlannerStep::Done { summary } => {
                    return Ok(self.finish(&mut ctx, true, &summary, None).await?);
                }
                PlannerStep::Actions(actions) => actions,
            };

            for action in actions {
                if let Some(report) = self.drive_action(&mut ctx, action).await? {
                    return Ok(report);
                }
            }
        }
    }

    /// Take one proposed action through Validating → Executing → Observing
    /// (→ Retrying). Returns a report only when the run must end here.
    async fn drive_action(
        &self,
        ctx: &mut ExecutionContext,
        action: Action,
    ) -> Result<Option<ObjectiveReport>> {
        tracing::debug!(state = %LoopState::Validating, action = %action.summary(), "loop transition");
        let cancel = ctx.cancel.clone();
        if let Err(violation) = self
            .gate
            .validate(&action, &cancel, &mut ctx.approved)
            .await
        {
            let fatal = violation.is_fatal();
            let detail = violation.to_string();
            ctx.records.push(ActionRecord {
                iteration: ctx.iteration,
                action,
                result: None,
                violation: Some(violation),
                retry_tier: None,
            });
            if fatal {
                let report = self
                    .finish(ctx, false, &format!("security gate denied action: {detail}"), Some(detail))
                    .await?;
                return Ok(Some(report));
            }
            // Approval denial: terminal for this action, the loop goes on.
            return Ok(None);
        }

        tracing::debug!(state = %LoopState::Executing, action = %action.summary(), "loop transition");
        let result = match self
            .registry
            .dispatch(&action, &self.tool_ctx, self.action_timeout)
            .await
        {
            Ok(result) => result,
            Err(ToolError::NotFound { name }) => {
                tracing::warn!(tool = %name, "planner proposed unknown tool");
                ctx.records.push(ActionRecord {
                    iteration: ctx.iteration,
                    action,
                    result: Some(ActionResult::failed(
                        format!("tool not found: {name}"),
                        Duration::ZERO,
                    )),
                    violation: None,
                    retry_tier: None,
                });
                return Ok(None);
            }
            Err(other) => return Err(PilotError::Tool(other)),
        };

        tracing::debug!(
            state = %LoopState::Observing,
            success = result.success,
            duration_ms = %result.duration.as_millis(),
            "loop transition"
        );
        record_attempt(self.memory.as_ref(), &action, &result, &[]).await?;
        ctx.records.push(ActionRecord {
            iteration: ctx.iteration,
            action: action.clone(),
            result: Some(result.clone()),
            violation: None,
            retry_tier: None,
        });

        if result.success {
            ctx.current_tier = None;
            return Ok(None);
        }

        tracing::debug!(state = %LoopState::Retrying, "loop transition");
        let outcome = self
            .retry
            .heal(&action, &result, &self.tool_ctx, &cancel, &mut ctx.approved)
            .await?;

        for attempt in &outcome.attempts {
            ctx.records.push(ActionRecord {
                iteration: ctx.iteration,
                action: attempt.action.clone(),
                result: Some(attempt.result.clone()),
                violation: None,
                retry_tier: Some(attempt.tier),
            });
        }
        ctx.current_tier = outcome.attempts.last().map(|a| a.tier);

        if let Some(violation) = outcome.violation {
            let fatal = violation.is_fatal();
            let detail = violation.to_string();
            ctx.records.push(ActionRecord {
                iteration: ctx.iteration,
                action,
                result: None,
                violation: Some(violation),
                retry_tier: ctx.current_tier,
            });
            if fatal {
                let report = self
                    .finish(ctx, false, &format!("security gate denied retry: {detail}"), Some(detail))
                    .await?;
                return Ok(Some(report));
            }
            return Ok(None);
        }

        if outcome.exhausted {
            // Recorded and surfaced in the report; the planner sees the
            // failure next round and may adapt or give up.
            tracing::warn!(action = %action.summary(), "retries exhausted");
        }

        Ok(None)
    }

    /// Close the run: write the Decision entry, assemble the report.
    async fn finish(
        &self,
        ctx: &mut ExecutionContext,
        success: bool,
        final_message: &str,
        failure: Option<String>,
    ) -> std::result::Result<ObjectiveReport, MemoryError> {
        let state = if success {
            LoopState::Done
        } else {
            LoopState::Failed
        };
        tracing::info!(
            state = %state,
            iterations = ctx.iteration,
            elapsed_ms = %ctx.elapsed().as_millis(),
            "objective run finished"
        );

        let outcome = if success { "succeeded" } else { "failed" };
        self.memory
            .store(
                MemoryDraft::new(
                    MemoryKind::Decision,
                    format!(
                        "objective '{}' {outcome} after {} iterations: {final_message}",
                        ctx.objective, ctx.iteration
                    ),
                )
                .with_meta("outcome", outcome)
                .with_meta("iterations", ctx.iteration.to_string()),
            )
            .await?;

        Ok(ObjectiveReport {
            success,
            objective: ctx.objective.clone(),
            iterations: ctx.iteration,
            final_message: final_message.to_string(),
            failure,
            action_log: std::mem::take(&mut ctx.records),
            total_duration: ctx.elapsed(),
        })
    }
}
