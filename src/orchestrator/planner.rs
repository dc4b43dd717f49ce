use super::ExecutionContext;
use crate::error::PlanningError;
use crate::tools::Action;
use async_trait::async_trait;
use serde_json::{Map, json};

/// What the reasoning collaborator proposes for the next loop iteration.
#[derive(Debug, Clone)]
pub enum PlannerStep {
    /// Execute these actions, then come back for another round.
    Actions(Vec<Action>),
    /// The objective is satisfied.
    Done { summary: String },
}

/// External reasoning collaborator. Given the objective and the run's
/// history, return the next step. The engine treats this as a black box;
/// a failure to respond is fatal to the loop.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_step(
        &self,
        objective: &str,
        context: &ExecutionContext,
    ) -> Result<PlannerStep, PlanningError>;
}

/// Deterministic planner behind the CLI `run` command: turns an objective
/// like `run: ls -la` into one shell action, then reports done with the
/// observed outcome.
pub struct SingleCommandPlanner;

fn strip_objective_prefix(objective: &str) -> &str {
    let trimmed = objective.trim();
    for prefix in ["run command", "run:", "run "] {
        let head = trimmed.get(..prefix.len());
        if head.is_some_and(|head| head.eq_ignore_ascii_case(prefix)) {
            return trimmed[prefix.len()..].trim_start_matches(':').trim();
        }
    }
    trimmed
}

#[async_trait]
impl Planner for SingleCommandPlanner {
    async fn next_step(
        &self,
        objective: &str,
        context: &ExecutionContext,
    ) -> Result<PlannerStep, PlanningError> {
        if let Some(last) = context.records.last() {
            let summary = match &last.result {
                Some(result) if result.success => {
                    let preview: String = result.output.trim().chars().take(200).collect();
                    if preview.is_empty() {
                        "command completed".to_string()
                    } else {
                        format!("command completed: {preview}")
                    }
                }
                Some(result) => format!("command failed: {}", result.error_text()),
                None => "command was not executed".to_string(),
            };
            return Ok(PlannerStep::Done { summary });
        }

        let command = strip_objective_prefix(objective);
        if command.is_empty() {
            return Err(PlanningError::MalformedAction(
                "objective contains no command".into(),
            ));
        }

        let mut args = Map::new();
        args.insert("command".into(), json!(command));
        Ok(PlannerStep::Actions(vec![Action::new("shell", args)]))
    }
}
