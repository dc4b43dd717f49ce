use super::types::ToolOutput;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Environment a tool executes in.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace_dir: PathBuf,
}

impl ToolContext {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
        }
    }
}

/// Core tool trait — implement for any capability.
///
/// Tools do NOT validate security themselves; every dispatch path runs the
/// security gate before a tool's `execute` is reached.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (what the planner addresses).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Category (e.g. "terminal", "filesystem", "vision").
    fn category(&self) -> &str {
        "general"
    }

    /// Whether every invocation needs human approval.
    fn requires_approval(&self) -> bool {
        false
    }

    /// Names of arguments whose values are source code; the gate runs its
    /// static-analysis layer over these payloads.
    fn dangerous_patterns(&self) -> &[&str] {
        &[]
    }

    /// Cheap pre-check of arguments before execution.
    async fn validate(&self, _args: &Map<String, Value>) -> (bool, String) {
        (true, String::new())
    }

    /// Execute the tool with given arguments.
    async fn execute(
        &self,
        args: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> anyhow::Result<ToolOutput>;
}
