use super::traits::{Tool, ToolContext};
use super::types::{Action, ActionResult};
use crate::error::ToolError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Central registry for tool instances. Registration is an explicit
/// construction-time step; there is no runtime discovery.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let tool: Arc<dyn Tool> = Arc::from(tool);
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Return sorted list of registered tool names.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one dispatch attempt under the hard per-action timeout.
    ///
    /// Execution failures and timeouts come back as failed `ActionResult`s
    /// (transient, retry-eligible); only an unknown tool is an error.
    pub async fn dispatch(
        &self,
        action: &Action,
        ctx: &ToolContext,
        timeout: Duration,
    ) -> Result<ActionResult, ToolError> {
        let Some(tool) = self.tools.get(&action.tool_name) else {
            return Err(ToolError::NotFound {
                name: action.tool_name.clone(),
            });
        };

        let started = Instant::now();

        let (valid, reason) = tool.validate(&action.arguments).await;
        if !valid {
            return Ok(ActionResult::failed(
                format!("invalid arguments: {reason}"),
                started.elapsed(),
            ));
        }

        let outcome = tokio::time::timeout(timeout, tool.execute(&action.arguments, ctx)).await;
        let duration = started.elapsed();

        match outcome {
            Ok(Ok(output)) => Ok(output.into_result(duration)),
            Ok(Err(e)) => Ok(ActionResult::failed(
                format!("execution failed: {e}"),
                duration,
            )),
            Err(_) => {
                tracing::warn!(
                    tool = %action.tool_name,
                    timeout_secs = timeout.as_secs(),
                    "action timed out, future cancelled"
                );
                Ok(ActionResult::failed(
                    format!("action timed out after {}s", timeout.as_secs()),
                    duration,
                ))
            }
        }
    }
}
