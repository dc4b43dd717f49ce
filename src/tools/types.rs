use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// A proposed tool invocation. Immutable once dispatched — retries derive a
/// new `Action` via [`Action::derive`] so the audit trail keeps the lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub requires_approval: bool,
    /// Id of the action this one was derived from (retry mutations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            arguments,
            requires_approval: false,
            parent_id: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_approval_required(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Build the retry successor: same tool, mutated arguments, lineage kept.
    #[must_use]
    pub fn derive(&self, arguments: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_name: self.tool_name.clone(),
            arguments,
            requires_approval: self.requires_approval,
            parent_id: Some(self.id.clone()),
            created_at: Utc::now(),
        }
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    /// Stable identity for approval caching: tool plus canonical arguments.
    /// Derived actions with identical arguments share a fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}",
            self.tool_name,
            serde_json::to_string(&self.arguments).unwrap_or_default()
        )
    }

    /// One-line rendering for logs and approval prompts.
    #[must_use]
    pub fn summary(&self) -> String {
        let args: Vec<String> = self
            .arguments
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let mut shortened: String = rendered.chars().take(80).collect();
                if shortened.len() < rendered.len() {
                    shortened.push('…');
                }
                format!("{k}={shortened}")
            })
            .collect();
        format!("{}({})", self.tool_name, args.join(", "))
    }
}

/// What a tool reports back. The registry stamps the measured duration onto
/// this to produce the dispatch attempt's [`ActionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn into_result(self, duration: Duration) -> ActionResult {
        ActionResult {
            success: self.success,
            output: self.output,
            error: self.error,
            duration,
        }
    }
}

/// Outcome of one dispatch attempt. Produced exactly once per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
}

impl ActionResult {
    pub fn ok(output: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            duration,
        }
    }

    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration,
        }
    }

    /// Error text, or empty string for successes.
    #[must_use]
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }
}
