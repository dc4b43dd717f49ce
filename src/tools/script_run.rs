use super::traits::{Tool, ToolContext};
use super::types::ToolOutput;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Runs a generated script through the configured interpreter.
///
/// The `code` payload goes through the gate's static-analysis layer before
/// this tool is ever reached (`dangerous_patterns`), and every invocation
/// needs approval.
pub struct RunScriptTool {
    interpreter: String,
}

impl RunScriptTool {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Default for RunScriptTool {
    fn default() -> Self {
        Self::new("python3")
    }
}

#[async_trait]
impl Tool for RunScriptTool {
    fn name(&self) -> &str {
        "run_script"
    }

    fn description(&self) -> &str {
        "Write a script payload to a workspace temp file and run it through the interpreter"
    }

    fn category(&self) -> &str {
        "terminal"
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn dangerous_patterns(&self) -> &[&str] {
        &["code"]
    }

    async fn validate(&self, args: &Map<String, Value>) -> (bool, String) {
        match args.get("code").and_then(Value::as_str) {
            Some(code) if !code.trim().is_empty() => (true, String::new()),
            Some(_) => (false, "code is empty".to_string()),
            None => (false, "missing 'code' parameter".to_string()),
        }
    }

    async fn execute(
        &self,
        args: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Missing 'code' parameter"))?;

        let script_dir = ctx.workspace_dir.join(".deskpilot-scripts");
        tokio::fs::create_dir_all(&script_dir).await?;
        let script_path = script_dir.join(format!("{}.py", uuid::Uuid::new_v4()));
        tokio::fs::write(&script_path, code).await?;

        let output = tokio::process::Command::new(&self.interpreter)
            .arg(&script_path)
            .current_dir(&ctx.workspace_dir)
            .env_clear()
            .envs(std::env::var("PATH").ok().map(|p| ("PATH", p)))
            .output()
            .await;

        // Best effort; a leftover file is harmless.
        let _ = tokio::fs::remove_file(&script_path).await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return Ok(ToolOutput::failed(format!(
                    "{}: command not found: {e}",
                    self.interpreter
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        Ok(ToolOutput {
            success: output.status.success(),
            output: stdout,
            error: if stderr.is_empty() {
                None
            } else {
                Some(stderr)
            },
        })
    }
}
