use super::traits::{Tool, ToolContext};
use super::types::ToolOutput;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Output cap per stream (1 MB).
const MAX_OUTPUT_BYTES: usize = 1_048_576;
/// The only environment variables a spawned command sees. Everything else
/// (API keys in particular) stays out of the child process.
const PASSTHROUGH_ENV: &[&str] = &[
    "PATH", "HOME", "TERM", "LANG", "LC_ALL", "LC_CTYPE", "USER", "SHELL",
];

/// Shell command execution in the workspace directory.
///
/// Security validation happens in the gate before dispatch; this tool only
/// sandboxes the environment and caps output. The hard timeout lives in the
/// registry's dispatch path.
pub struct ShellTool;

impl ShellTool {
    pub const fn new() -> Self {
        Self
    }
}

fn truncate_at_boundary(s: &mut String, max: usize) {
    if s.len() > max {
        let mut cut = max;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("\n... [output truncated at 1MB]");
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory"
    }

    fn category(&self) -> &str {
        "terminal"
    }

    async fn validate(&self, args: &Map<String, Value>) -> (bool, String) {
        match args.get("command").and_then(Value::as_str) {
            Some(cmd) if !cmd.trim().is_empty() => (true, String::new()),
            Some(_) => (false, "command is empty".to_string()),
            None => (false, "missing 'command' parameter".to_string()),
        }
    }

    async fn execute(
        &self,
        args: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'command' parameter"))?;

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&ctx.workspace_dir)
            .env_clear()
            .envs(
                PASSTHROUGH_ENV
                    .iter()
                    .filter_map(|var| std::env::var(var).ok().map(|val| (*var, val))),
            );

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                return Ok(ToolOutput::failed(format!("failed to spawn shell: {e}")));
            }
        };

        let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
        truncate_at_boundary(&mut stdout, MAX_OUTPUT_BYTES);
        truncate_at_boundary(&mut stderr, MAX_OUTPUT_BYTES);

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
