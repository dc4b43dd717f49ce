use super::defaults::BLOCKED_COMMAND_PATTERNS;
use std::path::{Component, Path, PathBuf};

/// Allow-list policy for command and path tokens. Default-deny: anything
/// not matched by the configured allow-sets is rejected.
#[derive(Debug, Clone)]
pub struct AllowListPolicy {
    allowed_commands: Vec<String>,
    allowed_paths: Vec<String>,
}

/// Skip leading environment variable assignments (e.g. `FOO=bar cmd args`).
/// Returns the remainder starting at the first non-assignment word.
fn skip_env_assignments(s: &str) -> &str {
    let mut rest = s;
    loop {
        let Some(word) = rest.split_whitespace().next() else {
            return rest;
        };
        if word.contains('=')
            && word
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            rest = rest[word.len()..].trim_start();
        } else {
            return rest;
        }
    }
}

fn matches_blocked_pattern(command: &str) -> bool {
    let normalized = command
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    BLOCKED_COMMAND_PATTERNS
        .iter()
        .any(|pattern| normalized.contains(pattern))
}

impl AllowListPolicy {
    pub fn new(allowed_commands: Vec<String>, allowed_paths: Vec<String>) -> Self {
        Self {
            allowed_commands,
            allowed_paths,
        }
    }

    pub fn allowed_commands(&self) -> &[String] {
        &self.allowed_commands
    }

    pub fn allowed_paths(&self) -> &[String] {
        &self.allowed_paths
    }

    /// Check if a shell command is allowed.
    ///
    /// Validates the **entire** command string, not just the first word:
    /// - Blocks subshell operators (`` ` ``, `$(`) that hide arbitrary execution
    /// - Blocks output redirections (`>`, `>>`) that could write outside workspace
    /// - Splits on command separators (`|`, `&&`, `||`, `;`, newlines) and
    ///   validates each sub-command's base against the allowlist
    /// - Blocks known-destructive shapes even for allow-listed commands
    pub fn is_command_allowed(&self, command: &str) -> bool {
        // Subshell/expansion operators allow hiding arbitrary commands inside
        // an allowed one (e.g. `echo $(rm -rf /)`)
        if command.contains('`')
            || command.contains("$(")
            || command.contains("${")
            || command.contains("<(")
            || command.contains(">(")
        {
            return false;
        }

        if command.contains('>') {
            return false;
        }

        if matches_blocked_pattern(command) {
            return false;
        }

        // Split on command separators and validate each sub-command.
        let mut normalized = command.to_string();
        for sep in ["&&", "||"] {
            normalized = normalized.replace(sep, "\x00");
        }
        if normalized.contains('&') {
            return false;
        }
        for sep in ['\n', ';', '|'] {
            normalized = normalized.replace(sep, "\x00");
        }

        for segment in normalized.split('\x00') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let cmd_part = skip_env_assignments(segment);

            let base_cmd = cmd_part
                .split_whitespace()
                .next()
                .unwrap_or("")
                .rsplit('/')
                .next()
                .unwrap_or("");

            if base_cmd.is_empty() {
                continue;
            }

            if !self
                .allowed_commands
                .iter()
                .any(|allowed| allowed == base_cmd)
            {
                return false;
            }
        }

        // At least one command must be present
        normalized.split('\x00').any(|s| {
            let s = skip_env_assignments(s.trim());
            s.split_whitespace().next().is_some_and(|w| !w.is_empty())
        })
    }

    /// Check if a file path is allowed.
    ///
    /// Workspace-relative paths without traversal are in scope; absolute
    /// paths must fall under a configured allow-root (prefix match).
    pub fn is_path_allowed(&self, path: &str) -> bool {
        // Null bytes can truncate paths in C-backed syscalls
        if path.contains('\0') || path.trim().is_empty() {
            return false;
        }

        // Path traversal: ".." as a path component
        if Path::new(path)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return false;
        }

        // URL-encoded traversal attempts (e.g. ..%2f)
        let lower = path.to_lowercase();
        if lower.contains("..%2f") || lower.contains("%2f..") {
            return false;
        }

        let expanded = expand_tilde(path);
        if !Path::new(&expanded).is_absolute() {
            return true;
        }

        let candidate = Path::new(&expanded);
        self.allowed_paths.iter().any(|root| {
            let root = expand_tilde(root);
            candidate.starts_with(Path::new(&root))
        })
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var("HOME").ok().map(PathBuf::from) {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with_allowed(allowed_commands: &[&str]) -> AllowListPolicy {
        AllowListPolicy::new(
            allowed_commands.iter().map(ToString::to_string).collect(),
            vec![],
        )
    }

    #[test]
    fn skip_env_assignments_strips_assignments() {
        assert_eq!(skip_env_assignments("VAR=value cmd"), "cmd");
        assert_eq!(
            skip_env_assignments("VAR1=a VAR2=b cmd --flag"),
            "cmd --flag"
        );
        assert_eq!(skip_env_assignments("cmd"), "cmd");
        assert_eq!(skip_env_assignments(""), "");
    }

    #[test]
    fn accepts_allowed_commands() {
        let policy = policy_with_allowed(&["ls", "echo", "git"]);
        assert!(policy.is_command_allowed("ls"));
        assert!(policy.is_command_allowed("git status"));
        assert!(policy.is_command_allowed("  VAR=a   echo   hello   "));
    }

    #[test]
    fn rejects_unlisted_commands() {
        let policy = policy_with_allowed(&["ls"]);
        assert!(!policy.is_command_allowed("curl https://example.com"));
        assert!(!policy.is_command_allowed("Ls")); // case sensitive
    }

    #[test]
    fn rejects_empty_and_whitespace_only_commands() {
        let policy = policy_with_allowed(&["ls"]);
        assert!(!policy.is_command_allowed(""));
        assert!(!policy.is_command_allowed("   \t  \n  "));
    }

    #[test]
    fn rejects_subshell_expansion_and_redirection() {
        let policy = policy_with_allowed(&["echo"]);
        assert!(!policy.is_command_allowed("echo $(whoami)"));
        assert!(!policy.is_command_allowed("echo `whoami`"));
        assert!(!policy.is_command_allowed("echo hi > out.txt"));
        assert!(!policy.is_command_allowed("echo <(cat x)"));
    }

    #[test]
    fn rejects_background_operator_but_allows_logical_and() {
        let policy = policy_with_allowed(&["ls", "echo"]);
        assert!(policy.is_command_allowed("ls && echo ok"));
        assert!(!policy.is_command_allowed("ls & echo ok"));
    }

    #[test]
    fn rejects_mixed_segments_with_one_disallowed_command() {
        let policy = policy_with_allowed(&["ls", "echo", "head"]);
        assert!(policy.is_command_allowed("ls | head"));
        assert!(!policy.is_command_allowed("ls && curl https://example.com"));
    }

    #[test]
    fn blocked_patterns_beat_the_allowlist() {
        let policy = policy_with_allowed(&["rm", "dd", "mkfs"]);
        assert!(!policy.is_command_allowed("rm -rf /"));
        assert!(!policy.is_command_allowed("rm   -rf   /"));
        assert!(!policy.is_command_allowed("mkfs /dev/sda1"));
        assert!(!policy.is_command_allowed("dd if=/dev/zero of=/dev/sda"));
    }

    #[test]
    fn relative_paths_are_in_scope() {
        let policy = AllowListPolicy::new(vec![], vec![]);
        assert!(policy.is_path_allowed("notes/todo.txt"));
        assert!(policy.is_path_allowed("src/main.rs"));
    }

    #[test]
    fn traversal_and_null_bytes_are_blocked() {
        let policy = AllowListPolicy::new(vec![], vec!["/tmp".into()]);
        assert!(!policy.is_path_allowed("../../etc/passwd"));
        assert!(!policy.is_path_allowed("file\0.txt"));
        assert!(!policy.is_path_allowed("..%2f..%2fetc/passwd"));
        assert!(!policy.is_path_allowed(""));
    }

    #[test]
    fn absolute_paths_require_an_allow_root() {
        let policy = AllowListPolicy::new(vec![], vec!["/tmp/agent".into()]);
        assert!(policy.is_path_allowed("/tmp/agent/report.txt"));
        assert!(!policy.is_path_allowed("/etc/passwd"));
        assert!(!policy.is_path_allowed("/tmp/other/file"));
    }

    #[test]
    fn default_deny_when_no_roots_configured() {
        let policy = AllowListPolicy::new(vec![], vec![]);
        assert!(!policy.is_path_allowed("/etc/passwd"));
    }
}
