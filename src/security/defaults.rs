#[must_use]
pub fn default_allowed_commands() -> Vec<String> {
    vec![
        "ls".into(),
        "cat".into(),
        "grep".into(),
        "find".into(),
        "echo".into(),
        "pwd".into(),
        "wc".into(),
        "head".into(),
        "tail".into(),
        "git".into(),
        "python3".into(),
        "uname".into(),
        "date".into(),
        "which".into(),
    ]
}

/// Keywords that flag an action as critical. Matched case-insensitively
/// against every string argument; a hit routes the action through the
/// approval workflow.
#[must_use]
pub fn default_danger_keywords() -> Vec<String> {
    vec![
        "delete".into(),
        "remove".into(),
        "rm".into(),
        "rmdir".into(),
        "format".into(),
        "mkfs".into(),
        "dd".into(),
        "sudo".into(),
        "chmod".into(),
        "chown".into(),
        "firewall".into(),
        "iptables".into(),
        "install".into(),
        "uninstall".into(),
        "apt".into(),
        "pip".into(),
        "brew".into(),
        "reboot".into(),
        "shutdown".into(),
        "halt".into(),
    ]
}

/// Destructive shapes blocked even for allow-listed commands.
pub const BLOCKED_COMMAND_PATTERNS: &[&str] = &["rm -rf /", "mkfs", "dd if="];
