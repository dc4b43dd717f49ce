pub mod approval;
pub mod defaults;
pub mod policy;
pub mod script;

pub use approval::{
    ApprovalBroker, ApprovalDecision, ApprovalManager, ApprovalRequest, ApprovalStatus,
    AutoApproveBroker, AutoDenyBroker, CliApprovalBroker,
};
pub use defaults::{default_allowed_commands, default_danger_keywords};
pub use policy::AllowListPolicy;

use crate::config::SecurityConfig;
use crate::tools::{Action, ToolRegistry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Which gate layer rejected the action.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleKind {
    DisallowedCommand,
    DisallowedPath,
    DangerousAstPattern,
    PendingApproval,
}

/// A policy denial. Never retried; always logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{rule_kind}: {detail}")]
pub struct SecurityViolation {
    pub rule_kind: RuleKind,
    pub detail: String,
}

impl SecurityViolation {
    pub fn new(rule_kind: RuleKind, detail: impl Into<String>) -> Self {
        Self {
            rule_kind,
            detail: detail.into(),
        }
    }

    /// Allow-list and static-analysis denials abort the whole run; an
    /// approval denial is terminal for the one action only.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.rule_kind != RuleKind::PendingApproval
    }
}

/// Snapshot of the active policy, for the CLI report.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub allowed_commands: Vec<String>,
    pub allowed_paths: Vec<String>,
    pub danger_keywords: usize,
    pub run_level_approval_cache: bool,
    pub violation_log: PathBuf,
}

/// The gate every action passes before it may produce a side effect.
/// Check order is fixed and short-circuiting: allow-list, then static
/// analysis, then approval.
pub struct SecurityGate {
    policy: AllowListPolicy,
    approvals: ApprovalManager,
    danger_keywords: Vec<String>,
    run_level_approval_cache: bool,
    violation_log_path: PathBuf,
    registry: Arc<ToolRegistry>,
}

impl SecurityGate {
    pub fn new(
        config: &SecurityConfig,
        state_dir: &Path,
        registry: Arc<ToolRegistry>,
        broker: Box<dyn ApprovalBroker>,
    ) -> Self {
        Self {
            policy: AllowListPolicy::new(
                config.allowed_commands.clone(),
                config.allowed_paths.clone(),
            ),
            approvals: ApprovalManager::new(
                broker,
                Duration::from_secs(config.approval_timeout_secs),
            ),
            danger_keywords: config.danger_keywords.clone(),
            run_level_approval_cache: config.run_level_approval_cache,
            violation_log_path: state_dir.join("security").join("violations.jsonl"),
            registry,
        }
    }

    pub fn policy(&self) -> &AllowListPolicy {
        &self.policy
    }

    pub fn report(&self) -> SecurityReport {
        SecurityReport {
            allowed_commands: self.policy.allowed_commands().to_vec(),
            allowed_paths: self.policy.allowed_paths().to_vec(),
            danger_keywords: self.danger_keywords.len(),
            run_level_approval_cache: self.run_level_approval_cache,
            violation_log: self.violation_log_path.clone(),
        }
    }

    /// Validate one action. `approved_cache` belongs to the calling run;
    /// it is only consulted when run-level approval caching is enabled.
    pub async fn validate(
        &self,
        action: &Action,
        cancel: &CancellationToken,
        approved_cache: &mut HashSet<String>,
    ) -> Result<(), SecurityViolation> {
        if let Err(violation) = self.check_allow_list(action) {
            self.record_violation(action, &violation).await;
            return Err(violation);
        }

        if let Err(violation) = self.check_static_analysis(action) {
            self.record_violation(action, &violation).await;
            return Err(violation);
        }

        if let Err(violation) = self.check_approval(action, cancel, approved_cache).await {
            self.record_violation(action, &violation).await;
            return Err(violation);
        }

        tracing::debug!(action = %action.summary(), "security gate passed");
        Ok(())
    }

    fn check_allow_list(&self, action: &Action) -> Result<(), SecurityViolation> {
        if let Some(command) = action.str_arg("command") {
            if !self.policy.is_command_allowed(command) {
                return Err(SecurityViolation::new(
                    RuleKind::DisallowedCommand,
                    format!("command not allowed: {command}"),
                ));
            }
        }

        if let Some(path) = action.str_arg("path") {
            if !self.policy.is_path_allowed(path) {
                return Err(SecurityViolation::new(
                    RuleKind::DisallowedPath,
                    format!("path not allowed: {path}"),
                ));
            }
        }

        Ok(())
    }

    fn check_static_analysis(&self, action: &Action) -> Result<(), SecurityViolation> {
        let Some(tool) = self.registry.get(&action.tool_name) else {
            return Ok(());
        };

        for payload_arg in tool.dangerous_patterns() {
            let Some(payload) = action.str_arg(payload_arg) else {
                continue;
            };
            if let Err(violations) = script::validate_source(payload) {
                return Err(SecurityViolation::new(
                    RuleKind::DangerousAstPattern,
                    violations.join("; "),
                ));
            }
        }

        Ok(())
    }

    async fn check_approval(
        &self,
        action: &Action,
        cancel: &CancellationToken,
        approved_cache: &mut HashSet<String>,
    ) -> Result<(), SecurityViolation> {
        let tool_flag = self
            .registry
            .get(&action.tool_name)
            .is_some_and(|tool| tool.requires_approval());

        let reason = if action.requires_approval || tool_flag {
            Some("tool requires approval".to_string())
        } else {
            approval::matching_danger_keyword(action, &self.danger_keywords)
                .map(|keyword| format!("danger keyword: {keyword}"))
        };

        let Some(reason) = reason else {
            return Ok(());
        };

        let fingerprint = action.fingerprint();
        if self.run_level_approval_cache && approved_cache.contains(&fingerprint) {
            tracing::debug!(action = %action.summary(), "approval served from run cache");
            return Ok(());
        }

        match self.approvals.resolve(action, &reason, cancel).await {
            Ok(_request) => {
                if self.run_level_approval_cache {
                    approved_cache.insert(fingerprint);
                }
                Ok(())
            }
            Err(e) => Err(SecurityViolation::new(
                RuleKind::PendingApproval,
                e.to_string(),
            )),
        }
    }

    /// Append to the audit log. Append-only by construction: the file is
    /// only ever opened with `append`, never truncated.
    async fn record_violation(&self, action: &Action, violation: &SecurityViolation) {
        tracing::warn!(
            action = %action.summary(),
            rule = %violation.rule_kind,
            detail = %violation.detail,
            "security violation"
        );

        let record = serde_json::json!({
            "recorded_at": Utc::now().to_rfc3339(),
            "action_id": action.id,
            "tool": action.tool_name,
            "summary": action.summary(),
            "rule_kind": violation.rule_kind,
            "detail": violation.detail,
        });

        if let Err(e) = self.append_log_line(&record.to_string()).await {
            tracing::error!("failed to append violation log: {e}");
        }
    }

    async fn append_log_line(&self, line: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.violation_log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.violation_log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}
