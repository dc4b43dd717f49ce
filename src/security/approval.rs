use crate::error::ApprovalError;
use crate::tools::Action;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

/// One approval request for one action. Never reused across actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub action: Action,
    pub reason: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(action: &Action, reason: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.clone(),
            reason: reason.into(),
            status: ApprovalStatus::Pending,
            requested_at: Utc::now(),
            decided_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: String },
}

/// Human-in-the-loop collaborator. Implementations block until a decision
/// is available; the manager owns timeout and cancellation.
#[async_trait]
pub trait ApprovalBroker: Send + Sync {
    async fn request_approval(&self, request: &ApprovalRequest)
    -> anyhow::Result<ApprovalDecision>;
}

pub struct AutoDenyBroker {
    pub reason: String,
}

#[async_trait]
impl ApprovalBroker for AutoDenyBroker {
    async fn request_approval(
        &self,
        _request: &ApprovalRequest,
    ) -> anyhow::Result<ApprovalDecision> {
        Ok(ApprovalDecision::Denied {
            reason: self.reason.clone(),
        })
    }
}

/// Skips the prompt entirely. Development only; wired up by the
/// `auto_approve` config flag.
pub struct AutoApproveBroker;

#[async_trait]
impl ApprovalBroker for AutoApproveBroker {
    async fn request_approval(
        &self,
        request: &ApprovalRequest,
    ) -> anyhow::Result<ApprovalDecision> {
        tracing::warn!(action = %request.action.summary(), "auto-approving critical action");
        Ok(ApprovalDecision::Approved)
    }
}

pub struct CliApprovalBroker;

#[async_trait]
impl ApprovalBroker for CliApprovalBroker {
    async fn request_approval(
        &self,
        request: &ApprovalRequest,
    ) -> anyhow::Result<ApprovalDecision> {
        eprintln!();
        eprintln!("┌─ Approval Required ──────────────────────────────");
        eprintln!("│ Action:  {}", request.action.summary());
        eprintln!("│ Reason:  {}", request.reason);
        eprintln!("├──────────────────────────────────────────────────");
        eprintln!("│ [A]llow  [D]eny");
        eprintln!("└──────────────────────────────────────────────────");
        eprint!("  > ");

        let ch = read_single_char().await?;
        match ch.to_ascii_lowercase() {
            'a' => Ok(ApprovalDecision::Approved),
            'd' => Ok(ApprovalDecision::Denied {
                reason: "denied by user".to_string(),
            }),
            other => Ok(ApprovalDecision::Denied {
                reason: format!("unrecognized input: '{other}'"),
            }),
        }
    }
}

async fn read_single_char() -> anyhow::Result<char> {
    // stdin is blocking; keep it off the runtime threads
    let ch = tokio::task::spawn_blocking(|| {
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        input
            .trim()
            .chars()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no input received"))
    })
    .await??;
    Ok(ch)
}

/// Resolves approval requests synchronously against the broker, under a
/// hard timeout and the owning run's cancellation token. The wait here is
/// the one legitimate long block in the engine.
pub struct ApprovalManager {
    broker: Box<dyn ApprovalBroker>,
    timeout: Duration,
}

impl ApprovalManager {
    pub fn new(broker: Box<dyn ApprovalBroker>, timeout: Duration) -> Self {
        Self { broker, timeout }
    }

    /// Block until the request is resolved. Timeout and cancellation both
    /// resolve to a denial-class error; the wait can never hang forever.
    pub async fn resolve(
        &self,
        action: &Action,
        reason: &str,
        cancel: &CancellationToken,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut request = ApprovalRequest::new(action, reason);
        tracing::info!(
            action = %action.summary(),
            reason,
            "approval required, waiting for decision"
        );

        let decision = tokio::select! {
            () = cancel.cancelled() => {
                return Err(ApprovalError::Cancelled(
                    "objective run aborted while waiting".into(),
                ));
            }
            outcome = tokio::time::timeout(self.timeout, self.broker.request_approval(&request)) => {
                match outcome {
                    Err(_) => return Err(ApprovalError::TimedOut(self.timeout.as_secs())),
                    Ok(Err(e)) => {
                        return Err(ApprovalError::Denied(format!("broker failed: {e}")));
                    }
                    Ok(Ok(decision)) => decision,
                }
            }
        };

        request.decided_at = Some(Utc::now());
        match decision {
            ApprovalDecision::Approved => {
                request.status = ApprovalStatus::Approved;
                tracing::info!(request_id = %request.id, "action approved");
                Ok(request)
            }
            ApprovalDecision::Denied { reason } => {
                request.status = ApprovalStatus::Denied;
                tracing::warn!(request_id = %request.id, reason, "action denied");
                Err(ApprovalError::Denied(reason))
            }
        }
    }
}

/// Keyword predicate for criticality: any string argument containing a
/// configured danger word flags the action.
pub fn matching_danger_keyword<'a>(action: &Action, keywords: &'a [String]) -> Option<&'a str> {
    for value in action.arguments.values() {
        let Some(text) = value.as_str() else { continue };
        let lowered = text.to_lowercase();
        for keyword in keywords {
            let hit = lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == keyword.as_str());
            if hit {
                return Some(keyword);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn shell_action(command: &str) -> Action {
        let mut args = Map::new();
        args.insert("command".into(), json!(command));
        Action::new("shell", args)
    }

    struct StallBroker;

    #[async_trait]
    impl ApprovalBroker for StallBroker {
        async fn request_approval(
            &self,
            _request: &ApprovalRequest,
        ) -> anyhow::Result<ApprovalDecision> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ApprovalDecision::Approved)
        }
    }

    #[tokio::test]
    async fn auto_deny_broker_denies() {
        let manager = ApprovalManager::new(
            Box::new(AutoDenyBroker {
                reason: "non-interactive context".into(),
            }),
            Duration::from_secs(5),
        );
        let err = manager
            .resolve(&shell_action("rm junk"), "keyword: rm", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::Denied(_)));
    }

    #[tokio::test]
    async fn auto_approve_broker_approves_and_stamps_decision() {
        let manager =
            ApprovalManager::new(Box::new(AutoApproveBroker), Duration::from_secs(5));
        let request = manager
            .resolve(&shell_action("rm junk"), "keyword: rm", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(request.status, ApprovalStatus::Approved);
        assert!(request.decided_at.is_some());
    }

    #[tokio::test]
    async fn stalled_broker_times_out_to_denial() {
        let manager = ApprovalManager::new(Box::new(StallBroker), Duration::from_millis(20));
        let err = manager
            .resolve(&shell_action("rm junk"), "keyword: rm", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::TimedOut(_)));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait() {
        let manager = ApprovalManager::new(Box::new(StallBroker), Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let pre_cancelled = cancel.clone();
        pre_cancelled.cancel();

        let err = manager
            .resolve(&shell_action("rm junk"), "keyword: rm", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::Cancelled(_)));
    }

    #[test]
    fn danger_keywords_match_whole_words() {
        let keywords = vec!["rm".to_string(), "install".to_string()];
        assert_eq!(
            matching_danger_keyword(&shell_action("rm -rf build"), &keywords),
            Some("rm")
        );
        assert_eq!(
            matching_danger_keyword(&shell_action("pip install requests"), &keywords),
            Some("install")
        );
        // "rm" inside "format" or "charm" must not trip the predicate.
        assert_eq!(
            matching_danger_keyword(&shell_action("echo charm"), &keywords),
            None
        );
    }

    #[test]
    fn requests_start_pending_and_unreused() {
        let action = shell_action("rm junk");
        let a = ApprovalRequest::new(&action, "keyword: rm");
        let b = ApprovalRequest::new(&action, "keyword: rm");
        assert_eq!(a.status, ApprovalStatus::Pending);
        assert_ne!(a.id, b.id);
    }
}
