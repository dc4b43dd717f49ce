use crate::error::MemoryError;
use crate::memory::{Memory, MemoryDraft, MemoryKind};
use crate::security::{SecurityGate, SecurityViolation};
use crate::tools::{Action, ActionResult, ToolContext, ToolRegistry};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Known-equivalent command variants for tier-2 substitution. The
/// controller only draws from this table, never invents alternatives.
pub const COMMAND_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("python", "python3"),
    ("pip", "pip3"),
    ("node", "nodejs"),
    ("sh", "bash"),
];

/// The three recovery strategies, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryTier {
    ArgumentCorrection,
    AlternativeSubstitution,
    ContextAugmentation,
}

impl RetryTier {
    pub const ALL: [Self; 3] = [
        Self::ArgumentCorrection,
        Self::AlternativeSubstitution,
        Self::ContextAugmentation,
    ];

    #[must_use]
    pub const fn strategy_name(self) -> &'static str {
        match self {
            Self::ArgumentCorrection => "argument_correction",
            Self::AlternativeSubstitution => "alternative_substitution",
            Self::ContextAugmentation => "context_augmentation",
        }
    }
}

/// One retry attempt as it went into the audit log.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub tier: RetryTier,
    pub action: Action,
    pub result: ActionResult,
}

/// What the healing chain produced.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Final result — the success that halted the chain, or the last failure.
    pub result: ActionResult,
    pub attempts: Vec<RetryAttempt>,
    /// True when all three tiers ran and failed.
    pub exhausted: bool,
    /// Set when a mutated action was stopped by the gate; the chain halts
    /// there (violations are never retried).
    pub violation: Option<SecurityViolation>,
}

/// Tiered self-healing: after a failed dispatch, mutate the action (never
/// in place) and resubmit through the full gate, at most three times.
pub struct RetryController {
    memory: Arc<dyn Memory>,
    gate: Arc<SecurityGate>,
    registry: Arc<ToolRegistry>,
    action_timeout: Duration,
}

impl RetryController {
    pub fn new(
        memory: Arc<dyn Memory>,
        gate: Arc<SecurityGate>,
        registry: Arc<ToolRegistry>,
        action_timeout: Duration,
    ) -> Self {
        Self {
            memory,
            gate,
            registry,
            action_timeout,
        }
    }

    /// Run the healing chain for a failed action. Memory failures
    /// propagate, never get swallowed.
    pub async fn heal(
        &self,
        action: &Action,
        initial: &ActionResult,
        tool_ctx: &ToolContext,
        cancel: &CancellationToken,
        approved_cache: &mut HashSet<String>,
    ) -> Result<RetryOutcome, MemoryError> {
        let mut last_action = action.clone();
        let mut last_result = initial.clone();
        let mut fixes: Vec<&'static str> = Vec::new();
        let mut attempts = Vec::new();

        for tier in RetryTier::ALL {
            let error_text = last_result.error_text().to_string();
            let mutated_args = match tier {
                RetryTier::ArgumentCorrection => {
                    correct_arguments(&last_action.arguments, &error_text)
                }
                RetryTier::AlternativeSubstitution => {
                    substitute_alternative(&last_action.arguments)
                }
                RetryTier::ContextAugmentation => {
                    self.augment_with_memory(&last_action.arguments, &error_text)
                        .await?
                }
            };

            let candidate = last_action.derive(mutated_args);
            fixes.push(tier.strategy_name());
            tracing::info!(
                tier = tier.strategy_name(),
                action = %candidate.summary(),
                "self-healing retry"
            );

            if let Err(violation) = self
                .gate
                .validate(&candidate, cancel, approved_cache)
                .await
            {
                // The mutation walked into policy; the chain stops here.
                return Ok(RetryOutcome {
                    result: last_result,
                    attempts,
                    exhausted: false,
                    violation: Some(violation),
                });
            }

            let result = match self
                .registry
                .dispatch(&candidate, tool_ctx, self.action_timeout)
                .await
            {
                Ok(result) => result,
                Err(e) => ActionResult::failed(e.to_string(), Duration::ZERO),
            };

            record_attempt(self.memory.as_ref(), &candidate, &result, &fixes).await?;
            attempts.push(RetryAttempt {
                tier,
                action: candidate.clone(),
                result: result.clone(),
            });

            if result.success {
                tracing::info!(tier = tier.strategy_name(), "self-healing succeeded");
                return Ok(RetryOutcome {
                    result,
                    attempts,
                    exhausted: false,
                    violation: None,
                });
            }

            last_action = candidate;
            last_result = result;
        }

        tracing::warn!(action = %action.summary(), "retry tiers exhausted");
        Ok(RetryOutcome {
            result: last_result,
            attempts,
            exhausted: true,
            violation: None,
        })
    }

    /// Tier 3: pull the most similar past failure and attach what was tried
    /// against it as recovery context.
    async fn augment_with_memory(
        &self,
        arguments: &Map<String, Value>,
        error_text: &str,
    ) -> Result<Map<String, Value>, MemoryError> {
        let hits = self.memory.similar_errors(error_text, 3).await?;
        let mut arguments = arguments.clone();

        if let Some(top) = hits.first() {
            let fixes = top
                .entry
                .metadata
                .get("attempted_fixes")
                .cloned()
                .unwrap_or_default();
            arguments.insert(
                "recovery_context".into(),
                json!(format!(
                    "similar past failure: {}; attempted fixes: {}",
                    top.entry.content, fixes
                )),
            );
        }

        Ok(arguments)
    }
}

/// Record one attempt: an Action entry plus its Success/Error follow-up,
/// both carrying the ordered list of strategies tried so far.
pub async fn record_attempt(
    memory: &dyn Memory,
    action: &Action,
    result: &ActionResult,
    attempted_fixes: &[&str],
) -> Result<(), MemoryError> {
    let fixes = attempted_fixes.join(",");

    memory
        .store(
            MemoryDraft::new(MemoryKind::Action, action.summary())
                .with_meta("tool", &action.tool_name)
                .with_meta("action_id", &action.id)
                .with_meta("attempted_fixes", &fixes),
        )
        .await?;

    let follow_up = if result.success {
        let mut output: String = result.output.chars().take(100).collect();
        if output.is_empty() {
            output.push_str("(no output)");
        }
        MemoryDraft::new(
            MemoryKind::Success,
            format!("{} → {}", action.summary(), output),
        )
    } else {
        MemoryDraft::new(
            MemoryKind::Error,
            format!("ERROR: {} failed: {}", action.summary(), result.error_text()),
        )
        .with_meta("error", result.error_text())
    };

    memory
        .store(
            follow_up
                .with_meta("tool", &action.tool_name)
                .with_meta("action_id", &action.id)
                .with_meta("attempted_fixes", &fixes),
        )
        .await?;

    Ok(())
}

/// Tier 1: strip the flag the error text complains about, or drop an
/// unmatched quote character; otherwise the arguments come back unchanged.
fn correct_arguments(arguments: &Map<String, Value>, error_text: &str) -> Map<String, Value> {
    let mut arguments = arguments.clone();
    let Some(command) = arguments.get("command").and_then(Value::as_str) else {
        return arguments;
    };

    if let Some(flag) = flagged_option(error_text) {
        let corrected: Vec<&str> = command
            .split_whitespace()
            .filter(|token| *token != flag)
            .collect();
        arguments.insert("command".into(), json!(corrected.join(" ")));
    } else if mentions_unmatched_quote(error_text) {
        let stripped = strip_unmatched_quote(command);
        arguments.insert("command".into(), json!(stripped));
    }

    arguments
}

/// `sh` reports an unclosed quote as an EOF while scanning for the match.
fn mentions_unmatched_quote(error_text: &str) -> bool {
    let lowered = error_text.to_lowercase();
    lowered.contains("unterminated quoted string")
        || lowered.contains("looking for matching")
        || lowered.contains("unexpected eof")
}

/// Drop the last occurrence of any quote character present an odd number
/// of times.
fn strip_unmatched_quote(command: &str) -> String {
    let mut command = command.to_string();
    for quote in ['\'', '"'] {
        if command.matches(quote).count() % 2 == 1 {
            if let Some(at) = command.rfind(quote) {
                command.remove(at);
            }
        }
    }
    command
}

/// Extract the offending flag from "unrecognized option '--x'"-shaped
/// error messages.
fn flagged_option(error_text: &str) -> Option<String> {
    let lowered = error_text.to_lowercase();
    let phrase_at = ["unrecognized option", "unknown option", "invalid option"]
        .iter()
        .find_map(|phrase| lowered.find(phrase).map(|at| at + phrase.len()))?;

    // Offsets came from the lowered copy; bail on the (non-ASCII) off
    // chance they miss a char boundary rather than panic.
    let tail = error_text.get(phrase_at..)?;
    // Prefer a quoted token, else the first dash-prefixed word.
    let quoted = tail.split(['\'', '"']).nth(1).map(str::trim);
    match quoted {
        Some(token) if !token.is_empty() => Some(token.to_string()),
        _ => tail
            .split_whitespace()
            .find(|word| word.starts_with('-'))
            .map(|word| word.trim_matches([':', ',']).to_string()),
    }
}

/// Tier 2: swap the leading command token for a known-equivalent variant.
fn substitute_alternative(arguments: &Map<String, Value>) -> Map<String, Value> {
    let mut arguments = arguments.clone();
    let Some(command) = arguments.get("command").and_then(Value::as_str) else {
        return arguments;
    };

    let mut words = command.split_whitespace();
    let Some(head) = words.next() else {
        return arguments;
    };

    for (from, to) in COMMAND_SUBSTITUTIONS {
        if head == *from {
            let rest: Vec<&str> = words.collect();
            let replaced = if rest.is_empty() {
                (*to).to_string()
            } else {
                format!("{to} {}", rest.join(" "))
            };
            arguments.insert("command".into(), json!(replaced));
            break;
        }
    }

    arguments
}
