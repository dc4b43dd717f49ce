use thiserror::Error;

use crate::security::SecurityViolation;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Crate-wide error hierarchy, one variant per subsystem.
///
/// The split matters for recovery: security violations and approval
/// outcomes are policy results, tool failures feed the retry chain, and
/// memory/planning failures are fatal to a run. Ad-hoc context inside a
/// subsystem still travels as `anyhow` and lands in `Other`.
#[derive(Debug, Error)]
pub enum PilotError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Security / policy ───────────────────────────────────────────────
    #[error("security: {0}")]
    Security(#[from] SecurityViolation),

    // ── Approval workflow ───────────────────────────────────────────────
    #[error("approval: {0}")]
    Approval(#[from] ApprovalError),

    // ── Tools ───────────────────────────────────────────────────────────
    #[error("tool: {0}")]
    Tool(#[from] ToolError),

    // ── Memory ──────────────────────────────────────────────────────────
    #[error("memory: {0}")]
    Memory(#[from] MemoryError),

    // ── Planning collaborator ───────────────────────────────────────────
    #[error("planning: {0}")]
    Planning(#[from] PlanningError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Approval errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval denied: {0}")]
    Denied(String),

    #[error("approval timed out after {0}s")]
    TimedOut(u64),

    #[error("approval wait cancelled: {0}")]
    Cancelled(String),
}

// ─── Tool errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("no tool registered under '{name}'")]
    NotFound { name: String },

    #[error("'{name}' execution failed: {message}")]
    Execution { name: String, message: String },

    #[error("'{name}' rejected arguments: {reason}")]
    InvalidArguments { name: String, reason: String },
}

// ─── Memory errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("embedding provider failed: {0}")]
    Embedding(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("memory backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

// ─── Planning errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("planner failed to respond: {0}")]
    NoResponse(String),

    #[error("planner proposed malformed action: {0}")]
    MalformedAction(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, PilotError>;
