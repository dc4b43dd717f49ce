use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "deskpilot.toml";

/// Top-level configuration, one struct per TOML section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory tools operate in. Not serialized; resolved at load time.
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Directory for durable state (memory db, violation log).
    #[serde(skip)]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard ceiling on planning rounds per objective run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Hard per-action timeout for tool dispatch.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Allow-listed base commands (exact match, default-deny).
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    /// Allow-listed absolute path roots (prefix match). Workspace-relative
    /// paths are always in scope; anything absolute must match a root.
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    /// Keywords that flag an action as critical (approval required).
    #[serde(default = "default_danger_keywords")]
    pub danger_keywords: Vec<String>,
    /// How long the approval wait may block before resolving to denied.
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    /// Cache approvals for identical actions within one objective run.
    /// Off by default; per-action approval is the safe baseline.
    #[serde(default)]
    pub run_level_approval_cache: bool,
    /// Skip the approval prompt entirely. Development only.
    #[serde(default)]
    pub auto_approve: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite" is the only durable backend.
    #[serde(default = "default_memory_backend")]
    pub backend: String,
    /// Embedding provider: "hash" | "openai" | "custom:URL"
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,
    /// Embedding model name (remote providers only).
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Embedding vector dimensions.
    #[serde(default = "default_embedding_dims")]
    pub embedding_dimensions: usize,
    /// Environment variable holding the remote provider API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_action_timeout_secs() -> u64 {
    60
}

fn default_allowed_commands() -> Vec<String> {
    crate::security::default_allowed_commands()
}

fn default_danger_keywords() -> Vec<String> {
    crate::security::default_danger_keywords()
}

fn default_approval_timeout_secs() -> u64 {
    30
}

fn default_memory_backend() -> String {
    "sqlite".to_string()
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dims() -> usize {
    384
}

fn default_api_key_env() -> String {
    "DESKPILOT_EMBEDDING_API_KEY".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            action_timeout_secs: default_action_timeout_secs(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            allowed_paths: Vec::new(),
            danger_keywords: default_danger_keywords(),
            approval_timeout_secs: default_approval_timeout_secs(),
            run_level_approval_cache: false,
            auto_approve: false,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            embedding_provider: default_embedding_provider(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dims(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Config {
    /// Load the config from `<workspace>/deskpilot.toml`, writing a default
    /// file on first run. `workspace` defaults to the current directory;
    /// durable state lands in the platform data dir unless the workspace
    /// carries its own `.deskpilot/` directory.
    pub fn load_or_init(workspace: Option<PathBuf>) -> Result<Self, ConfigError> {
        let workspace_dir = match workspace {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(ConfigError::Io)?,
        };

        let path = workspace_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            let config = Self {
                workspace_dir: PathBuf::new(),
                state_dir: PathBuf::new(),
                orchestrator: OrchestratorConfig::default(),
                security: SecurityConfig::default(),
                memory: MemoryConfig::default(),
            };
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| ConfigError::Load(e.to_string()))?;
            std::fs::write(&path, rendered)?;
            tracing::info!(path = %path.display(), "wrote default config");
            config
        };

        config.workspace_dir = workspace_dir;
        config.state_dir = resolve_state_dir(&config.workspace_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| ConfigError::Load(e.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_iterations == 0 {
            return Err(ConfigError::Validation(
                "orchestrator.max_iterations must be at least 1".into(),
            ));
        }
        if self.orchestrator.action_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "orchestrator.action_timeout_secs must be at least 1".into(),
            ));
        }
        if self.memory.embedding_dimensions == 0 {
            return Err(ConfigError::Validation(
                "memory.embedding_dimensions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A workspace-local `.deskpilot/` directory wins over the platform data dir.
fn resolve_state_dir(workspace_dir: &Path) -> PathBuf {
    let local = workspace_dir.join(".deskpilot");
    if local.exists() {
        return local;
    }
    directories::ProjectDirs::from("", "", "deskpilot")
        .map_or(local, |dirs| dirs.data_local_dir().to_path_buf())
}
