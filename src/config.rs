use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub inspections: InspectionConfig,
    #[serde(default)]
    pub task: TaskConfig,
}

#[derive(Deserialize, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_secs", &self.retry_backoff_secs)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Ceiling on repair attempts.
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
    /// Ceiling on total engine node invocations.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
    #[serde(default)]
    pub run_inspections: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            recursion_limit: default_recursion_limit(),
            run_inspections: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    /// Bytes of stdout and of stderr kept per run.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: default_sandbox_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for the external static-inspection script.
#[derive(Debug, Deserialize, Clone)]
pub struct InspectionConfig {
    #[serde(default = "default_inspection_script")]
    pub script: PathBuf,
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    #[serde(default = "default_inspection_profile")]
    pub profile: PathBuf,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_inspection_timeout")]
    pub timeout_secs: u64,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            script: default_inspection_script(),
            project_root: default_project_root(),
            profile: default_inspection_profile(),
            scratch_dir: default_scratch_dir(),
            timeout_secs: default_inspection_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TaskConfig {
    #[serde(default)]
    pub buggy_code: String,
    pub docstring: Option<String>,
    /// Test suite supplied up front; skips test generation when present.
    pub tests: Option<String>,
    /// Held-out tests run once against the final candidate.
    pub reference_tests: Option<String>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_secs() -> u64 {
    2
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_max_iter() -> u32 {
    5
}

fn default_recursion_limit() -> usize {
    1000
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_sandbox_timeout() -> u64 {
    60
}

fn default_max_output_bytes() -> usize {
    crate::sandbox::runner::DEFAULT_OUTPUT_LIMIT
}

fn default_inspection_script() -> PathBuf {
    PathBuf::from("scripts/inspect.sh")
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_inspection_profile() -> PathBuf {
    PathBuf::from("resources/profiles_settings.xml")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from(".agent")
}

fn default_inspection_timeout() -> u64 {
    600
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("mender").required(false));
        }

        // Environment variable overrides with MENDER_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("MENDER")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Check the ceilings and task inputs before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.task.buggy_code.trim().is_empty() {
            return Err(AppError::Config("task.buggy_code is empty".to_string()));
        }
        if self.workflow.max_iter == 0 {
            return Err(AppError::Config(
                "workflow.max_iter must be at least 1".to_string(),
            ));
        }
        if self.workflow.recursion_limit == 0 {
            return Err(AppError::Config(
                "workflow.recursion_limit must be at least 1".to_string(),
            ));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(AppError::Config(
                "sandbox.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.sandbox.max_output_bytes == 0 {
            return Err(AppError::Config(
                "sandbox.max_output_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
