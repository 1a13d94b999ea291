//! BuildLoop configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::planner::RankerKind;
use crate::stop::StopConfig;

/// Main BuildLoop configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stop thresholds and heuristic cost rates
    #[serde(rename = "loop")]
    pub loop_: LoopConfig,

    /// Store and checkpoint locations
    pub storage: StorageConfig,

    /// Gap ordering oracle
    pub planner: PlannerConfig,

    /// Parse result cache
    pub cache: CacheConfig,

    /// LLM provider configuration (used by the llm oracle)
    pub llm: LlmConfig,

    /// Log level override (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        let lp = &self.loop_;
        if !lp.budget_limit.is_finite() || lp.budget_limit < 0.0 {
            return Err(eyre::eyre!("loop.budget-limit must be a non-negative number"));
        }
        for (name, value) in [
            ("cost-per-missing-gap", lp.cost_per_missing_gap),
            ("cost-per-partial-gap", lp.cost_per_partial_gap),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(eyre::eyre!("loop.{} must be a non-negative number", name));
            }
        }
        if self.cache.parse_capacity == 0 {
            return Err(eyre::eyre!("cache.parse-capacity must be at least 1"));
        }
        if self.storage.project.trim().is_empty() {
            return Err(eyre::eyre!("storage.project must not be empty"));
        }
        // The API key is checked when the LLM client is built, not here
        if self.planner.oracle == RankerKind::Llm && self.planner.oracle_timeout_ms == 0 {
            return Err(eyre::eyre!("planner.oracle-timeout-ms must be greater than 0"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    ///
    /// An explicit path must load. Otherwise the first readable file from
    /// [`Config::search_paths`] wins and unreadable ones are skipped.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::search_paths() {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => warn!(path = %candidate.display(), error = %e, "Skipping unreadable config"),
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// `./.buildloop.yml`, then `<config_dir>/buildloop/buildloop.yml`
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".buildloop.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("buildloop").join("buildloop.yml"));
        }
        paths
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }
}

/// Loop thresholds; 0 disables a threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    #[serde(rename = "budget-limit")]
    pub budget_limit: f64,

    #[serde(rename = "no-progress-limit")]
    pub no_progress_limit: u32,

    /// Estimated spend per planned MISSING gap
    #[serde(rename = "cost-per-missing-gap")]
    pub cost_per_missing_gap: f64,

    /// Estimated spend per planned PARTIAL gap
    #[serde(rename = "cost-per-partial-gap")]
    pub cost_per_partial_gap: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            budget_limit: 0.0,
            no_progress_limit: 3,
            cost_per_missing_gap: 0.50,
            cost_per_partial_gap: 0.25,
        }
    }
}

impl LoopConfig {
    pub fn stop_config(&self) -> StopConfig {
        StopConfig {
            max_iterations: self.max_iterations,
            budget_limit: self.budget_limit,
            no_progress_limit: self.no_progress_limit,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding items, dependencies and sessions
    #[serde(rename = "db-path")]
    pub db_path: PathBuf,

    /// Round-boundary checkpoint export
    #[serde(rename = "checkpoint-path")]
    pub checkpoint_path: PathBuf,

    /// Project scope for every item written
    pub project: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/buildloop on Linux)
        let db_path = dirs::data_dir()
            .map(|d| d.join("buildloop"))
            .unwrap_or_else(|| PathBuf::from(".buildloop"))
            .join("buildloop.db");

        Self {
            db_path,
            checkpoint_path: PathBuf::from(".buildloop").join("checkpoint.json"),
            project: "default".to_string(),
        }
    }
}

/// Planner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Ranking oracle: heuristic, llm or none
    pub oracle: RankerKind,

    /// Deadline for a single llm ranking call
    #[serde(rename = "oracle-timeout-ms")]
    pub oracle_timeout_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            oracle: RankerKind::Heuristic,
            oracle_timeout_ms: 30_000,
        }
    }
}

/// Parse cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum parsed documents kept before least-recently-used eviction
    #[serde(rename = "parse-capacity")]
    pub parse_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { parse_capacity: 16 }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            timeout_ms: 60_000,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.api_key_env
            )),
        }
    }
}
