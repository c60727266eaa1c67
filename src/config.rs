//! Runtime configuration loaded once from `config.yaml`.
//!
//! Every section and field has a default, so an empty file (or a file that
//! only overrides a couple of values) is valid. The API credential is not part
//! of this file; it comes from the environment via the CLI.
//!
//! ```yaml
//! api:
//!   model: mistral-small-latest
//!   base_url: https://api.mistral.ai/v1
//! articles:
//!   source_url: https://example.com/optimized_titles.json
//!   limit: 50
//! optimization:
//!   max_retries: 3
//!   retry_delay: 5
//!   exponential_backoff: true
//!   max_backoff: 30
//! batch:
//!   size: 10
//!   time_budget_secs: 1800
//! ```

use crate::backoff::BackoffPolicy;
use crate::classifier::ClassifierMode;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// The category vocabulary used when the config does not provide one.
pub const DEFAULT_CATEGORIES: [&str; 10] = [
    "Technology",
    "Business",
    "Science",
    "Health",
    "Entertainment",
    "Sports",
    "Politics",
    "Education",
    "Travel",
    "Lifestyle",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub articles: ArticlesConfig,
    pub classifier: ClassifierConfig,
    pub optimization: OptimizationConfig,
    pub batch: BatchConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Model identifier sent with every request.
    #[serde(alias = "mistral_model")]
    pub model: String,
    /// Base URL of an OpenAI-compatible API (`/chat/completions` is appended).
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            model: "mistral-small-latest".to_string(),
            base_url: "https://api.mistral.ai/v1".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArticlesConfig {
    /// URL of the JSON feed with the candidate articles.
    pub source_url: String,
    /// Only the first `limit` feed entries are considered.
    pub limit: Option<usize>,
}

impl Default for ArticlesConfig {
    fn default() -> Self {
        Self {
            source_url: "https://raw.githubusercontent.com/ahmedahmedovv/rss-ai-title/refs/heads/main/data/optimized_titles.json".to_string(),
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub mode: ClassifierMode,
    /// Allowed labels. Answers matching one case-insensitively are normalized
    /// to its spelling.
    pub categories: Vec<String>,
    /// Optional user prompt with `{title}`, `{optimized_title}` and
    /// `{description}` placeholders.
    pub prompt_template: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mode: ClassifierMode::CategoryOnly,
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            prompt_template: None,
        }
    }
}

/// Retry and pacing knobs. Durations are in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Total classifier attempts per article while rate limited.
    pub max_retries: u32,
    pub retry_delay: f64,
    pub exponential_backoff: bool,
    pub max_backoff: f64,
    /// Upper bound of random jitter added to each backoff, in milliseconds.
    pub jitter_ms: u64,
    /// Minimum pause between consecutive classifier calls.
    pub request_delay: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: 5.0,
            exponential_backoff: false,
            max_backoff: 30.0,
            jitter_ms: 0,
            request_delay: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub size: usize,
    /// Wall-clock budget for a whole run; unset means unbounded.
    pub time_budget_secs: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 10,
            time_budget_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    #[serde(alias = "categorized_articles_file")]
    pub output_file: String,
    pub logs_dir: PathBuf,
    pub log_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_file: "categorized_articles.json".to_string(),
            logs_dir: PathBuf::from("logs"),
            log_file: "categorizer.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Read and validate the configuration file.
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// file that was asked for explicitly is an error.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                info!("No config file found; using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Parse and validate a YAML document.
    #[cfg(test)]
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Self::parse(raw, Path::new("<inline>"))
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = if raw.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let o = &self.optimization;
        for (name, secs) in [
            ("optimization.retry_delay", o.retry_delay),
            ("optimization.max_backoff", o.max_backoff),
            ("optimization.request_delay", o.request_delay),
        ] {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number of seconds, got {secs}"
                )));
            }
        }
        if o.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "optimization.max_retries must be at least 1".to_string(),
            ));
        }
        if self.batch.size == 0 {
            return Err(ConfigError::Invalid(
                "batch.size must be at least 1".to_string(),
            ));
        }
        if self.classifier.categories.is_empty() {
            return Err(ConfigError::Invalid(
                "classifier.categories must not be empty".to_string(),
            ));
        }
        if self.paths.output_file.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "paths.output_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        let o = &self.optimization;
        BackoffPolicy {
            max_attempts: o.max_retries,
            base_delay: Duration::from_secs_f64(o.retry_delay),
            exponential: o.exponential_backoff,
            max_delay: Duration::from_secs_f64(o.max_backoff),
            jitter: Duration::from_millis(o.jitter_ms),
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.optimization.request_delay)
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.batch.time_budget_secs.map(Duration::from_secs)
    }

    pub fn store_path(&self) -> PathBuf {
        self.paths.data_dir.join(&self.paths.output_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.paths.logs_dir.join(&self.paths.log_file)
    }
}
