//! Configuration parser
//!
//! Parses `commitrace.toml` into generation and backend settings.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Settings for the per-model generation runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationConfig {
    /// One slot per entry, in order. Duplicates are allowed.
    #[serde(default)]
    pub models: Vec<String>,
    /// Emit partial candidates while text is still streaming
    #[serde(default)]
    pub streaming: bool,
    /// Attempts per model for the transient session-tracking error (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear backoff unit between attempts, in milliseconds (default: 400)
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_backoff_ms() -> u64 {
    400
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            streaming: false,
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// How to reach the generator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Program that writes wire frames to stdout
    #[serde(default = "default_program")]
    pub program: String,
    /// Extra arguments placed before the per-request flags
    #[serde(default)]
    pub args: Vec<String>,
    /// Models the account may use. Empty disables the local check.
    #[serde(default)]
    pub allowed_models: Vec<String>,
}

fn default_program() -> String {
    "commit-gen".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            allowed_models: Vec::new(),
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Replaces `generation.models` when non-empty
    pub models: Vec<String>,
    /// Forces streaming on when set
    pub streaming: bool,
}

/// Top-level configuration parsed from commitrace.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Generation settings
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Backend settings
    #[serde(default)]
    pub backend: BackendConfig,
}

impl AppConfig {
    /// Parse a config file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse config content from a string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse commitrace.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file (if any), apply overrides, then validate the result.
    ///
    /// Without a file the defaults are used, so the overrides must at least
    /// name a model.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content).context("Failed to parse commitrace.toml")?
            }
            None => Self::default(),
        };

        if !overrides.models.is_empty() {
            config.generation.models.clone_from(&overrides.models);
        }
        if overrides.streaming {
            config.generation.streaming = true;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.generation.models.is_empty() {
            bail!("At least one model must be configured");
        }

        for model in &self.generation.models {
            if model.trim().is_empty() {
                bail!("Model id cannot be empty");
            }
        }

        if self.generation.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }

        if self.backend.program.trim().is_empty() {
            bail!("Backend program cannot be empty");
        }

        let allowed = &self.backend.allowed_models;
        if !allowed.is_empty() {
            for model in &self.generation.models {
                if !allowed.contains(model) {
                    bail!(
                        "Model '{model}' is not allowed (allowed: {})",
                        allowed.join(", ")
                    );
                }
            }
        }

        Ok(())
    }
}
