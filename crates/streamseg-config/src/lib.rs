use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;


/// Environment variable prefix, e.g. `STREAMSEG__STREAMING__SETTLE_WINDOW_MS=1200`
pub const ENV_PREFIX: &str = "STREAMSEG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub streaming: StreamingConfig,
    pub extraction: ExtractionConfig,
    pub approval: ApprovalConfig,
}

/// Timing knobs for the streaming/stable mode controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Quiet period after the last growth before content counts as settled
    pub settle_window_ms: u64,
    /// Bytes of new content needed to leave stable mode once it has been reached
    pub reopen_min_bytes: usize,
    /// Coalesce re-parses while streaming; `None` re-parses on every delta
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_reparse_interval_ms: Option<u64>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            settle_window_ms: 1000,
            reopen_min_bytes: 64,
            min_reparse_interval_ms: None,
        }
    }
}

impl StreamingConfig {
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    pub fn min_reparse_interval(&self) -> Option<Duration> {
        self.min_reparse_interval_ms.map(Duration::from_millis)
    }
}

/// Which detection strategies the extractor runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub fenced_blocks: bool,
    pub bare_json: bool,
    /// Retry failed parses after stripping trailing commas
    pub repair_json: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            fenced_blocks: true,
            bare_json: true,
            repair_json: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApprovalConfig {
    pub auto_approve: bool,
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment.
    ///
    /// When `config_path` is `None` the user config at
    /// `~/.config/streamseg/config.toml` is used if it exists.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            builder = builder.add_source(config::File::from(path));
        } else if let Some(default_path) = Self::default_config_path() {
            if default_path.exists() {
                builder = builder.add_source(config::File::from(default_path));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration and apply command line overrides on top
    pub fn load_with_overrides(
        config_path: Option<&str>,
        auto_approve: Option<bool>,
        settle_window_ms: Option<u64>,
    ) -> Result<Self> {
        let mut config = Self::load(config_path)?;

        if let Some(auto_approve) = auto_approve {
            config.approval.auto_approve = auto_approve;
        }
        if let Some(settle_window_ms) = settle_window_ms {
            config.streaming.settle_window_ms = settle_window_ms;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document directly, without touching the environment
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Invalid TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.streaming.settle_window_ms == 0 {
            anyhow::bail!("streaming.settle_window_ms must be greater than zero");
        }
        if let Some(interval) = self.streaming.min_reparse_interval_ms {
            if interval >= self.streaming.settle_window_ms {
                anyhow::bail!(
                    "streaming.min_reparse_interval_ms ({}) must be shorter than settle_window_ms ({})",
                    interval,
                    self.streaming.settle_window_ms
                );
            }
        }
        if !self.extraction.fenced_blocks && !self.extraction.bare_json {
            anyhow::bail!("at least one of extraction.fenced_blocks or extraction.bare_json must be enabled");
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("streamseg").join("config.toml"))
    }

    /// Write the configuration to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}
