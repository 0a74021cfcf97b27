mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::Context;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.pipeline;
        if p.max_structured_attempts == 0 {
            anyhow::bail!("pipeline.max_structured_attempts must be at least 1");
        }
        if p.max_top_k == 0 || p.default_top_k == 0 {
            anyhow::bail!("pipeline.default_top_k and pipeline.max_top_k must be at least 1");
        }
        if p.planner_cache_size == 0 || p.retrieval_cache_size == 0 {
            anyhow::bail!("cache sizes must be at least 1");
        }
        if self.search.min_limit > self.search.max_limit {
            anyhow::bail!("search.min_limit must not exceed search.max_limit");
        }
        if !(0.0..=1.0).contains(&self.search.recency_lambda) {
            anyhow::bail!("search.recency_lambda must be within [0, 1]");
        }
        Ok(())
    }
}
