use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::MAX_TOKENS_PER_COMMIT;
use crate::error::PipelineError;
use crate::retry::RetryPolicy;

/// Tunables of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of concurrent upload workers.
    pub concurrency: usize,
    /// Tokens per commit call; the last batch of a run may be smaller.
    pub max_batch_size: usize,
    /// Capacity of the worker -> batcher token stream. Defaults to `max_batch_size` when unset.
    pub token_buffer: Option<usize>,
    /// Policy applied to every upload and every commit.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_batch_size: MAX_TOKENS_PER_COMMIT,
            token_buffer: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_size == 0 || self.max_batch_size > MAX_TOKENS_PER_COMMIT {
            return Err(PipelineError::InvalidConfig(format!(
                "max_batch_size must be between 1 and {MAX_TOKENS_PER_COMMIT}, got {}",
                self.max_batch_size
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.token_buffer == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "token_buffer must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn token_buffer(&self) -> usize {
        self.token_buffer.unwrap_or(self.max_batch_size)
    }

    pub fn trace_loaded(&self) {
        info!(
            concurrency = self.concurrency,
            max_batch_size = self.max_batch_size,
            max_attempts = self.retry.max_attempts,
            "Loaded pipeline config"
        );
        debug!(?self, "Pipeline config loaded (full debug)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.token_buffer(), MAX_TOKENS_PER_COMMIT);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let config = PipelineConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_batch_size_above_commit_limit() {
        for size in [0, MAX_TOKENS_PER_COMMIT + 1] {
            let config = PipelineConfig {
                max_batch_size: size,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "size {size} should be rejected");
        }
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let config: PipelineConfig =
            serde_yaml::from_str("max_batch_size: 2\nretry:\n  max_attempts: 3\n").unwrap();
        assert_eq!(config.max_batch_size, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 100);
        assert_eq!(config.concurrency, 10);
    }
}
