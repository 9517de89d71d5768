//! Dispatcher configuration.

use std::time::Duration;

/// Configuration for [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Tick period of the dispatch loop.
    pub pull_interval: Duration,

    /// Reference block lag: batches snapshot the operator set at
    /// `current_block - finalization_block_delay`.
    pub finalization_block_delay: u64,

    /// Per-attempt deadline for one operator `StoreChunks` call.
    pub attestation_timeout: Duration,

    /// Overall signature-collection deadline for one batch. Must be at
    /// least `attestation_timeout`.
    pub batch_attestation_timeout: Duration,

    /// Poll granularity for heartbeats during signature collection.
    pub signature_tick_interval: Duration,

    /// Retry budget per operator and per storage write.
    pub num_request_retries: u32,

    /// Upper bound on certificates per batch.
    pub max_batch_size: u32,

    /// Bound on concurrently outstanding `StoreChunks` calls.
    pub num_concurrent_requests: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pull_interval: Duration::from_secs(1),
            finalization_block_delay: 10,
            attestation_timeout: Duration::from_secs(1),
            batch_attestation_timeout: Duration::from_secs(2),
            signature_tick_interval: Duration::from_millis(100),
            num_request_retries: 3,
            max_batch_size: 128,
            num_concurrent_requests: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_batch_size` must be positive.
    #[error("max_batch_size must be greater than zero")]
    ZeroBatchSize,

    /// `pull_interval` must be positive.
    #[error("pull_interval must be greater than zero")]
    ZeroPullInterval,

    /// The overall deadline must cover at least one attempt.
    #[error("batch_attestation_timeout must be >= attestation_timeout")]
    DeadlineTooShort,

    /// The fan-out pool needs at least one worker.
    #[error("num_concurrent_requests must be greater than zero")]
    ZeroConcurrency,
}

impl DispatcherConfig {
    /// Validate invariants between fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.pull_interval.is_zero() {
            return Err(ConfigError::ZeroPullInterval);
        }
        if self.batch_attestation_timeout < self.attestation_timeout {
            return Err(ConfigError::DeadlineTooShort);
        }
        if self.num_concurrent_requests == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(DispatcherConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_validation_catches_bad_configs() {
        let mut config = DispatcherConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroBatchSize));

        config.max_batch_size = 1;
        config.batch_attestation_timeout = Duration::from_millis(10);
        assert_eq!(config.validate(), Err(ConfigError::DeadlineTooShort));
    }
}
