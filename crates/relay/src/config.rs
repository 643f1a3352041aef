//! Engine configuration

use crate::retry::BackoffConfig;
use std::env;
use std::time::Duration;

/// Tuning knobs for the relay engine. Defaults suit a 1 Hz tick cadence on a
/// battery-constrained device.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the outbound and confirmation queues
    pub max_queue_size: usize,
    /// Frames handed to the transport per tick
    pub max_frames_per_tick: usize,
    /// Inbound frames drained from the transport per tick
    pub max_inbound_per_tick: usize,
    /// Incomplete reassembly state older than this is expired
    pub reassembly_max_age: Duration,
    /// A sent transaction with no confirmation after this long is retried
    pub confirmation_timeout: Duration,
    /// Retry backoff parameters
    pub retry: BackoffConfig,
    /// Retry items older than this are abandoned
    pub retry_max_age: Duration,
    /// Minimum interval between debounced queue saves
    pub autosave_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_frames_per_tick: 16,
            max_inbound_per_tick: 64,
            reassembly_max_age: Duration::from_secs(300),
            confirmation_timeout: Duration::from_secs(120),
            retry: BackoffConfig::default(),
            retry_max_age: Duration::from_secs(3600),
            autosave_interval: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(EngineConfig {
            max_queue_size: env::var("RELAY_MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            max_frames_per_tick: env::var("RELAY_MAX_FRAMES_PER_TICK")
                .unwrap_or_else(|_| "16".to_string())
                .parse()?,
            max_inbound_per_tick: env::var("RELAY_MAX_INBOUND_PER_TICK")
                .unwrap_or_else(|_| "64".to_string())
                .parse()?,
            reassembly_max_age: Duration::from_secs(
                env::var("RELAY_REASSEMBLY_MAX_AGE_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()?,
            ),
            confirmation_timeout: Duration::from_secs(
                env::var("RELAY_CONFIRMATION_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()?,
            ),
            retry: BackoffConfig {
                max_attempts: env::var("RELAY_RETRY_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                initial_delay: Duration::from_millis(
                    env::var("RELAY_RETRY_INITIAL_DELAY_MS")
                        .unwrap_or_else(|_| "2000".to_string())
                        .parse()?,
                ),
                max_delay: Duration::from_millis(
                    env::var("RELAY_RETRY_MAX_DELAY_MS")
                        .unwrap_or_else(|_| "60000".to_string())
                        .parse()?,
                ),
                backoff_multiplier: env::var("RELAY_RETRY_BACKOFF_MULTIPLIER")
                    .unwrap_or_else(|_| "2.0".to_string())
                    .parse()?,
            },
            retry_max_age: Duration::from_secs(
                env::var("RELAY_RETRY_MAX_AGE_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()?,
            ),
            autosave_interval: Duration::from_secs(
                env::var("RELAY_AUTOSAVE_INTERVAL_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.max_frames_per_tick, 16);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.confirmation_timeout, Duration::from_secs(120));
    }
}
