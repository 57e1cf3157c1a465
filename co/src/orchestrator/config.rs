//! Orchestrator lane configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for the per-work orchestrator lane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Backoff before retrying after a transient store failure
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { retry_delay_ms: 1_000 }
    }
}

impl OrchestratorConfig {
    /// Retry backoff as a Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(OrchestratorConfig::default().retry_delay(), Duration::from_secs(1));
    }
}
