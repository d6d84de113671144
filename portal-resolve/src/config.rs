//! Engine configuration.

use portal_core::{ConfigError, PolicyConfig, DEFAULT_BACKGROUND_BUDGET_MS, DEFAULT_BUDGET_MS};
use portal_storage::CacheConfig;
use std::time::Duration;

use crate::background::BackgroundConfig;
use crate::coalescing::CoalescingConfig;

/// Everything a [`crate::ResolutionOrchestrator`] needs to be built.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub coalescing: CoalescingConfig,
    pub background: BackgroundConfig,
    pub policy: PolicyConfig,
    /// Budget applied by [`crate::ResolutionOrchestrator::resolve`] (default: 200ms)
    pub default_budget: Duration,
    /// Budget for refreshes triggered by degraded hits (default: 5s)
    pub background_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            coalescing: CoalescingConfig::default(),
            background: BackgroundConfig::default(),
            policy: PolicyConfig::default(),
            default_budget: Duration::from_millis(DEFAULT_BUDGET_MS),
            background_budget: Duration::from_millis(DEFAULT_BACKGROUND_BUDGET_MS),
        }
    }
}

impl EngineConfig {
    /// Create EngineConfig from environment variables.
    ///
    /// Reads every section's own variables plus:
    /// - `PORTAL_DEFAULT_BUDGET_MS`: Foreground budget (default: 200)
    /// - `PORTAL_BACKGROUND_BUDGET_MS`: Background refresh budget (default: 5000)
    pub fn from_env() -> Self {
        let default_budget = Duration::from_millis(
            std::env::var("PORTAL_DEFAULT_BUDGET_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BUDGET_MS),
        );

        let background_budget = Duration::from_millis(
            std::env::var("PORTAL_BACKGROUND_BUDGET_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BACKGROUND_BUDGET_MS),
        );

        Self {
            cache: CacheConfig::from_env(),
            coalescing: CoalescingConfig::from_env(),
            background: BackgroundConfig::from_env(),
            policy: PolicyConfig::from_env(),
            default_budget,
            background_budget,
        }
    }

    /// Short TTLs and budgets for tests and local development.
    pub fn development() -> Self {
        Self {
            cache: CacheConfig::default()
                .with_edge_ttl(Duration::from_secs(5), Duration::from_secs(10))
                .with_core_ttl(Duration::from_secs(60))
                .with_swr_window(Duration::from_secs(10))
                .with_mirror_capacity(1_000),
            coalescing: CoalescingConfig::default()
                .with_grace(Duration::from_millis(50))
                .with_max_age(Duration::from_secs(5))
                .with_sweep_interval(Duration::from_secs(1)),
            background: BackgroundConfig::default().with_max_concurrent(8),
            policy: PolicyConfig::default(),
            default_budget: Duration::from_millis(DEFAULT_BUDGET_MS),
            background_budget: Duration::from_secs(1),
        }
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_coalescing(mut self, coalescing: CoalescingConfig) -> Self {
        self.coalescing = coalescing;
        self
    }

    pub fn with_background(mut self, background: BackgroundConfig) -> Self {
        self.background = background;
        self
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_budget(mut self, budget: Duration) -> Self {
        self.default_budget = budget;
        self
    }

    pub fn with_background_budget(mut self, budget: Duration) -> Self {
        self.background_budget = budget;
        self
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.coalescing.validate()?;
        self.background.validate()?;
        self.policy.validate()?;

        if self.default_budget.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "default_budget".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.background_budget.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "background_budget".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_and_development_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::development().validate().is_ok());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let config = EngineConfig::default().with_default_budget(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "default_budget"
        ));
    }

    #[test]
    fn test_section_errors_propagate() {
        let config = EngineConfig::default().with_coalescing(
            CoalescingConfig::default().with_grace(Duration::from_secs(120)),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompatibleOptions { .. })
        ));
    }
}
