//! Controller configuration.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    energy::PollStrategy,
    error::Error,
    flow::{DEFAULT_BASE_PRIORITY, DEFAULT_PRIORITY_STEP},
};

/// Settings of a controller. Every field has a default, so a TOML file only needs to list what it
/// changes.
///
/// ```toml
/// poll_interval_secs = 60
/// poll_strategy = "forecast_normalized"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Period of the energy poll, in seconds.
    pub poll_interval_secs: u64,
    /// Period of the rebalance pass, in seconds.
    pub rebalance_interval_secs: u64,
    /// How energy readings are compared against the budget.
    pub poll_strategy: PollStrategy,
    /// Idle timeout of installed flow rules, in seconds.
    pub idle_timeout_secs: u16,
    /// Priority of flow rules for non-IP traffic.
    pub base_priority: u16,
    /// Priority added for IPv4, and once more for TCP and UDP.
    pub priority_step: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            rebalance_interval_secs: 180,
            poll_strategy: PollStrategy::default(),
            idle_timeout_secs: 60,
            base_priority: DEFAULT_BASE_PRIORITY,
            priority_step: DEFAULT_PRIORITY_STEP,
        }
    }
}

impl ControllerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Check that the periods are non-zero and all priorities fit.
    pub fn validate(&self) -> Result<(), Error> {
        if self.poll_interval_secs == 0 || self.rebalance_interval_secs == 0 {
            return Err(Error::Config("intervals must be positive".to_string()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(Error::Config("idle timeout must be positive".to_string()));
        }
        self.priority_step
            .checked_mul(2)
            .and_then(|x| x.checked_add(self.base_priority))
            .ok_or_else(|| Error::Config("flow priorities exceed 65535".to_string()))?;
        Ok(())
    }

    /// Period of the energy poll
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Period of the rebalance pass
    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }

    /// Set the period of the energy poll.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = interval.as_secs();
        self
    }

    /// Set the period of the rebalance pass.
    pub fn with_rebalance_interval(mut self, interval: Duration) -> Self {
        self.rebalance_interval_secs = interval.as_secs();
        self
    }

    /// Set the poll strategy.
    pub fn with_poll_strategy(mut self, strategy: PollStrategy) -> Self {
        self.poll_strategy = strategy;
        self
    }

    /// Set the idle timeout of flow rules, in seconds.
    pub fn with_idle_timeout(mut self, secs: u16) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    /// Set the priority scheme of flow rules.
    pub fn with_priorities(mut self, base: u16, step: u16) -> Self {
        self.base_priority = base;
        self.priority_step = step;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let c = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(c, ControllerConfig::default());
        assert_eq!(c.poll_interval(), Duration::from_secs(10));
        assert_eq!(c.rebalance_interval(), Duration::from_secs(180));
        assert_eq!(c.poll_strategy, PollStrategy::PerFlowRead);
    }

    #[test]
    fn partial_file() {
        let c = ControllerConfig::from_toml_str(
            r#"
            poll_interval_secs = 60
            poll_strategy = "forecast_normalized"
            "#,
        )
        .unwrap();
        assert_eq!(c.poll_interval_secs, 60);
        assert_eq!(c.poll_strategy, PollStrategy::ForecastNormalized);
        assert_eq!(c.idle_timeout_secs, 60);
    }

    #[test]
    fn invalid() {
        assert!(matches!(
            ControllerConfig::from_toml_str("rebalance_interval_secs = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ControllerConfig::from_toml_str("base_priority = 65000"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ControllerConfig::from_toml_str("unknown = 1"),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn builder() {
        let c = ControllerConfig::default()
            .with_poll_interval(Duration::from_secs(60))
            .with_rebalance_interval(Duration::from_secs(300))
            .with_idle_timeout(30)
            .with_priorities(100, 10);
        assert!(c.validate().is_ok());
        assert_eq!(c.rebalance_interval_secs, 300);
        assert_eq!(c.base_priority, 100);
    }
}
