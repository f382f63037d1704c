//! Configuration for the keeper monitor.
//!
//! All periods are in seconds of block time. The three periods double as
//! threshold classes: they decide when a finding fires and, through the
//! suppressor, how often a finding for the same key may repeat.

use crate::error::{MonitorError, Result};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One day.
pub const ONE_DAY: u64 = 86_400;
/// One week.
pub const ONE_WEEK: u64 = 7 * ONE_DAY;
/// Thirty days.
pub const ONE_MONTH: u64 = 30 * ONE_DAY;
/// Default bound on a keeper's strategy array length.
pub const DEFAULT_MAX_STRATEGIES: u64 = 256;

/// Configuration for [`UpkeepMonitor`](crate::UpkeepMonitor).
///
/// # Example
///
/// ```rust
/// use keeper_monitor::MonitorConfig;
/// use alloy_primitives::address;
///
/// let config = MonitorConfig::new()
///     .with_registry(address!("7b3ec232b08bd7b4b3305be0c044d907b2df960b"))
///     .with_upkeep_ids(vec![12, 13])
///     .with_periods(3_600, 86_400, 604_800);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Registry contract emitting the execution logs.
    pub registry: Address,

    /// Upkeep ids whose keepers are watched.
    pub upkeep_ids: Vec<u64>,

    /// Calls closer together than this are "high frequency".
    pub short_period: u64,

    /// Calls closer together than this are "medium frequency".
    pub medium_period: u64,

    /// Silence longer than this raises a "not called" finding.
    pub huge_period: u64,

    /// Live entries kept by the state cache.
    pub cache_capacity: usize,

    /// Largest strategy array length accepted from a keeper.
    pub max_strategies: u64,
}

impl MonitorConfig {
    /// Creates a config with default periods and an empty watch list.
    ///
    /// Defaults:
    /// - Short period: 1 day
    /// - Medium period: 1 week
    /// - Huge period: 30 days
    /// - Cache capacity: 10,000 entries
    /// - Strategy limit: 256 per keeper
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registry: Address::ZERO,
            upkeep_ids: Vec::new(),
            short_period: ONE_DAY,
            medium_period: ONE_WEEK,
            huge_period: ONE_MONTH,
            cache_capacity: 10_000,
            max_strategies: DEFAULT_MAX_STRATEGIES,
        }
    }

    /// Sets the registry address.
    #[must_use]
    pub const fn with_registry(mut self, registry: Address) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the watched upkeep ids.
    #[must_use]
    pub fn with_upkeep_ids(mut self, ids: Vec<u64>) -> Self {
        self.upkeep_ids = ids;
        self
    }

    /// Sets the short, medium and huge periods.
    #[must_use]
    pub const fn with_periods(mut self, short: u64, medium: u64, huge: u64) -> Self {
        self.short_period = short;
        self.medium_period = medium;
        self.huge_period = huge;
        self
    }

    /// Sets the state cache capacity.
    #[must_use]
    pub const fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the largest strategy array length read from a keeper.
    #[must_use]
    pub const fn with_max_strategies(mut self, limit: u64) -> Self {
        self.max_strategies = limit;
        self
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`] when the periods are not strictly
    /// increasing, no upkeep is watched, the registry is unset, or the cache
    /// capacity or strategy limit is zero.
    pub fn validate(&self) -> Result<()> {
        if !(self.short_period < self.medium_period && self.medium_period < self.huge_period) {
            return Err(MonitorError::Config(format!(
                "periods must satisfy short < medium < huge, got {} / {} / {}",
                self.short_period, self.medium_period, self.huge_period
            )));
        }
        if self.upkeep_ids.is_empty() {
            return Err(MonitorError::Config("no upkeep ids configured".to_string()));
        }
        if self.registry == Address::ZERO {
            return Err(MonitorError::Config("registry address is unset".to_string()));
        }
        if self.cache_capacity == 0 {
            return Err(MonitorError::Config("cache capacity must be at least 1".to_string()));
        }
        if self.max_strategies == 0 {
            return Err(MonitorError::Config("strategy limit must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Loads and validates a JSON config file.
    ///
    /// Missing fields fall back to the defaults of [`MonitorConfig::new`].
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`] if the file cannot be read, does not
    /// parse, or fails [`validate`](Self::validate).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MonitorError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| MonitorError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use std::io::Write;

    fn valid() -> MonitorConfig {
        MonitorConfig::new()
            .with_registry(address!("7b3ec232b08bd7b4b3305be0c044d907b2df960b"))
            .with_upkeep_ids(vec![7])
    }

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.short_period, 86_400);
        assert_eq!(config.medium_period, 604_800);
        assert_eq!(config.huge_period, 2_592_000);
        assert_eq!(config.cache_capacity, 10_000);
        assert_eq!(config.max_strategies, DEFAULT_MAX_STRATEGIES);
    }

    #[test]
    fn test_validate_accepts_ordered_periods() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unordered_periods() {
        let config = valid().with_periods(100, 100, 1_000);
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));

        let config = valid().with_periods(500, 100, 1_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_watch_list() {
        let config = valid().with_upkeep_ids(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = valid().with_cache_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_strategy_limit() {
        let config = valid().with_max_strategies(0);
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
        assert!(valid().with_max_strategies(1).validate().is_ok());
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"registry": "0x7b3ec232b08bd7b4b3305be0c044d907b2df960b", "upkeep_ids": [3, 4]}}"#
        )
        .unwrap();

        let config = MonitorConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.upkeep_ids, vec![3, 4]);
        assert_eq!(config.huge_period, ONE_MONTH);
    }

    #[test]
    fn test_from_json_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"upkeep_ids": []}}"#).unwrap();
        assert!(MonitorConfig::from_json_file(file.path()).is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = valid();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: MonitorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
