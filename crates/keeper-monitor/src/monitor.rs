//! # Upkeep Monitor
//!
//! Process-scoped facade wiring the cache, tracker, detector and suppressor.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   UpkeepMonitor                      │
//! │                                                      │
//! │  TransactionEvent ──▶ AnomalyDetector ──▶ Suppressor │──▶ findings
//! │                         │        │                   │
//! │                    StateCache  CallTracker           │
//! │                         │                            │
//! └─────────────────────────┼────────────────────────────┘
//!                           ▼
//!                      StateSource
//! ```
//!
//! Construct one instance at startup, call [`UpkeepMonitor::initialize`]
//! once, then feed transactions in chain order.
//!
//! ## Example
//!
//! ```rust,ignore
//! let monitor = UpkeepMonitor::new(config, source)?;
//! monitor.initialize().await?;
//!
//! for tx in transactions {
//!     for finding in monitor.handle_transaction(&tx).await? {
//!         publish(finding);
//!     }
//! }
//! ```

use crate::cache::{CacheStats, StateCache};
use crate::config::MonitorConfig;
use crate::detector::AnomalyDetector;
use crate::error::Result;
use crate::event::TransactionEvent;
use crate::finding::Finding;
use crate::source::StateSource;
use crate::suppressor::AlertSuppressor;
use crate::tracker::{CallTracker, LastCall};
use alloy_primitives::Address;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Snapshot of monitor state, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStatus {
    /// Transactions processed successfully
    pub transactions: u64,
    /// Findings returned to the host
    pub findings_emitted: u64,
    /// Findings dropped by the suppressor
    pub findings_suppressed: u64,
    /// Pairs in the call tracker
    pub tracked_pairs: usize,
    /// Keys in the suppressor
    pub suppression_keys: usize,
    /// Clock seed, if bootstrapped
    pub clock_seed: Option<u64>,
    /// Timestamp of the last processed transaction
    pub last_timestamp: Option<u64>,
    /// State cache counters
    pub cache: CacheStats,
}

#[derive(Debug, Default)]
struct Counters {
    transactions: u64,
    findings_emitted: u64,
    last_timestamp: Option<u64>,
}

/// Call-cadence monitor for a set of upkeeps.
///
/// # Thread Safety
///
/// `UpkeepMonitor` is `Send + Sync`. Transactions are expected one at a
/// time in chain order; the locks only keep the maps consistent if a host
/// overlaps deliveries, and are never held across an upstream read.
#[derive(Debug)]
pub struct UpkeepMonitor {
    config: MonitorConfig,
    cache: StateCache,
    detector: AnomalyDetector,
    tracker: Mutex<CallTracker>,
    suppressor: Mutex<AlertSuppressor>,
    counters: Mutex<Counters>,
}

impl UpkeepMonitor {
    /// Creates a monitor reading chain state from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`](crate::MonitorError::Config) if the
    /// configuration does not validate.
    pub fn new(config: MonitorConfig, source: Arc<dyn StateSource>) -> Result<Self> {
        config.validate()?;

        info!(
            upkeeps = ?config.upkeep_ids,
            registry = %config.registry,
            short = config.short_period,
            medium = config.medium_period,
            huge = config.huge_period,
            "upkeep monitor configured"
        );

        Ok(Self {
            cache: StateCache::new(source, config.cache_capacity).with_max_strategies(config.max_strategies),
            detector: AnomalyDetector::new(&config),
            tracker: Mutex::new(CallTracker::new()),
            suppressor: Mutex::new(AlertSuppressor::new(config.short_period, config.medium_period)),
            counters: Mutex::new(Counters::default()),
            config,
        })
    }

    /// Seeds the tracker clock from the current head block.
    ///
    /// Without a seed, a never-called strategy reports its silence measured
    /// from the epoch. Returns the head timestamp read.
    ///
    /// # Errors
    ///
    /// Returns the upstream failure if the head cannot be read.
    pub async fn initialize(&self) -> Result<u64> {
        let timestamp = self.cache.source().head_timestamp().await?;
        self.seed_clock(timestamp);
        Ok(timestamp)
    }

    /// Seeds the tracker clock with an explicit timestamp.
    ///
    /// Returns `false` if executions were already recorded.
    pub fn seed_clock(&self, timestamp: u64) -> bool {
        let applied = self.tracker.lock().set_clock_seed(timestamp);
        if applied {
            info!(timestamp, "tracker clock seeded");
        } else {
            debug!(timestamp, "clock seed ignored, executions already recorded");
        }
        applied
    }

    /// Processes one transaction and returns the findings to publish.
    ///
    /// All upstream reads complete before any state changes, so an error
    /// leaves the tracker and suppressor exactly as they were.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Source`](crate::MonitorError::Source) when an
    /// upstream read fails.
    pub async fn handle_transaction(&self, tx: &TransactionEvent) -> Result<Vec<Finding>> {
        let snapshot = self.detector.gather(&self.cache, tx).await?;

        let candidates = {
            let mut tracker = self.tracker.lock();
            self.detector.apply(&mut tracker, tx, &snapshot)
        };
        let candidate_count = candidates.len();

        let findings = self.suppressor.lock().filter(candidates, tx.timestamp);

        let mut counters = self.counters.lock();
        counters.transactions += 1;
        counters.findings_emitted += findings.len() as u64;
        counters.last_timestamp = Some(tx.timestamp);

        if candidate_count > 0 {
            debug!(
                tx = %tx.hash,
                block = tx.block_number,
                candidates = candidate_count,
                emitted = findings.len(),
                "transaction processed"
            );
        }

        Ok(findings)
    }

    /// Last execution time of a pair.
    #[must_use]
    pub fn last_call_time(&self, keeper: Address, strategy: Address) -> LastCall {
        self.tracker.lock().last_call_time(keeper, strategy)
    }

    /// Executions seen for a pair.
    #[must_use]
    pub fn call_count(&self, keeper: Address, strategy: Address) -> u64 {
        self.tracker.lock().count(keeper, strategy)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Returns the state cache.
    #[must_use]
    pub const fn cache(&self) -> &StateCache {
        &self.cache
    }

    /// Returns a status report of the monitor state.
    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        let (tracked_pairs, clock_seed) = {
            let tracker = self.tracker.lock();
            (tracker.len(), tracker.clock_seed())
        };
        let (suppression_keys, findings_suppressed) = {
            let suppressor = self.suppressor.lock();
            (suppressor.len(), suppressor.suppressed_count())
        };
        let counters = self.counters.lock();

        MonitorStatus {
            transactions: counters.transactions,
            findings_emitted: counters.findings_emitted,
            findings_suppressed,
            tracked_pairs,
            suppression_keys,
            clock_seed,
            last_timestamp: counters.last_timestamp,
            cache: self.cache.stats(),
        }
    }
}
