//! # Call-History Tracker
//!
//! In-memory table of `(keeper, strategy)` pairs to the time of the last
//! observed execution and the number of executions seen.
//!
//! ## Invariants
//!
//! - `last_call` never moves backwards for a key. A timestamp older than
//!   the stored one is reported as [`Elapsed::Regressed`] and not stored.
//! - `call_count` grows by exactly one per recorded execution.
//! - Registration never resets an existing record.
//! - Deregistration keeps the counters; it only takes the pair out of the
//!   silence check until the strategy is registered again.

use alloy_primitives::Address;
use std::collections::HashMap;
use tracing::debug;

/// Identity of a tracked pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallKey {
    /// Keeper (upkeep target) contract
    pub keeper: Address,
    /// Strategy driven by the keeper
    pub strategy: Address,
}

impl CallKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(keeper: Address, strategy: Address) -> Self {
        Self { keeper, strategy }
    }
}

/// Last execution time of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastCall {
    /// No execution observed since the process started.
    Never,
    /// Block timestamp of the last execution.
    At(u64),
}

impl LastCall {
    /// Returns the timestamp, if any.
    #[must_use]
    pub const fn timestamp(self) -> Option<u64> {
        match self {
            Self::Never => None,
            Self::At(ts) => Some(ts),
        }
    }
}

/// Time between an execution and the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elapsed {
    /// First execution seen for the pair.
    Unbounded,
    /// Seconds since the previous execution.
    Seconds(u64),
    /// The execution is older than the stored one by this many seconds.
    Regressed {
        /// Seconds the new timestamp lags behind the stored one
        by: u64,
    },
}

impl Elapsed {
    /// Returns true if the gap is known and no larger than `period`.
    #[must_use]
    pub const fn within(self, period: u64) -> bool {
        match self {
            Self::Seconds(secs) => secs <= period,
            Self::Unbounded | Self::Regressed { .. } => false,
        }
    }
}

/// History kept per pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Last execution
    pub last_call: LastCall,
    /// Executions observed
    pub call_count: u64,
    /// When the strategy was last removed from its keeper, if it still is
    pub deregistered_at: Option<u64>,
}

impl CallRecord {
    const fn fresh() -> Self {
        Self {
            last_call: LastCall::Never,
            call_count: 0,
            deregistered_at: None,
        }
    }

    /// Returns true unless the strategy was removed and not re-added.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.deregistered_at.is_none()
    }
}

/// Tracks execution cadence per `(keeper, strategy)` pair.
///
/// # Thread Safety
///
/// `CallTracker` is not thread-safe; the monitor keeps it behind a mutex.
#[derive(Debug, Default)]
pub struct CallTracker {
    records: HashMap<CallKey, CallRecord>,
    /// Head timestamp at process start.
    clock_seed: Option<u64>,
    /// Latest execution timestamp recorded across all pairs.
    latest_execution: Option<u64>,
}

impl CallTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last execution time of the pair, [`LastCall::Never`] if unseen.
    #[must_use]
    pub fn last_call_time(&self, keeper: Address, strategy: Address) -> LastCall {
        self.records
            .get(&CallKey::new(keeper, strategy))
            .map_or(LastCall::Never, |r| r.last_call)
    }

    /// Executions seen for the pair, 0 if unseen.
    #[must_use]
    pub fn count(&self, keeper: Address, strategy: Address) -> u64 {
        self.records
            .get(&CallKey::new(keeper, strategy))
            .map_or(0, |r| r.call_count)
    }

    /// Returns the record for a pair, if one exists.
    #[must_use]
    pub fn record(&self, keeper: Address, strategy: Address) -> Option<&CallRecord> {
        self.records.get(&CallKey::new(keeper, strategy))
    }

    /// Returns true if the pair was removed from its keeper and not re-added.
    #[must_use]
    pub fn is_deregistered(&self, keeper: Address, strategy: Address) -> bool {
        self.record(keeper, strategy)
            .is_some_and(|r| !r.is_active())
    }

    /// Records an execution and returns the gap to the previous one.
    ///
    /// The count is always incremented. The stored timestamp only moves
    /// forward; a regression is reported, not applied.
    ///
    /// # Example
    ///
    /// ```rust
    /// use keeper_monitor::{CallTracker, Elapsed};
    /// use alloy_primitives::Address;
    ///
    /// let (keeper, strategy) = (Address::repeat_byte(1), Address::repeat_byte(2));
    /// let mut tracker = CallTracker::new();
    ///
    /// assert_eq!(tracker.record_execution(keeper, strategy, 100), Elapsed::Unbounded);
    /// assert_eq!(tracker.record_execution(keeper, strategy, 250), Elapsed::Seconds(150));
    /// assert_eq!(tracker.count(keeper, strategy), 2);
    /// ```
    pub fn record_execution(&mut self, keeper: Address, strategy: Address, timestamp: u64) -> Elapsed {
        let record = self
            .records
            .entry(CallKey::new(keeper, strategy))
            .or_insert_with(CallRecord::fresh);
        record.call_count += 1;

        let elapsed = match record.last_call {
            LastCall::Never => {
                record.last_call = LastCall::At(timestamp);
                Elapsed::Unbounded
            }
            LastCall::At(last) if timestamp >= last => {
                record.last_call = LastCall::At(timestamp);
                Elapsed::Seconds(timestamp - last)
            }
            LastCall::At(last) => Elapsed::Regressed {
                by: last - timestamp,
            },
        };

        self.latest_execution = Some(self.latest_execution.map_or(timestamp, |t| t.max(timestamp)));
        elapsed
    }

    /// Marks a strategy as added to its keeper.
    ///
    /// Creates a never-called record if none exists; an existing record keeps
    /// its history and becomes active again.
    pub fn register_strategy(&mut self, keeper: Address, strategy: Address, timestamp: u64) {
        let record = self
            .records
            .entry(CallKey::new(keeper, strategy))
            .or_insert_with(CallRecord::fresh);
        record.deregistered_at = None;
        debug!(%keeper, %strategy, timestamp, "strategy registered");
    }

    /// Marks a strategy as removed from its keeper.
    ///
    /// Counters are kept. The pair stops taking part in the silence check
    /// until registered again.
    pub fn deregister_strategy(&mut self, keeper: Address, strategy: Address, timestamp: u64) {
        let record = self
            .records
            .entry(CallKey::new(keeper, strategy))
            .or_insert_with(CallRecord::fresh);
        record.deregistered_at = Some(timestamp);
        debug!(%keeper, %strategy, timestamp, "strategy deregistered");
    }

    /// Seeds the reference clock used for never-called pairs.
    ///
    /// Returns `false` (and changes nothing) once any execution has been
    /// recorded, since real history then supersedes the seed.
    pub fn set_clock_seed(&mut self, timestamp: u64) -> bool {
        if self.latest_execution.is_some() {
            return false;
        }
        self.clock_seed = Some(timestamp);
        true
    }

    /// Returns the clock seed, if one was set.
    #[must_use]
    pub const fn clock_seed(&self) -> Option<u64> {
        self.clock_seed
    }

    /// Seconds a never-called pair has been silent as of `now`.
    ///
    /// Measured from the clock seed, or from the epoch without one.
    #[must_use]
    pub fn silence_since_start(&self, now: u64) -> u64 {
        now.saturating_sub(self.clock_seed.unwrap_or(0))
    }

    /// Number of tracked pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no pair is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
