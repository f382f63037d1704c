//! # Alert Suppressor
//!
//! Rate-limits candidate findings per `(keeper, strategy, threshold)` key.
//!
//! ## State Machine
//!
//! ```text
//!   never alerted ──allow──▶ alerted at t
//!   alerted at T  ──(now - T > gap) allow──▶ alerted at now
//!   alerted at T  ──(now - T <= gap) drop──▶ alerted at T
//! ```
//!
//! ## Gap Selection
//!
//! | Finding threshold | Required gap |
//! |-------------------|--------------|
//! | short period | short period |
//! | medium period | short period |
//! | anything else (huge) | medium period |
//!
//! Frequency alerts may therefore repeat daily while silence alerts repeat
//! at most weekly, even though the silence window itself is monthly.
//!
//! Records are never deleted. Growth is bounded by the number of distinct
//! pairs times three thresholds.

use crate::finding::Finding;
use alloy_primitives::Address;
use std::collections::HashMap;
use tracing::debug;

/// Suppression identity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuppressionKey {
    /// Keeper contract
    pub keeper: Address,
    /// Strategy
    pub strategy: Address,
    /// Threshold label, seconds
    pub threshold: u64,
}

impl From<&Finding> for SuppressionKey {
    fn from(finding: &Finding) -> Self {
        Self {
            keeper: finding.keeper,
            strategy: finding.strategy,
            threshold: finding.threshold,
        }
    }
}

/// Drops findings that repeat a recent alert for the same key.
///
/// # Example
///
/// ```rust
/// use keeper_monitor::{AlertSuppressor, Finding};
/// use alloy_primitives::Address;
///
/// let mut suppressor = AlertSuppressor::new(86_400, 604_800);
/// let finding = Finding::high_frequency(1, Address::ZERO, Address::ZERO, 10, 2, 86_400);
///
/// assert!(suppressor.admit(&finding, 1_000));
/// assert!(!suppressor.admit(&finding, 1_000 + 86_400));
/// assert!(suppressor.admit(&finding, 1_000 + 86_401));
/// ```
#[derive(Debug, Clone)]
pub struct AlertSuppressor {
    short_period: u64,
    medium_period: u64,
    last_alert: HashMap<SuppressionKey, u64>,
    suppressed: u64,
}

impl AlertSuppressor {
    /// Creates a suppressor for the given short and medium periods.
    #[must_use]
    pub fn new(short_period: u64, medium_period: u64) -> Self {
        Self {
            short_period,
            medium_period,
            last_alert: HashMap::new(),
            suppressed: 0,
        }
    }

    /// Gap that must be exceeded before a finding with `threshold` repeats.
    #[must_use]
    pub const fn required_gap(&self, threshold: u64) -> u64 {
        if threshold == self.short_period || threshold == self.medium_period {
            self.short_period
        } else {
            self.medium_period
        }
    }

    /// Decides whether `finding` goes out at time `now`, recording it if so.
    ///
    /// A gap exactly equal to the required gap does not qualify. A `now`
    /// earlier than the recorded alert never qualifies.
    pub fn admit(&mut self, finding: &Finding, now: u64) -> bool {
        let key = SuppressionKey::from(finding);

        let allowed = match self.last_alert.get(&key) {
            None => true,
            Some(&last) => now
                .checked_sub(last)
                .is_some_and(|gap| gap > self.required_gap(key.threshold)),
        };

        if allowed {
            self.last_alert.insert(key, now);
        } else {
            self.suppressed += 1;
            debug!(
                alert_id = %finding.alert_id,
                keeper = %finding.keeper,
                strategy = %finding.strategy,
                threshold = finding.threshold,
                "finding suppressed"
            );
        }
        allowed
    }

    /// Filters `findings` in order, keeping those admitted at `now`.
    pub fn filter(&mut self, findings: Vec<Finding>, now: u64) -> Vec<Finding> {
        findings
            .into_iter()
            .filter(|finding| self.admit(finding, now))
            .collect()
    }

    /// Time of the last admitted alert for `key`.
    #[must_use]
    pub fn last_alert(&self, key: &SuppressionKey) -> Option<u64> {
        self.last_alert.get(key).copied()
    }

    /// Number of keys ever alerted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_alert.len()
    }

    /// Returns true if nothing was ever admitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_alert.is_empty()
    }

    /// Findings dropped so far.
    #[must_use]
    pub const fn suppressed_count(&self) -> u64 {
        self.suppressed
    }
}
