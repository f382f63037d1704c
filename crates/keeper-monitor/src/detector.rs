//! # Anomaly Detector
//!
//! Turns one transaction into candidate findings.
//!
//! ## Phases
//!
//! Processing is split so that a failed upstream read leaves no trace:
//!
//! 1. **Gather** (async, no mutation). Resolve every watched upkeep to its
//!    keeper and strategy list, decode management calls and execution logs,
//!    and resolve the keeper of every matching log. Independent reads are
//!    issued concurrently and joined in index order.
//! 2. **Apply** (sync, under the tracker lock), in this order:
//!    1. silence check against the tracker state *before* this transaction;
//!    2. management calls, in call order;
//!    3. executions, in log order.
//!
//! A strategy removed in this transaction can therefore still raise a
//! silence finding in this transaction, but not in later ones.

use crate::abi::{decode_management_call, decode_upkeep_performed, ManagementKind, ManagementOp};
use crate::cache::StateCache;
use crate::config::MonitorConfig;
use crate::error::{Result, SourceError};
use crate::event::TransactionEvent;
use crate::finding::{Finding, Silence};
use crate::tracker::{CallTracker, Elapsed, LastCall};
use alloy_primitives::{Address, U256};
use futures::future::try_join_all;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// A watched upkeep as of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperState {
    /// Configured upkeep id
    pub upkeep_id: u64,
    /// Keeper the id resolves to
    pub keeper: Address,
    /// Strategies in array order
    pub strategies: Vec<Address>,
}

/// An execution log that matched a watched upkeep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    /// Configured upkeep id
    pub upkeep_id: u64,
    /// Keeper the id resolves to
    pub keeper: Address,
    /// Strategy decoded from the perform data
    pub strategy: Address,
}

/// Everything read from the chain for one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Watched upkeeps, in configuration order
    pub keepers: Vec<KeeperState>,
    /// Management calls addressed to a watched keeper, in call order
    pub management: Vec<ManagementOp>,
    /// Matching executions, in log order
    pub executions: Vec<Execution>,
}

/// Stateless rules; all state lives in the tracker passed to [`apply`](Self::apply).
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    registry: Address,
    upkeep_ids: Vec<u64>,
    short_period: u64,
    medium_period: u64,
    huge_period: u64,
}

impl AnomalyDetector {
    /// Creates a detector from the monitor configuration.
    #[must_use]
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            registry: config.registry,
            upkeep_ids: config.upkeep_ids.clone(),
            short_period: config.short_period,
            medium_period: config.medium_period,
            huge_period: config.huge_period,
        }
    }

    /// Reads all chain state the transaction needs.
    ///
    /// # Errors
    ///
    /// Returns the first upstream failure. Decode failures are logged and
    /// the offending call or log is skipped.
    pub async fn gather(&self, cache: &StateCache, tx: &TransactionEvent) -> Result<Snapshot> {
        let block = tx.block_number;

        let keepers = try_join_all(self.upkeep_ids.iter().map(|&upkeep_id| async move {
            let keeper = cache.upkeep_target(block, upkeep_id).await?;
            let strategies = cache.strategies(block, keeper).await?;
            Ok::<_, SourceError>(KeeperState {
                upkeep_id,
                keeper,
                strategies,
            })
        }))
        .await?;

        let management = self.decode_management(&keepers, tx);

        let matched = self.decode_executions(tx);
        let executions = try_join_all(matched.into_iter().map(|(upkeep_id, strategy)| async move {
            let keeper = cache.upkeep_target(block, upkeep_id).await?;
            Ok::<_, SourceError>(Execution {
                upkeep_id,
                keeper,
                strategy,
            })
        }))
        .await?;

        Ok(Snapshot {
            keepers,
            management,
            executions,
        })
    }

    /// Applies a snapshot to the tracker and returns candidate findings.
    pub fn apply(&self, tracker: &mut CallTracker, tx: &TransactionEvent, snapshot: &Snapshot) -> Vec<Finding> {
        let now = tx.timestamp;
        let mut findings = self.check_silence(tracker, now, &snapshot.keepers);

        for op in &snapshot.management {
            match op.kind {
                ManagementKind::Register => tracker.register_strategy(op.keeper, op.strategy, now),
                ManagementKind::Deregister => tracker.deregister_strategy(op.keeper, op.strategy, now),
            }
            info!(kind = ?op.kind, keeper = %op.keeper, strategy = %op.strategy, "strategy set changed");
        }

        for execution in &snapshot.executions {
            findings.extend(self.check_execution(tracker, now, execution));
        }

        findings
    }

    fn check_silence(&self, tracker: &CallTracker, now: u64, keepers: &[KeeperState]) -> Vec<Finding> {
        let mut findings = Vec::new();

        for state in keepers {
            for &strategy in &state.strategies {
                if tracker.is_deregistered(state.keeper, strategy) {
                    debug!(keeper = %state.keeper, %strategy, "skipping deregistered strategy");
                    continue;
                }

                let silence = match tracker.last_call_time(state.keeper, strategy) {
                    LastCall::Never => Silence::Never(tracker.silence_since_start(now)),
                    LastCall::At(last) if now.saturating_sub(last) >= self.huge_period => {
                        Silence::Since(now - last)
                    }
                    LastCall::At(_) => continue,
                };

                findings.push(Finding::not_called(
                    state.upkeep_id,
                    state.keeper,
                    strategy,
                    silence,
                    self.huge_period,
                ));
            }
        }

        findings
    }

    fn check_execution(&self, tracker: &mut CallTracker, now: u64, execution: &Execution) -> Vec<Finding> {
        let Execution {
            upkeep_id,
            keeper,
            strategy,
        } = *execution;

        let elapsed = tracker.record_execution(keeper, strategy, now);
        let call_count = tracker.count(keeper, strategy);

        let secs = match elapsed {
            Elapsed::Seconds(secs) => secs,
            Elapsed::Unbounded => return Vec::new(),
            Elapsed::Regressed { by } => {
                error!(
                    %keeper,
                    %strategy,
                    timestamp = now,
                    regressed_by = by,
                    "execution timestamp older than the last recorded execution"
                );
                return Vec::new();
            }
        };

        let mut findings = Vec::new();
        if elapsed.within(self.short_period) {
            findings.push(Finding::high_frequency(
                upkeep_id,
                keeper,
                strategy,
                secs,
                call_count,
                self.short_period,
            ));
        }
        if elapsed.within(self.medium_period) {
            findings.push(Finding::medium_frequency(
                upkeep_id,
                keeper,
                strategy,
                secs,
                call_count,
                self.medium_period,
            ));
        }
        findings
    }

    fn decode_management(&self, keepers: &[KeeperState], tx: &TransactionEvent) -> Vec<ManagementOp> {
        let watched: HashSet<Address> = keepers.iter().map(|k| k.keeper).collect();

        tx.calls
            .iter()
            .filter(|call| watched.contains(&call.to))
            .filter_map(|call| match decode_management_call(call) {
                Ok(op) => op,
                Err(e) => {
                    warn!(tx = %tx.hash, keeper = %call.to, error = %e, "skipping undecodable management call");
                    None
                }
            })
            .collect()
    }

    /// Matching execution logs as `(upkeep id, strategy)`, in log order.
    fn decode_executions(&self, tx: &TransactionEvent) -> Vec<(u64, Address)> {
        tx.logs_from(self.registry)
            .filter_map(|log| match decode_upkeep_performed(log) {
                Ok(performed) => performed,
                Err(e) => {
                    warn!(tx = %tx.hash, error = %e, "skipping undecodable execution log");
                    None
                }
            })
            .filter_map(|performed| {
                self.watched_id(performed.upkeep_id)
                    .map(|upkeep_id| (upkeep_id, performed.strategy))
            })
            .collect()
    }

    fn watched_id(&self, upkeep_id: U256) -> Option<u64> {
        self.upkeep_ids
            .iter()
            .copied()
            .find(|&id| U256::from(id) == upkeep_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::FindingKind;

    const SHORT: u64 = 86_400;
    const MEDIUM: u64 = 604_800;
    const HUGE: u64 = 2_592_000;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(
            &MonitorConfig::new()
                .with_registry(Address::repeat_byte(0xee))
                .with_upkeep_ids(vec![1])
                .with_periods(SHORT, MEDIUM, HUGE),
        )
    }

    fn keeper() -> Address {
        Address::repeat_byte(0x0c)
    }

    fn strategy() -> Address {
        Address::repeat_byte(0x05)
    }

    fn snapshot(strategies: Vec<Address>, executions: usize) -> Snapshot {
        Snapshot {
            keepers: vec![KeeperState {
                upkeep_id: 1,
                keeper: keeper(),
                strategies,
            }],
            management: Vec::new(),
            executions: vec![
                Execution {
                    upkeep_id: 1,
                    keeper: keeper(),
                    strategy: strategy(),
                };
                executions
            ],
        }
    }

    fn kinds(findings: &[Finding]) -> Vec<FindingKind> {
        findings.iter().map(|f| f.kind).collect()
    }

    #[test]
    fn test_never_called_always_flagged() {
        let detector = detector();
        let mut tracker = CallTracker::new();
        let tx = TransactionEvent::new(1, 5);

        let findings = detector.apply(&mut tracker, &tx, &snapshot(vec![strategy()], 0));

        assert_eq!(kinds(&findings), vec![FindingKind::NotCalled]);
        assert_eq!(findings[0].threshold, HUGE);
        assert_eq!(findings[0].metadata["elapsedTime"], "5");
    }

    #[test]
    fn test_silence_threshold_is_inclusive() {
        let detector = detector();
        let mut tracker = CallTracker::new();
        tracker.record_execution(keeper(), strategy(), 1_000);

        let just_under = TransactionEvent::new(1, 1_000 + HUGE - 1);
        assert!(detector
            .apply(&mut tracker, &just_under, &snapshot(vec![strategy()], 0))
            .is_empty());

        let at = TransactionEvent::new(2, 1_000 + HUGE);
        let findings = detector.apply(&mut tracker, &at, &snapshot(vec![strategy()], 0));
        assert_eq!(kinds(&findings), vec![FindingKind::NotCalled]);
        assert_eq!(findings[0].metadata["neverCalled"], "false");
    }

    #[test]
    fn test_first_execution_raises_nothing() {
        let detector = detector();
        let mut tracker = CallTracker::new();
        let tx = TransactionEvent::new(1, 100);

        let findings = detector.apply(&mut tracker, &tx, &snapshot(Vec::new(), 1));
        assert!(findings.is_empty());
        assert_eq!(tracker.count(keeper(), strategy()), 1);
    }

    #[test]
    fn test_close_executions_raise_both_frequencies() {
        let detector = detector();
        let mut tracker = CallTracker::new();
        tracker.record_execution(keeper(), strategy(), 100);

        let tx = TransactionEvent::new(2, 200);
        let findings = detector.apply(&mut tracker, &tx, &snapshot(Vec::new(), 1));

        assert_eq!(
            kinds(&findings),
            vec![FindingKind::HighFrequency, FindingKind::MediumFrequency]
        );
        assert_eq!(findings[0].threshold, SHORT);
        assert_eq!(findings[1].threshold, MEDIUM);
        assert_eq!(findings[0].metadata["callCount"], "2");
    }

    #[test]
    fn test_medium_only_between_periods() {
        let detector = detector();
        let mut tracker = CallTracker::new();
        tracker.record_execution(keeper(), strategy(), 0);

        let tx = TransactionEvent::new(2, SHORT + 1);
        let findings = detector.apply(&mut tracker, &tx, &snapshot(Vec::new(), 1));
        assert_eq!(kinds(&findings), vec![FindingKind::MediumFrequency]);
    }

    #[test]
    fn test_executions_in_same_transaction_are_sequential() {
        let detector = detector();
        let mut tracker = CallTracker::new();
        let tx = TransactionEvent::new(1, 100);

        let findings = detector.apply(&mut tracker, &tx, &snapshot(Vec::new(), 2));

        // second log sees the first: elapsed 0
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].metadata["elapsedTime"], "0");
        assert_eq!(tracker.count(keeper(), strategy()), 2);
    }

    #[test]
    fn test_regressed_execution_raises_nothing() {
        let detector = detector();
        let mut tracker = CallTracker::new();
        tracker.record_execution(keeper(), strategy(), 500);

        let tx = TransactionEvent::new(1, 400);
        assert!(detector
            .apply(&mut tracker, &tx, &snapshot(Vec::new(), 1))
            .is_empty());
    }

    #[test]
    fn test_removal_applies_after_silence_check() {
        let detector = detector();
        let mut tracker = CallTracker::new();
        let mut snap = snapshot(vec![strategy()], 0);
        snap.management.push(ManagementOp {
            kind: ManagementKind::Deregister,
            keeper: keeper(),
            strategy: strategy(),
        });

        let same_tx = TransactionEvent::new(1, 10);
        let findings = detector.apply(&mut tracker, &same_tx, &snap);
        assert_eq!(kinds(&findings), vec![FindingKind::NotCalled]);

        let later = TransactionEvent::new(2, 20);
        assert!(detector
            .apply(&mut tracker, &later, &snapshot(vec![strategy()], 0))
            .is_empty());
    }

    #[test]
    fn test_watched_id_matching() {
        let detector = detector();
        assert_eq!(detector.watched_id(U256::from(1)), Some(1));
        assert_eq!(detector.watched_id(U256::from(2)), None);
        assert_eq!(detector.watched_id(U256::MAX), None);
    }
}
