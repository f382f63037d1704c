//! # Keeper Monitor
//!
//! Watches keeper-driven strategy upkeeps and raises findings when their
//! execution cadence turns anomalous: too frequent (possible griefing of
//! the upkeep balance) or too quiet (stalled automation).
//!
//! ## Threat Model
//!
//! | Symptom | Check | Finding |
//! |---------|-------|---------|
//! | Strategy executed twice within a day | short period | `KEEPER-HIGH-CALL-FREQUENCY` |
//! | Strategy executed twice within a week | medium period | `KEEPER-MEDIUM-CALL-FREQUENCY` |
//! | Strategy silent for a month | huge period | `KEEPER-STRATEGY-NOT-CALLED` |
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`UpkeepMonitor`] | Facade: detect then suppress, per transaction |
//! | [`StateCache`] | Block-scoped LRU over the [`StateSource`], de-duplicating in-flight reads |
//! | [`CallTracker`] | Last execution and count per `(keeper, strategy)` |
//! | [`AnomalyDetector`] | Silence, management and execution handling |
//! | [`AlertSuppressor`] | Time-window de-duplication of findings |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keeper_monitor::{MonitorConfig, UpkeepMonitor};
//!
//! let config = MonitorConfig::from_json_file("config/keeper-watch.json")?;
//! let monitor = UpkeepMonitor::new(config, source)?;
//!
//! // Once, before the first transaction:
//! monitor.initialize().await?;
//!
//! // For every transaction, in chain order:
//! let findings = monitor.handle_transaction(&tx).await?;
//! ```
//!
//! ## Notes
//!
//! - State lives for the process lifetime only; nothing is persisted
//! - Upstream failures fail the transaction without partial state changes
//! - Malformed calls and logs are skipped individually

mod abi;
mod cache;
mod config;
mod detector;
mod error;
mod event;
mod finding;
mod monitor;
mod source;
mod suppressor;
mod tracker;

pub use abi::{
    decode_management_call, decode_perform_data, decode_upkeep_performed, encode_management_call,
    encode_upkeep_performed, ManagementKind, ManagementOp, UpkeepPerformed,
};
pub use cache::{CacheKey, CacheStats, StateCache};
pub use config::{MonitorConfig, DEFAULT_MAX_STRATEGIES, ONE_DAY, ONE_MONTH, ONE_WEEK};
pub use detector::{AnomalyDetector, Execution, KeeperState, Snapshot};
pub use error::{DecodeError, MonitorError, Result, SourceError};
pub use event::{CallFrame, LogRecord, TransactionEvent};
pub use finding::{
    Finding, FindingKind, FindingSeverity, FindingType, Silence, HIGH_FREQUENCY_ALERT_ID,
    MEDIUM_FREQUENCY_ALERT_ID, NOT_CALLED_ALERT_ID,
};
pub use monitor::{MonitorStatus, UpkeepMonitor};
pub use source::{SourceResult, StateSource};
pub use suppressor::{AlertSuppressor, SuppressionKey};
pub use tracker::{CallKey, CallRecord, CallTracker, Elapsed, LastCall};
