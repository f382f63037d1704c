//! Error types for the keeper monitor.
//!
//! Three families of failure exist, and they are handled differently:
//!
//! | Family | Type | Handling |
//! |--------|------|----------|
//! | Upstream read failed | [`SourceError`] | Fails the whole transaction cycle |
//! | Malformed call/log | [`DecodeError`] | Offending item skipped |
//! | Bad configuration | [`MonitorError::Config`] | Rejected at startup |

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors surfaced by [`UpkeepMonitor`](crate::UpkeepMonitor).
#[derive(Debug, Error)]
pub enum MonitorError {
    /// An upstream read failed while processing a transaction.
    ///
    /// Nothing is retried here. The host decides whether to
    /// redeliver the transaction.
    #[error("state source error: {0}")]
    Source(#[from] SourceError),

    /// Configuration is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Failure of a single upstream point query.
///
/// `Clone` because one in-flight fetch is shared by every caller
/// waiting on the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Transport or node-side failure.
    #[error("rpc failure: {0}")]
    Rpc(String),

    /// The node answered with something we could not interpret.
    #[error("undecodable response: {0}")]
    Decode(String),

    /// The queried entity does not exist at that block.
    #[error("not available: {0}")]
    Unavailable(String),
}

/// Failure to decode a management call or an execution log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Calldata shorter than selector plus arguments.
    #[error("calldata too short: {len} bytes")]
    ShortCalldata {
        /// Actual calldata length
        len: usize,
    },

    /// Log does not carry the expected topics.
    #[error("expected {expected} topics, found {found}")]
    MissingTopics {
        /// Topics required by the event signature
        expected: usize,
        /// Topics present on the log
        found: usize,
    },

    /// An ABI word or offset pointed outside the payload.
    #[error("malformed abi payload: {0}")]
    Malformed(String),

    /// A 32-byte word did not hold a left-padded address.
    #[error("word is not an address: dirty upper bytes")]
    DirtyAddress,
}
