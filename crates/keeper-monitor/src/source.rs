//! Upstream chain state, read "as of" a historical block.
//!
//! The monitor never talks to a node directly. Everything it needs from the
//! chain goes through [`StateSource`], and every block-scoped read goes
//! through the [`StateCache`](crate::StateCache) in front of it.

use crate::error::SourceError;
use alloy_primitives::Address;
use async_trait::async_trait;

/// Result of a single upstream read.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Point queries against historical chain state.
///
/// Implementations must be safe to call concurrently: the detector issues
/// independent lookups for one transaction in parallel.
#[async_trait]
pub trait StateSource: Send + Sync {
    /// Resolves an upkeep id to its target (the keeper contract).
    async fn upkeep_target(&self, block: u64, upkeep_id: u64) -> SourceResult<Address>;

    /// Length of the keeper's strategy array.
    async fn strategy_count(&self, block: u64, keeper: Address) -> SourceResult<u64>;

    /// Strategy stored at `index` of the keeper's strategy array.
    async fn strategy_at(&self, block: u64, keeper: Address, index: u64) -> SourceResult<Address>;

    /// Timestamp of the current head block.
    async fn head_timestamp(&self) -> SourceResult<u64>;
}
