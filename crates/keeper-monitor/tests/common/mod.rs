//! Shared fixtures for integration tests.

#![allow(dead_code)]

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use keeper_monitor::{
    encode_management_call, encode_upkeep_performed, CallFrame, LogRecord, ManagementKind,
    MonitorConfig, SourceError, SourceResult, StateSource,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const SHORT: u64 = 86_400;
pub const MEDIUM: u64 = 604_800;
pub const HUGE: u64 = 2_592_000;

pub fn registry() -> Address {
    Address::repeat_byte(0xee)
}

pub fn keeper() -> Address {
    Address::repeat_byte(0xc0)
}

pub fn strategy(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn config(ids: Vec<u64>) -> MonitorConfig {
    MonitorConfig::new()
        .with_registry(registry())
        .with_upkeep_ids(ids)
        .with_periods(SHORT, MEDIUM, HUGE)
}

/// Current-state chain stand-in. Block heights are ignored, so tests
/// must move to a new block to observe a change through the cache.
#[derive(Default)]
pub struct ScriptedSource {
    upkeeps: Mutex<HashMap<u64, Address>>,
    strategies: Mutex<HashMap<Address, Vec<Address>>>,
    /// Slot-0 values that disagree with the strategy list.
    counts: Mutex<HashMap<Address, u64>>,
    head: u64,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedSource {
    pub fn new(head: u64) -> Self {
        Self {
            head,
            ..Self::default()
        }
    }

    pub fn with_upkeep(self, id: u64, keeper: Address, strategies: Vec<Address>) -> Self {
        self.upkeeps.lock().unwrap().insert(id, keeper);
        self.strategies.lock().unwrap().insert(keeper, strategies);
        self
    }

    pub fn set_strategies(&self, keeper: Address, strategies: Vec<Address>) {
        self.strategies.lock().unwrap().insert(keeper, strategies);
    }

    /// Overrides the array length reported for `keeper`; `None` restores it.
    pub fn set_count(&self, keeper: Address, count: Option<u64>) {
        let mut counts = self.counts.lock().unwrap();
        match count {
            Some(count) => counts.insert(keeper, count),
            None => counts.remove(&keeper),
        };
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> SourceResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Rpc("node unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateSource for ScriptedSource {
    async fn upkeep_target(&self, _block: u64, upkeep_id: u64) -> SourceResult<Address> {
        self.enter()?;
        tokio::task::yield_now().await;
        self.upkeeps
            .lock()
            .unwrap()
            .get(&upkeep_id)
            .copied()
            .ok_or_else(|| SourceError::Unavailable(format!("upkeep {upkeep_id}")))
    }

    async fn strategy_count(&self, _block: u64, keeper: Address) -> SourceResult<u64> {
        self.enter()?;
        tokio::task::yield_now().await;
        if let Some(&count) = self.counts.lock().unwrap().get(&keeper) {
            return Ok(count);
        }
        Ok(self
            .strategies
            .lock()
            .unwrap()
            .get(&keeper)
            .map_or(0, |s| s.len() as u64))
    }

    async fn strategy_at(&self, _block: u64, keeper: Address, index: u64) -> SourceResult<Address> {
        self.enter()?;
        tokio::task::yield_now().await;
        self.strategies
            .lock()
            .unwrap()
            .get(&keeper)
            .and_then(|s| s.get(index as usize).copied())
            .ok_or_else(|| SourceError::Unavailable(format!("strategy {index} of {keeper}")))
    }

    async fn head_timestamp(&self) -> SourceResult<u64> {
        Ok(self.head)
    }
}

pub fn performed(upkeep_id: u64, strategy: Address) -> LogRecord {
    encode_upkeep_performed(
        registry(),
        U256::from(upkeep_id),
        Address::repeat_byte(0x99),
        U256::from(1_000_000u64),
        strategy,
    )
}

pub fn management(kind: ManagementKind, keeper: Address, strategy: Address) -> CallFrame {
    CallFrame {
        to: keeper,
        input: encode_management_call(kind, strategy),
    }
}
