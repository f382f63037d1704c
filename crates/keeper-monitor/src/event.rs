//! Inbound transaction events as delivered by the host.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// A call made by (or traced inside) a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    /// Callee
    pub to: Address,
    /// Calldata, selector included
    #[serde(default)]
    pub input: Bytes,
}

/// A log emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics, topic0 first
    #[serde(default)]
    pub topics: Vec<B256>,
    /// Non-indexed data
    #[serde(default)]
    pub data: Bytes,
}

/// One transaction, in chain order, with the calls and logs it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    /// Transaction hash
    #[serde(default)]
    pub hash: B256,
    /// Block the transaction was included in
    pub block_number: u64,
    /// Block timestamp, seconds
    pub timestamp: u64,
    /// Top-level and traced calls
    #[serde(default)]
    pub calls: Vec<CallFrame>,
    /// Emitted logs, in log order
    #[serde(default)]
    pub logs: Vec<LogRecord>,
}

impl TransactionEvent {
    /// Creates an event with no calls or logs.
    #[must_use]
    pub fn new(block_number: u64, timestamp: u64) -> Self {
        Self {
            hash: B256::ZERO,
            block_number,
            timestamp,
            calls: Vec::new(),
            logs: Vec::new(),
        }
    }

    /// Adds a call.
    #[must_use]
    pub fn with_call(mut self, call: CallFrame) -> Self {
        self.calls.push(call);
        self
    }

    /// Adds a log.
    #[must_use]
    pub fn with_log(mut self, log: LogRecord) -> Self {
        self.logs.push(log);
        self
    }

    /// Logs emitted by `address`, in log order.
    pub fn logs_from(&self, address: Address) -> impl Iterator<Item = &LogRecord> {
        self.logs.iter().filter(move |log| log.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_event() {
        let json = r#"{
            "blockNumber": 14000000,
            "timestamp": 1642000000,
            "calls": [{"to": "0x00000000000000000000000000000000000000aa", "input": "0x1234"}],
            "logs": [{"address": "0x00000000000000000000000000000000000000bb", "topics": [], "data": "0x"}]
        }"#;

        let event: TransactionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.block_number, 14_000_000);
        assert_eq!(event.hash, B256::ZERO);
        assert_eq!(event.calls[0].input.as_ref(), &[0x12, 0x34]);
        assert_eq!(event.logs.len(), 1);
    }

    #[test]
    fn test_logs_from() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let event = TransactionEvent::new(1, 1)
            .with_log(LogRecord { address: a, topics: Vec::new(), data: Bytes::from_static(&[1]) })
            .with_log(LogRecord { address: b, topics: Vec::new(), data: Bytes::new() });

        assert_eq!(event.logs_from(a).count(), 1);
        assert_eq!(event.logs_from(b).count(), 1);
        assert_eq!(event.logs_from(Address::ZERO).count(), 0);
    }
}
