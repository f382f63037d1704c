//! Minimal ABI handling for the calls and logs the detector reacts to.
//!
//! Only three shapes matter, so they are decoded by hand:
//!
//! | Shape | Signature | Yields |
//! |-------|-----------|--------|
//! | Call to a keeper | `addStrategy(address)` | [`ManagementKind::Register`] |
//! | Call to a keeper | `removeStrategy(address)` | [`ManagementKind::Deregister`] |
//! | Registry log | `UpkeepPerformed(uint256,bool,address,uint96,bytes)` | [`UpkeepPerformed`] |
//!
//! The strategy of an execution is carried in the log's `performData`, which
//! itself ABI-encodes a single address.

use crate::error::DecodeError;
use crate::event::{CallFrame, LogRecord};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use std::sync::OnceLock;

const WORD: usize = 32;

/// Signature of the keeper call that adds a strategy.
pub const ADD_STRATEGY_SIGNATURE: &str = "addStrategy(address)";
/// Signature of the keeper call that removes a strategy.
pub const REMOVE_STRATEGY_SIGNATURE: &str = "removeStrategy(address)";
/// Signature of the registry execution log.
pub const UPKEEP_PERFORMED_SIGNATURE: &str = "UpkeepPerformed(uint256,bool,address,uint96,bytes)";

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Selector of [`ADD_STRATEGY_SIGNATURE`].
pub fn add_strategy_selector() -> [u8; 4] {
    static SELECTOR: OnceLock<[u8; 4]> = OnceLock::new();
    *SELECTOR.get_or_init(|| selector(ADD_STRATEGY_SIGNATURE))
}

/// Selector of [`REMOVE_STRATEGY_SIGNATURE`].
pub fn remove_strategy_selector() -> [u8; 4] {
    static SELECTOR: OnceLock<[u8; 4]> = OnceLock::new();
    *SELECTOR.get_or_init(|| selector(REMOVE_STRATEGY_SIGNATURE))
}

/// topic0 of [`UPKEEP_PERFORMED_SIGNATURE`].
pub fn upkeep_performed_topic() -> B256 {
    static TOPIC: OnceLock<B256> = OnceLock::new();
    *TOPIC.get_or_init(|| keccak256(UPKEEP_PERFORMED_SIGNATURE.as_bytes()))
}

/// Kind of strategy management operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagementKind {
    /// Strategy added to the keeper.
    Register,
    /// Strategy removed from the keeper.
    Deregister,
}

impl ManagementKind {
    /// Matches a calldata selector.
    #[must_use]
    pub fn from_selector(selector: &[u8]) -> Option<Self> {
        if selector == add_strategy_selector() {
            Some(Self::Register)
        } else if selector == remove_strategy_selector() {
            Some(Self::Deregister)
        } else {
            None
        }
    }

    /// Selector of the call producing this kind.
    #[must_use]
    pub fn selector(self) -> [u8; 4] {
        match self {
            Self::Register => add_strategy_selector(),
            Self::Deregister => remove_strategy_selector(),
        }
    }
}

/// A decoded strategy management call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagementOp {
    /// Add or remove
    pub kind: ManagementKind,
    /// Keeper the call was addressed to
    pub keeper: Address,
    /// Strategy passed as first argument
    pub strategy: Address,
}

/// A decoded `UpkeepPerformed` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpkeepPerformed {
    /// Upkeep id (topic 1)
    pub upkeep_id: U256,
    /// Whether the perform call succeeded (topic 2)
    pub success: bool,
    /// Keeper node that submitted the perform (topic 3)
    pub from: Address,
    /// Payment charged, uint96
    pub payment: U256,
    /// Strategy decoded from `performData`
    pub strategy: Address,
}

/// Decodes a call as a strategy management operation.
///
/// Returns `Ok(None)` if the selector is not a management selector.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the selector matches but the argument is
/// missing or not an address.
pub fn decode_management_call(call: &CallFrame) -> Result<Option<ManagementOp>, DecodeError> {
    let input = call.input.as_ref();
    let Some(kind) = input.get(..4).and_then(ManagementKind::from_selector) else {
        return Ok(None);
    };

    let args = &input[4..];
    if args.len() < WORD {
        return Err(DecodeError::ShortCalldata { len: input.len() });
    }

    Ok(Some(ManagementOp {
        kind,
        keeper: call.to,
        strategy: address_from_word(&args[..WORD])?,
    }))
}

/// Decodes a log as `UpkeepPerformed`.
///
/// Returns `Ok(None)` if topic0 does not match.
///
/// # Errors
///
/// Returns a [`DecodeError`] if topics are missing or the data (including
/// the nested `performData`) is malformed.
pub fn decode_upkeep_performed(log: &LogRecord) -> Result<Option<UpkeepPerformed>, DecodeError> {
    if log.topics.first() != Some(&upkeep_performed_topic()) {
        return Ok(None);
    }
    if log.topics.len() < 4 {
        return Err(DecodeError::MissingTopics {
            expected: 4,
            found: log.topics.len(),
        });
    }

    let data = log.data.as_ref();
    let payment = U256::from_be_slice(word_at(data, 0)?);
    let perform_data = dynamic_bytes_at(data, WORD)?;

    Ok(Some(UpkeepPerformed {
        upkeep_id: U256::from_be_bytes(log.topics[1].0),
        success: log.topics[2] != B256::ZERO,
        from: address_from_word(log.topics[3].as_slice())?,
        payment,
        strategy: decode_perform_data(perform_data)?,
    }))
}

/// Decodes `performData` as a single ABI-encoded address.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the payload is shorter than one word or
/// the word is not a left-padded address.
pub fn decode_perform_data(perform_data: &[u8]) -> Result<Address, DecodeError> {
    address_from_word(word_at(perform_data, 0)?)
}

/// Encodes a management call, as a keeper admin would send it.
#[must_use]
pub fn encode_management_call(kind: ManagementKind, strategy: Address) -> Bytes {
    let mut input = Vec::with_capacity(4 + WORD);
    input.extend_from_slice(&kind.selector());
    input.extend_from_slice(strategy.into_word().as_slice());
    input.into()
}

/// Builds an `UpkeepPerformed` log whose `performData` encodes `strategy`.
#[must_use]
pub fn encode_upkeep_performed(
    registry: Address,
    upkeep_id: U256,
    from: Address,
    payment: U256,
    strategy: Address,
) -> LogRecord {
    let perform_data = strategy.into_word();

    let mut data = Vec::with_capacity(4 * WORD);
    data.extend_from_slice(&payment.to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(2 * WORD).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(WORD).to_be_bytes::<32>());
    data.extend_from_slice(perform_data.as_slice());

    LogRecord {
        address: registry,
        topics: vec![
            upkeep_performed_topic(),
            B256::from(upkeep_id),
            B256::with_last_byte(1),
            from.into_word(),
        ],
        data: data.into(),
    }
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8], DecodeError> {
    offset
        .checked_add(WORD)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            DecodeError::Malformed(format!("word at {offset} past end of {} bytes", data.len()))
        })
}

fn usize_from_word(word: &[u8]) -> Result<usize, DecodeError> {
    let value = U256::from_be_slice(word);
    if value > U256::from(u32::MAX) {
        return Err(DecodeError::Malformed(format!("offset or length {value} too large")));
    }
    Ok(value.to::<usize>())
}

/// Reads `bytes` whose head (offset word) sits at `head`.
fn dynamic_bytes_at(data: &[u8], head: usize) -> Result<&[u8], DecodeError> {
    let offset = usize_from_word(word_at(data, head)?)?;
    let len = usize_from_word(word_at(data, offset)?)?;
    let start = offset + WORD;
    data.get(start..start + len).ok_or_else(|| {
        DecodeError::Malformed(format!("bytes of length {len} at {start} past end of {} bytes", data.len()))
    })
}

fn address_from_word(word: &[u8]) -> Result<Address, DecodeError> {
    if word.len() != WORD {
        return Err(DecodeError::Malformed(format!("word of {} bytes", word.len())));
    }
    if word[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError::DirtyAddress);
    }
    Ok(Address::from_slice(&word[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keeper() -> Address {
        Address::repeat_byte(0x11)
    }

    fn strategy() -> Address {
        Address::repeat_byte(0x22)
    }

    #[test]
    fn test_selectors_are_distinct() {
        assert_ne!(add_strategy_selector(), remove_strategy_selector());
        assert_eq!(
            ManagementKind::from_selector(&add_strategy_selector()),
            Some(ManagementKind::Register)
        );
        assert_eq!(
            ManagementKind::from_selector(&remove_strategy_selector()),
            Some(ManagementKind::Deregister)
        );
        assert_eq!(ManagementKind::from_selector(&[0, 0, 0, 0]), None);
    }

    #[test]
    fn test_decode_management_call() {
        let call = CallFrame {
            to: keeper(),
            input: encode_management_call(ManagementKind::Deregister, strategy()),
        };

        let op = decode_management_call(&call).unwrap().unwrap();
        assert_eq!(op.kind, ManagementKind::Deregister);
        assert_eq!(op.keeper, keeper());
        assert_eq!(op.strategy, strategy());
    }

    #[test]
    fn test_unrelated_call_is_ignored() {
        let call = CallFrame {
            to: keeper(),
            input: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef, 0x00]),
        };
        assert_eq!(decode_management_call(&call).unwrap(), None);

        let empty = CallFrame { to: keeper(), input: Bytes::new() };
        assert_eq!(decode_management_call(&empty).unwrap(), None);
    }

    #[test]
    fn test_truncated_management_call() {
        let mut input = add_strategy_selector().to_vec();
        input.extend_from_slice(&[0u8; 10]);
        let call = CallFrame { to: keeper(), input: input.into() };

        assert_eq!(
            decode_management_call(&call),
            Err(DecodeError::ShortCalldata { len: 14 })
        );
    }

    #[test]
    fn test_dirty_address_rejected() {
        let mut input = add_strategy_selector().to_vec();
        input.extend_from_slice(&[0xff; 32]);
        let call = CallFrame { to: keeper(), input: input.into() };

        assert_eq!(decode_management_call(&call), Err(DecodeError::DirtyAddress));
    }

    #[test]
    fn test_decode_upkeep_performed() {
        let registry = Address::repeat_byte(0x33);
        let node = Address::repeat_byte(0x44);
        let log = encode_upkeep_performed(registry, U256::from(7), node, U256::from(1_000), strategy());

        let performed = decode_upkeep_performed(&log).unwrap().unwrap();
        assert_eq!(performed.upkeep_id, U256::from(7));
        assert!(performed.success);
        assert_eq!(performed.from, node);
        assert_eq!(performed.payment, U256::from(1_000));
        assert_eq!(performed.strategy, strategy());
    }

    #[test]
    fn test_other_log_is_ignored() {
        let log = LogRecord {
            address: Address::repeat_byte(0x33),
            topics: vec![B256::repeat_byte(0x01)],
            data: Bytes::new(),
        };
        assert_eq!(decode_upkeep_performed(&log).unwrap(), None);
    }

    #[test]
    fn test_missing_topics() {
        let log = LogRecord {
            address: Address::repeat_byte(0x33),
            topics: vec![upkeep_performed_topic(), B256::ZERO],
            data: Bytes::new(),
        };
        assert_eq!(
            decode_upkeep_performed(&log),
            Err(DecodeError::MissingTopics { expected: 4, found: 2 })
        );
    }

    #[test]
    fn test_truncated_perform_data() {
        let mut log = encode_upkeep_performed(
            Address::repeat_byte(0x33),
            U256::from(1),
            Address::ZERO,
            U256::ZERO,
            strategy(),
        );
        let mut data = log.data.to_vec();
        data.truncate(3 * WORD + 5);
        log.data = data.into();

        assert!(matches!(
            decode_upkeep_performed(&log),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_perform_data_with_trailing_bytes() {
        let mut payload = strategy().into_word().to_vec();
        payload.extend_from_slice(&[0xab; 32]);
        assert_eq!(decode_perform_data(&payload).unwrap(), strategy());
        assert!(decode_perform_data(&payload[..31]).is_err());
    }
}
