//! JSON-RPC backed [`StateSource`] over an alloy HTTP provider.
//!
//! Reads are pinned to the block being processed, so an archive-capable
//! endpoint is needed when replaying old blocks.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{BlockId, BlockNumberOrTag, TransactionInput, TransactionRequest};
use alloy::transports::http::reqwest::Url;
use alloy::transports::{RpcError, TransportError};
use async_trait::async_trait;
use keeper_monitor::{SourceError, SourceResult, StateSource};
use tracing::debug;

const GET_UPKEEP_SIGNATURE: &str = "getUpkeep(uint256)";
const STRATEGY_ARRAY_SIGNATURE: &str = "strategyArray(uint256)";

/// Chain state read through an HTTP provider.
pub struct RpcSource {
    provider: RootProvider,
    registry: Address,
}

impl RpcSource {
    /// Creates a source for `url`, resolving upkeeps through `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] if `url` does not parse.
    pub fn connect(url: &str, registry: Address) -> SourceResult<Self> {
        let endpoint: Url = url
            .parse()
            .map_err(|e| SourceError::Unavailable(format!("invalid rpc url {url}: {e}")))?;

        Ok(Self {
            provider: RootProvider::new_http(endpoint),
            registry,
        })
    }

    async fn eth_call(&self, to: Address, data: Bytes, block: u64) -> SourceResult<Bytes> {
        debug!(%to, block, "eth_call");
        let tx = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(data));

        self.provider
            .call(tx)
            .block(BlockId::number(block))
            .await
            .map_err(|e| source_error("eth_call", e))
    }
}

impl std::fmt::Debug for RpcSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSource")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StateSource for RpcSource {
    async fn upkeep_target(&self, block: u64, upkeep_id: u64) -> SourceResult<Address> {
        let data = encode_uint_call(GET_UPKEEP_SIGNATURE, upkeep_id);
        let output = self.eth_call(self.registry, data, block).await?;
        address_from_word(&output)
    }

    async fn strategy_count(&self, block: u64, keeper: Address) -> SourceResult<u64> {
        let slot = self
            .provider
            .get_storage_at(keeper, U256::ZERO)
            .block_id(BlockId::number(block))
            .await
            .map_err(|e| source_error("eth_getStorageAt", e))?;
        count_from_slot(slot)
    }

    async fn strategy_at(&self, block: u64, keeper: Address, index: u64) -> SourceResult<Address> {
        let data = encode_uint_call(STRATEGY_ARRAY_SIGNATURE, index);
        let output = self.eth_call(keeper, data, block).await?;
        address_from_word(&output)
    }

    async fn head_timestamp(&self) -> SourceResult<u64> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| source_error("eth_getBlockByNumber", e))?
            .ok_or_else(|| SourceError::Unavailable("latest block not returned".to_string()))?;
        Ok(block.header.timestamp)
    }
}

fn source_error(method: &str, err: TransportError) -> SourceError {
    match err {
        RpcError::Transport(kind) => SourceError::Unavailable(format!("{method}: {kind}")),
        RpcError::DeserError { err, .. } => SourceError::Decode(format!("{method}: {err}")),
        other => SourceError::Rpc(format!("{method}: {other}")),
    }
}

/// Calldata for a function taking a single `uint256`.
fn encode_uint_call(signature: &str, arg: u64) -> Bytes {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&keccak256(signature.as_bytes())[..4]);
    data.extend_from_slice(&U256::from(arg).to_be_bytes::<32>());
    data.into()
}

/// Address in the first return word.
fn address_from_word(output: &[u8]) -> SourceResult<Address> {
    if output.len() < 32 {
        return Err(SourceError::Decode(format!(
            "expected at least 32 bytes of return data, got {}",
            output.len()
        )));
    }
    Ok(Address::from_word(B256::from_slice(&output[..32])))
}

fn count_from_slot(slot: U256) -> SourceResult<u64> {
    u64::try_from(slot).map_err(|_| SourceError::Decode(format!("array length {slot} does not fit u64")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::transports::TransportErrorKind;

    #[test]
    fn test_uint_call_layout() {
        let data = encode_uint_call(GET_UPKEEP_SIGNATURE, 7);

        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &keccak256(b"getUpkeep(uint256)")[..4]);
        assert_eq!(data[35], 7);
        assert!(data[4..35].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_address_from_first_word() {
        let target = Address::repeat_byte(0x42);
        let mut output = target.into_word().to_vec();
        // trailing words of a multi-value return are ignored
        output.extend_from_slice(&[0xff; 64]);

        assert_eq!(address_from_word(&output).unwrap(), target);
        assert!(matches!(address_from_word(&[0u8; 31]), Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_count_from_slot() {
        assert_eq!(count_from_slot(U256::from(3)).unwrap(), 3);
        assert!(count_from_slot(U256::MAX).is_err());
    }

    #[test]
    fn test_transport_errors_classified() {
        let gone = source_error("eth_call", RpcError::Transport(TransportErrorKind::BackendGone));
        assert!(matches!(gone, SourceError::Unavailable(_)));

        let null = source_error("eth_call", RpcError::NullResp);
        assert!(matches!(null, SourceError::Rpc(_)));
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        assert!(matches!(
            RpcSource::connect("not a url", Address::ZERO),
            Err(SourceError::Unavailable(_))
        ));
        assert!(RpcSource::connect("http://localhost:8545", Address::ZERO).is_ok());
    }
}
