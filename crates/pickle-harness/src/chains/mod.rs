// Chain-facing types shared by the RPC client and the in-memory simulation

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use thiserror::Error;

pub mod retry;
pub mod rpc;
pub mod simulated;

pub use retry::RetryPolicy;
pub use rpc::RpcChain;
pub use simulated::{FarmPreset, SimulatedChain};

/// Errors surfaced by a chain client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transaction reverted: {reason}")]
    Reverted {
        tx_hash: Option<B256>,
        reason: String,
    },

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("account {0} is neither unlocked, impersonated nor backed by a local key")]
    UnknownSigner(Address),
}

impl ChainError {
    /// Network-level failures that may succeed when retried. Reverts never are.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_) | ChainError::Timeout(_))
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        ChainError::Reverted {
            tx_hash: None,
            reason: reason.into(),
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// A transaction to submit. `to == None` creates a contract from `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub gas: Option<u64>,
}

impl TxRequest {
    pub fn call(from: Address, to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from,
            to: Some(to),
            data: data.into(),
            value: U256::ZERO,
            gas: None,
        }
    }

    pub fn create(from: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from,
            to: None,
            data: data.into(),
            value: U256::ZERO,
            gas: None,
        }
    }
}

/// Confirmed transaction outcome
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub success: bool,
}

/// Call surface the harness needs from an EVM chain (node or simulation).
///
/// Every method resolves only once the node has answered; `send_transaction`
/// resolves once the transaction is mined, so callers never overlap transactions.
#[async_trait]
pub trait Chain: Send + Sync {
    /// Chain id reported by the node
    async fn chain_id(&self) -> ChainResult<u64>;

    /// Accounts managed (unlocked) by the node
    async fn accounts(&self) -> ChainResult<Vec<Address>>;

    /// Latest block number
    async fn block_number(&self) -> ChainResult<u64>;

    /// Timestamp of the latest block, in seconds
    async fn timestamp(&self) -> ChainResult<u64>;

    /// Read-only call (`eth_call` against the latest block)
    async fn call(&self, to: Address, data: Bytes) -> ChainResult<Bytes>;

    /// Submit a transaction and wait for its receipt. A failed receipt is
    /// reported as `ChainError::Reverted`.
    async fn send_transaction(&self, tx: TxRequest) -> ChainResult<TxReceipt>;

    /// Allow transactions to be sent from `account` without its key
    async fn impersonate(&self, account: Address) -> ChainResult<()>;

    /// Register a local private key; transactions from its address are signed locally
    async fn add_signer(&self, signer: PrivateKeySigner) -> ChainResult<Address>;

    /// Move the chain clock forward and mine a block. Returns the applied offset.
    async fn increase_time(&self, seconds: u64) -> ChainResult<u64>;

    /// Mine a single block
    async fn mine(&self) -> ChainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ChainError::Transport("connection refused".into()).is_transient());
        assert!(ChainError::Timeout("receipt".into()).is_transient());
        assert!(!ChainError::reverted("!governance").is_transient());
        assert!(!ChainError::Rpc { code: -32000, message: "nonce too low".into() }.is_transient());
    }

    #[test]
    fn test_tx_request_constructors() {
        let from = Address::repeat_byte(1);
        let to = Address::repeat_byte(2);

        let call = TxRequest::call(from, to, vec![0xde, 0xad]);
        assert_eq!(call.to, Some(to));
        assert_eq!(call.value, U256::ZERO);

        let create = TxRequest::create(from, vec![0x60, 0x80]);
        assert!(create.to.is_none());
        assert_eq!(create.data.len(), 2);
    }
}
