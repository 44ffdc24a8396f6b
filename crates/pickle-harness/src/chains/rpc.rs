use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{Chain, ChainError, ChainResult, RetryPolicy, TxReceipt, TxRequest};
use crate::config::HarnessConfig;

/// EVM chain reached over JSON-RPC (hardhat, anvil or any Ethereum node)
pub struct RpcChain {
    rpc_endpoint: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    tx_timeout: Duration,
    poll_interval: Duration,
    signers: RwLock<HashMap<Address, PrivateKeySigner>>,
    next_id: AtomicU64,
}

impl RpcChain {
    pub fn new(rpc_endpoint: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            rpc_endpoint: rpc_endpoint.into(),
            client: reqwest::Client::new(),
            retry,
            tx_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(250),
            signers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        let retry = RetryPolicy::with_base(config.global.max_retries, config.global.retry_delay_ms);
        Self::new(config.network.rpc_endpoint.clone(), retry).with_timeouts(
            Duration::from_secs(config.global.tx_timeout_secs),
            Duration::from_millis(config.global.receipt_poll_interval_ms),
        )
    }

    pub fn with_timeouts(mut self, tx_timeout: Duration, poll_interval: Duration) -> Self {
        self.tx_timeout = tx_timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn rpc_endpoint(&self) -> &str {
        &self.rpc_endpoint
    }

    /// Read-style request, retried on transport failures
    async fn request(&self, method: &str, params: Value) -> ChainResult<Value> {
        self.retry
            .execute(method, || self.request_once(method, params.clone()))
            .await
    }

    /// Single attempt. Used directly for anything that submits a transaction.
    async fn request_once(&self, method: &str, params: Value) -> ChainResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("RPC {} #{} -> {}", method, id, self.rpc_endpoint);

        let response = self
            .client
            .post(&self.rpc_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ChainError::Transport(format!("{} returned HTTP {}", method, status)));
        }
        if !status.is_success() {
            return Err(ChainError::Rpc {
                code: i64::from(status.as_u16()),
                message: format!("{} returned HTTP {}", method, status),
            });
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;

        if let Some(error) = response_json.get("error") {
            return Err(classify_rpc_error(error));
        }

        response_json
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::Decode(format!("{} response has no result", method)))
    }

    fn signer_for(&self, address: &Address) -> Option<PrivateKeySigner> {
        self.signers
            .read()
            .ok()
            .and_then(|signers| signers.get(address).cloned())
    }

    async fn send_unlocked(&self, tx: &TxRequest) -> ChainResult<B256> {
        let mut params = json!({
            "from": tx.from.to_string(),
            "data": encode_bytes(&tx.data),
            "value": format!("0x{:x}", tx.value),
        });
        if let Some(to) = tx.to {
            params["to"] = json!(to.to_string());
        }
        if let Some(gas) = tx.gas {
            params["gas"] = json!(to_quantity(gas));
        }

        let result = self.request_once("eth_sendTransaction", json!([params])).await?;
        parse_b256(&result)
    }

    async fn send_signed(&self, signer: &PrivateKeySigner, tx: &TxRequest) -> ChainResult<B256> {
        let from = tx.from.to_string();
        let nonce = parse_quantity(
            &self
                .request("eth_getTransactionCount", json!([from, "pending"]))
                .await?,
        )?;
        let gas_price = parse_u256(&self.request("eth_gasPrice", json!([])).await?)?;
        let gas_price = u128::try_from(gas_price)
            .map_err(|_| ChainError::Decode("gas price does not fit in u128".to_string()))?;

        let gas_limit = match tx.gas {
            Some(gas) => gas,
            None => {
                let mut estimate = json!({
                    "from": from,
                    "data": encode_bytes(&tx.data),
                });
                if let Some(to) = tx.to {
                    estimate["to"] = json!(to.to_string());
                }
                let estimated = parse_quantity(&self.request("eth_estimateGas", json!([estimate])).await?)?;
                estimated.saturating_mul(6) / 5
            }
        };

        let unsigned = TxLegacy {
            chain_id: Some(self.chain_id().await?),
            nonce,
            gas_price,
            gas_limit,
            to: tx.to.map(TxKind::Call).unwrap_or(TxKind::Create),
            value: tx.value,
            input: tx.data.clone(),
        };

        let signature = signer
            .sign_hash_sync(&unsigned.signature_hash())
            .map_err(|e| ChainError::Rpc {
                code: 0,
                message: format!("signing failed: {}", e),
            })?;
        let envelope = TxEnvelope::from(unsigned.into_signed(signature));
        let raw = envelope.encoded_2718();

        let result = self
            .request_once("eth_sendRawTransaction", json!([encode_bytes(&raw)]))
            .await?;
        parse_b256(&result)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> ChainResult<TxReceipt> {
        let started = Instant::now();

        loop {
            let receipt = self
                .request("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
                .await?;

            if !receipt.is_null() {
                return parse_receipt(tx_hash, &receipt);
            }

            if started.elapsed() >= self.tx_timeout {
                return Err(ChainError::Timeout(format!("receipt of {}", tx_hash)));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Chain for RpcChain {
    async fn chain_id(&self) -> ChainResult<u64> {
        parse_quantity(&self.request("eth_chainId", json!([])).await?)
    }

    async fn accounts(&self) -> ChainResult<Vec<Address>> {
        let result = self.request("eth_accounts", json!([])).await?;
        result
            .as_array()
            .ok_or_else(|| ChainError::Decode("eth_accounts did not return an array".to_string()))?
            .iter()
            .map(parse_address)
            .collect()
    }

    async fn block_number(&self) -> ChainResult<u64> {
        parse_quantity(&self.request("eth_blockNumber", json!([])).await?)
    }

    async fn timestamp(&self) -> ChainResult<u64> {
        let block = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let timestamp = block
            .get("timestamp")
            .ok_or_else(|| ChainError::Decode("latest block has no timestamp".to_string()))?;
        parse_quantity(timestamp)
    }

    async fn call(&self, to: Address, data: Bytes) -> ChainResult<Bytes> {
        let params = json!([
            { "to": to.to_string(), "data": encode_bytes(&data) },
            "latest"
        ]);
        let result = self.request("eth_call", params).await?;
        decode_bytes(&result)
    }

    async fn send_transaction(&self, tx: TxRequest) -> ChainResult<TxReceipt> {
        let tx_hash = match self.signer_for(&tx.from) {
            Some(signer) => self.send_signed(&signer, &tx).await?,
            None => self.send_unlocked(&tx).await?,
        };
        debug!("Submitted transaction {} from {}", tx_hash, tx.from);

        let receipt = self.wait_for_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(ChainError::Reverted {
                tx_hash: Some(tx_hash),
                reason: "receipt status 0".to_string(),
            });
        }
        Ok(receipt)
    }

    async fn impersonate(&self, account: Address) -> ChainResult<()> {
        let params = json!([account.to_string()]);
        match self.request("hardhat_impersonateAccount", params.clone()).await {
            Ok(_) => Ok(()),
            Err(ChainError::Rpc { .. }) => {
                debug!("hardhat_impersonateAccount unavailable, trying anvil");
                self.request("anvil_impersonateAccount", params).await.map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    async fn add_signer(&self, signer: PrivateKeySigner) -> ChainResult<Address> {
        let address = signer.address();
        let mut signers = self
            .signers
            .write()
            .map_err(|_| ChainError::Transport("signer registry poisoned".to_string()))?;
        signers.insert(address, signer);
        info!("Registered local signer {}", address);
        Ok(address)
    }

    async fn increase_time(&self, seconds: u64) -> ChainResult<u64> {
        self.request_once("evm_increaseTime", json!([seconds])).await?;
        self.mine().await?;
        Ok(seconds)
    }

    async fn mine(&self) -> ChainResult<()> {
        self.request_once("evm_mine", json!([])).await.map(|_| ())
    }
}

/// Map a JSON-RPC error object to a `ChainError`, extracting revert reasons
pub fn classify_rpc_error(error: &Value) -> ChainError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    if code == 3 || message.to_lowercase().contains("revert") {
        return ChainError::Reverted {
            tx_hash: None,
            reason: revert_reason(&message),
        };
    }

    ChainError::Rpc { code, message }
}

fn revert_reason(message: &str) -> String {
    const MARKER: &str = "reason string '";
    if let Some(start) = message.find(MARKER) {
        let rest = &message[start + MARKER.len()..];
        if let Some(end) = rest.find('\'') {
            return rest[..end].to_string();
        }
    }
    message.to_string()
}

fn parse_receipt(tx_hash: B256, receipt: &Value) -> ChainResult<TxReceipt> {
    let field = |name: &str| {
        receipt
            .get(name)
            .ok_or_else(|| ChainError::Decode(format!("receipt has no {}", name)))
    };

    let contract_address = match receipt.get("contractAddress") {
        Some(Value::String(address)) => Some(parse_address(&Value::String(address.clone()))?),
        _ => None,
    };

    Ok(TxReceipt {
        tx_hash,
        block_number: parse_quantity(field("blockNumber")?)?,
        gas_used: parse_quantity(field("gasUsed")?)?,
        contract_address,
        success: parse_quantity(field("status")?)? == 1,
    })
}

pub(crate) fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

pub(crate) fn encode_bytes(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

/// Parse a hex quantity, a decimal string or a JSON number
pub(crate) fn parse_quantity(value: &Value) -> ChainResult<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| ChainError::Decode(format!("{} is not a u64", number))),
        Value::String(text) => {
            let parsed = match text.strip_prefix("0x") {
                Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
                None => text.parse::<u64>(),
            };
            parsed.map_err(|e| ChainError::Decode(format!("invalid quantity {}: {}", text, e)))
        }
        other => Err(ChainError::Decode(format!("expected quantity, got {}", other))),
    }
}

pub(crate) fn parse_u256(value: &Value) -> ChainResult<U256> {
    let text = value
        .as_str()
        .ok_or_else(|| ChainError::Decode(format!("expected hex string, got {}", value)))?;
    let digits = text.strip_prefix("0x").unwrap_or(text);
    U256::from_str_radix(digits, 16).map_err(|e| ChainError::Decode(format!("invalid uint {}: {}", text, e)))
}

fn parse_address(value: &Value) -> ChainResult<Address> {
    let text = value
        .as_str()
        .ok_or_else(|| ChainError::Decode(format!("expected address, got {}", value)))?;
    Address::from_str(text).map_err(|e| ChainError::Decode(format!("invalid address {}: {}", text, e)))
}

fn parse_b256(value: &Value) -> ChainResult<B256> {
    let text = value
        .as_str()
        .ok_or_else(|| ChainError::Decode(format!("expected hash, got {}", value)))?;
    B256::from_str(text).map_err(|e| ChainError::Decode(format!("invalid hash {}: {}", text, e)))
}

fn decode_bytes(value: &Value) -> ChainResult<Bytes> {
    let text = value
        .as_str()
        .ok_or_else(|| ChainError::Decode(format!("expected hex data, got {}", value)))?;
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| ChainError::Decode(format!("invalid hex data: {}", e)))
}
