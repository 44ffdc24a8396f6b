// Typed handles over the contracts the harness drives.
// Calls are ABI-encoded with sol! bindings and routed through `Chain`.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};
use serde::Serialize;
use tracing::debug;

use crate::chains::{Chain, ChainError, ChainResult, TxReceipt, TxRequest};

pub mod artifact;

pub use artifact::{Artifact, ArtifactStore};

sol! {
    interface IERC20 {
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
        function approve(address spender, uint256 amount) external returns (bool);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
    }

    interface IControllerV4 {
        function setJar(address token, address jar) external;
        function approveStrategy(address token, address strategy) external;
        function setStrategy(address token, address strategy) external;
        function withdrawAll(address token) external;
        function jars(address token) external view returns (address);
        function strategies(address token) external view returns (address);
    }

    interface IStrategyAlusd3Crv {
        function harvest() external;
        function setKeepAlcx(uint256 keep) external;
        function balanceOfPool() external view returns (uint256);
        function getHarvestable() external view returns (uint256);
        function getAlcxFarmHarvestable() external view returns (uint256);
        function pendingReward() external view returns (uint256);
    }

    interface IPickleJar {
        function deposit(uint256 amount) external;
        function withdrawAll() external;
        function earn() external;
        function balanceOf(address account) external view returns (uint256);
        function totalSupply() external view returns (uint256);
    }

    interface IPickleToken {
        function grantRole(bytes32 role, address account) external;
        function hasRole(bytes32 role, address account) external view returns (bool);
    }

    interface IMasterChef {
        function pickle() external view returns (address);
        function devaddr() external view returns (address);
        function picklePerBlock() external view returns (uint256);
        function startBlock() external view returns (uint256);
        function bonusEndBlock() external view returns (uint256);
    }
}

/// `AccessControl.DEFAULT_ADMIN_ROLE`
pub const DEFAULT_ADMIN_ROLE: B256 = B256::ZERO;

/// Scale whole-token `units` to base units with `decimals` decimals
pub fn to_wei(units: u64, decimals: u8) -> U256 {
    U256::from(units) * U256::from(10u64).pow(U256::from(decimals))
}

/// A deployed contract: immutable address plus a human-readable name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContractHandle {
    pub name: &'static str,
    pub address: Address,
}

impl fmt::Display for ContractHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.name, self.address)
    }
}

/// Generic contract access: encode, call, send
#[derive(Clone)]
pub struct Contract {
    handle: ContractHandle,
    chain: Arc<dyn Chain>,
}

impl Contract {
    pub fn attach(chain: Arc<dyn Chain>, name: &'static str, address: Address) -> Self {
        Self {
            handle: ContractHandle { name, address },
            chain,
        }
    }

    pub fn handle(&self) -> ContractHandle {
        self.handle
    }

    pub fn address(&self) -> Address {
        self.handle.address
    }

    /// `eth_call` a view function and decode its single return value
    pub async fn read<C, R>(&self, call: C) -> ChainResult<R>
    where
        C: SolCall,
        R: SolValue + From<<R::SolType as alloy::sol_types::SolType>::RustType>,
    {
        let raw = self
            .chain
            .call(self.handle.address, Bytes::from(call.abi_encode()))
            .await?;
        R::abi_decode(&raw).map_err(|e| {
            ChainError::Decode(format!("{}::{}: {}", self.handle.name, C::SIGNATURE, e))
        })
    }

    /// Send a state-changing call from `from` and wait for the receipt
    pub async fn send<C: SolCall>(&self, from: Address, call: C) -> ChainResult<TxReceipt> {
        debug!("{} <- {} from {}", self.handle.name, C::SIGNATURE, from);
        self.chain
            .send_transaction(TxRequest::call(from, self.handle.address, call.abi_encode()))
            .await
    }
}

/// ERC-20 token (want, reward, or any other)
#[derive(Clone)]
pub struct Erc20(Contract);

impl Erc20 {
    pub fn attach(chain: Arc<dyn Chain>, name: &'static str, address: Address) -> Self {
        Self(Contract::attach(chain, name, address))
    }

    pub fn handle(&self) -> ContractHandle {
        self.0.handle()
    }

    pub fn address(&self) -> Address {
        self.0.address()
    }

    pub async fn balance_of(&self, account: Address) -> ChainResult<U256> {
        self.0.read(IERC20::balanceOfCall { account }).await
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> ChainResult<U256> {
        self.0.read(IERC20::allowanceCall { owner, spender }).await
    }

    pub async fn transfer(&self, from: Address, to: Address, amount: U256) -> ChainResult<TxReceipt> {
        self.0.send(from, IERC20::transferCall { to, amount }).await
    }

    pub async fn approve(&self, owner: Address, spender: Address, amount: U256) -> ChainResult<TxReceipt> {
        self.0.send(owner, IERC20::approveCall { spender, amount }).await
    }
}

/// ControllerV4: maps want tokens to jars and strategies
#[derive(Clone)]
pub struct Controller(Contract);

impl Controller {
    pub fn attach(chain: Arc<dyn Chain>, address: Address) -> Self {
        Self(Contract::attach(chain, "ControllerV4", address))
    }

    pub fn handle(&self) -> ContractHandle {
        self.0.handle()
    }

    pub async fn set_jar(&self, governance: Address, token: Address, jar: Address) -> ChainResult<TxReceipt> {
        self.0.send(governance, IControllerV4::setJarCall { token, jar }).await
    }

    pub async fn approve_strategy(
        &self,
        governance: Address,
        token: Address,
        strategy: Address,
    ) -> ChainResult<TxReceipt> {
        self.0
            .send(governance, IControllerV4::approveStrategyCall { token, strategy })
            .await
    }

    pub async fn set_strategy(
        &self,
        governance: Address,
        token: Address,
        strategy: Address,
    ) -> ChainResult<TxReceipt> {
        self.0
            .send(governance, IControllerV4::setStrategyCall { token, strategy })
            .await
    }

    pub async fn withdraw_all(&self, governance: Address, token: Address) -> ChainResult<TxReceipt> {
        self.0.send(governance, IControllerV4::withdrawAllCall { token }).await
    }

    pub async fn jar_for(&self, token: Address) -> ChainResult<Address> {
        self.0.read(IControllerV4::jarsCall { token }).await
    }

    pub async fn strategy_for(&self, token: Address) -> ChainResult<Address> {
        self.0.read(IControllerV4::strategiesCall { token }).await
    }
}

/// StrategyCurveAlusd3Crv: farms want in the Alusd3Crv pool and the ALCX pool
#[derive(Clone)]
pub struct Strategy(Contract);

impl Strategy {
    pub fn attach(chain: Arc<dyn Chain>, address: Address) -> Self {
        Self(Contract::attach(chain, "StrategyCurveAlusd3Crv", address))
    }

    pub fn handle(&self) -> ContractHandle {
        self.0.handle()
    }

    pub fn address(&self) -> Address {
        self.0.address()
    }

    pub async fn harvest(&self, from: Address) -> ChainResult<TxReceipt> {
        self.0.send(from, IStrategyAlusd3Crv::harvestCall {}).await
    }

    pub async fn set_keep_alcx(&self, governance: Address, keep: U256) -> ChainResult<TxReceipt> {
        self.0
            .send(governance, IStrategyAlusd3Crv::setKeepAlcxCall { keep })
            .await
    }

    pub async fn balance_of_pool(&self) -> ChainResult<U256> {
        self.0.read(IStrategyAlusd3Crv::balanceOfPoolCall {}).await
    }

    /// Harvestable reward of the Alusd3Crv farm
    pub async fn harvestable(&self) -> ChainResult<U256> {
        self.0.read(IStrategyAlusd3Crv::getHarvestableCall {}).await
    }

    /// Harvestable reward of the ALCX farm
    pub async fn alcx_farm_harvestable(&self) -> ChainResult<U256> {
        self.0.read(IStrategyAlusd3Crv::getAlcxFarmHarvestableCall {}).await
    }

    pub async fn pending_reward(&self) -> ChainResult<U256> {
        self.0.read(IStrategyAlusd3Crv::pendingRewardCall {}).await
    }
}

/// PickleJarSymbiotic: the vault participants deposit into
#[derive(Clone)]
pub struct Jar(Contract);

impl Jar {
    pub fn attach(chain: Arc<dyn Chain>, address: Address) -> Self {
        Self(Contract::attach(chain, "PickleJarSymbiotic", address))
    }

    pub fn handle(&self) -> ContractHandle {
        self.0.handle()
    }

    pub fn address(&self) -> Address {
        self.0.address()
    }

    pub async fn deposit(&self, from: Address, amount: U256) -> ChainResult<TxReceipt> {
        self.0.send(from, IPickleJar::depositCall { amount }).await
    }

    pub async fn withdraw_all(&self, from: Address) -> ChainResult<TxReceipt> {
        self.0.send(from, IPickleJar::withdrawAllCall {}).await
    }

    pub async fn earn(&self, from: Address) -> ChainResult<TxReceipt> {
        self.0.send(from, IPickleJar::earnCall {}).await
    }

    /// Share (pToken) balance
    pub async fn balance_of(&self, account: Address) -> ChainResult<U256> {
        self.0.read(IPickleJar::balanceOfCall { account }).await
    }

    pub async fn total_supply(&self) -> ChainResult<U256> {
        self.0.read(IPickleJar::totalSupplyCall {}).await
    }
}

/// PickleToken with AccessControl roles
#[derive(Clone)]
pub struct PickleToken(Contract);

impl PickleToken {
    pub fn attach(chain: Arc<dyn Chain>, address: Address) -> Self {
        Self(Contract::attach(chain, "PickleToken", address))
    }

    pub fn handle(&self) -> ContractHandle {
        self.0.handle()
    }

    pub async fn grant_role(&self, admin: Address, role: B256, account: Address) -> ChainResult<TxReceipt> {
        self.0.send(admin, IPickleToken::grantRoleCall { role, account }).await
    }

    pub async fn has_role(&self, role: B256, account: Address) -> ChainResult<bool> {
        self.0.read(IPickleToken::hasRoleCall { role, account }).await
    }
}

/// MasterChef farming contract
#[derive(Clone)]
pub struct MasterChef(Contract);

impl MasterChef {
    pub fn attach(chain: Arc<dyn Chain>, address: Address) -> Self {
        Self(Contract::attach(chain, "MasterChef", address))
    }

    pub fn handle(&self) -> ContractHandle {
        self.0.handle()
    }

    pub async fn pickle(&self) -> ChainResult<Address> {
        self.0.read(IMasterChef::pickleCall {}).await
    }

    pub async fn pickle_per_block(&self) -> ChainResult<U256> {
        self.0.read(IMasterChef::picklePerBlockCall {}).await
    }

    pub async fn start_block(&self) -> ChainResult<U256> {
        self.0.read(IMasterChef::startBlockCall {}).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_wei() {
        assert_eq!(to_wei(2000, 18), U256::from(2000u128 * 10u128.pow(18)));
        assert_eq!(to_wei(1, 6), U256::from(1_000_000u64));
        assert_eq!(to_wei(0, 18), U256::ZERO);
    }

    #[test]
    fn test_selectors_match_solidity() {
        // keccak256("transfer(address,uint256)")[..4]
        assert_eq!(IERC20::transferCall::SELECTOR, [0xa9, 0x05, 0x9c, 0xbb]);
        // keccak256("balanceOf(address)")[..4]
        assert_eq!(IERC20::balanceOfCall::SELECTOR, [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(IPickleJar::withdrawAllCall::SIGNATURE, "withdrawAll()");
        assert_eq!(IPickleToken::grantRoleCall::SIGNATURE, "grantRole(bytes32,address)");
    }

    #[test]
    fn test_call_encoding_layout() {
        let call = IPickleJar::depositCall { amount: to_wei(1000, 18) };
        let encoded = call.abi_encode();
        assert_eq!(encoded.len(), 4 + 32);
        assert_eq!(&encoded[..4], &IPickleJar::depositCall::SELECTOR);
    }
}
