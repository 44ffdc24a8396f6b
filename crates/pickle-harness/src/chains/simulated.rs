// In-memory stand-in for a forked mainnet running the pickle contracts.
//
// Contracts are recognised by their creation bytecode and modelled behaviourally:
// ERC-20 ledgers, ControllerV4 wiring, a two-farm strategy that accrues reward
// per second on its pooled want, a symbiotic jar distributing that reward per
// share, the AccessControl part of PickleToken and MasterChef's constructor views.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use tracing::debug;

use super::{Chain, ChainError, ChainResult, TxReceipt, TxRequest};
use crate::config::HarnessConfig;
use crate::contracts::artifact::Artifact;
use crate::contracts::{IControllerV4, IERC20, IMasterChef, IPickleJar, IPickleToken, IStrategyAlusd3Crv, DEFAULT_ADMIN_ROLE};

const CHAIN_ID: u64 = 31_337;
const GENESIS_BLOCK: u64 = 13_000_000;
const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const ACCOUNT_COUNT: u64 = 10;
/// Precision of the jar's reward-per-share accumulator
const ACC_PRECISION: u64 = 1_000_000_000_000;
const MAX_BPS: u64 = 10_000;

/// Tokens and farm yields the simulated fork starts with
#[derive(Debug, Clone)]
pub struct FarmPreset {
    pub want: Address,
    pub reward_token: Address,
    pub whale: Address,
    pub whale_balance: U256,
    /// Base farm reward per second for each 1e18 of pooled want
    pub base_rate: U256,
    /// ALCX farm reward per second for each 1e18 of pooled want
    pub alcx_rate: U256,
}

impl FarmPreset {
    pub fn from_config(config: &HarnessConfig) -> Self {
        let unit = U256::from(10u64).pow(U256::from(config.vault.want_decimals));
        Self {
            want: config.vault.want,
            reward_token: config.vault.reward_token,
            whale: config.vault.whale,
            whale_balance: U256::from(1_000_000u64) * unit,
            base_rate: U256::from(100_000_000_000u64),
            alcx_rate: U256::from(50_000_000_000u64),
        }
    }
}

/// Contract behaviours the simulation knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractKind {
    Controller,
    Strategy,
    Jar,
    PickleToken,
    MasterChef,
}

impl ContractKind {
    fn from_contract_name(name: &str) -> Option<Self> {
        match name {
            "ControllerV4" => Some(ContractKind::Controller),
            "StrategyCurveAlusd3Crv" => Some(ContractKind::Strategy),
            "PickleJarSymbiotic" => Some(ContractKind::Jar),
            "PickleToken" => Some(ContractKind::PickleToken),
            "MasterChef" => Some(ContractKind::MasterChef),
            _ => None,
        }
    }
}

type Revert = String;

#[derive(Debug, Clone, Default)]
struct Erc20State {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    total_supply: U256,
}

impl Erc20State {
    fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    fn mint(&mut self, to: Address, amount: U256) {
        *self.balances.entry(to).or_default() += amount;
        self.total_supply += amount;
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), Revert> {
        let balance = self.balance_of(from);
        if balance < amount {
            return Err("ERC20: transfer amount exceeds balance".to_string());
        }
        self.balances.insert(from, balance - amount);
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }

    fn transfer_from(&mut self, spender: Address, from: Address, to: Address, amount: U256) -> Result<(), Revert> {
        let allowance = self.allowances.get(&(from, spender)).copied().unwrap_or_default();
        if allowance < amount {
            return Err("ERC20: transfer amount exceeds allowance".to_string());
        }
        self.transfer(from, to, amount)?;
        self.allowances.insert((from, spender), allowance - amount);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ControllerState {
    governance: Address,
    strategist: Address,
    treasury: Address,
    jars: HashMap<Address, Address>,
    strategies: HashMap<Address, Address>,
    approved: HashSet<(Address, Address)>,
}

#[derive(Debug, Clone)]
struct StrategyState {
    governance: Address,
    strategist: Address,
    controller: Address,
    pool: U256,
    keep_alcx: U256,
    base_pending: U256,
    alcx_pending: U256,
    last_accrual: u64,
}

#[derive(Debug, Clone)]
struct JarState {
    want: Address,
    reward: Address,
    controller: Address,
    shares: Erc20State,
    acc_reward_per_share: U256,
    reward_debt: HashMap<Address, U256>,
}

#[derive(Debug, Clone)]
struct MasterChefState {
    pickle: Address,
    devaddr: Address,
    pickle_per_block: U256,
    start_block: U256,
    bonus_end_block: U256,
}

#[derive(Debug, Clone)]
struct SimState {
    block: u64,
    timestamp: u64,
    accounts: Vec<Address>,
    impersonated: HashSet<Address>,
    local_signers: HashSet<Address>,
    nonces: HashMap<Address, u64>,
    templates: Vec<(Bytes, ContractKind)>,
    tokens: HashMap<Address, Erc20State>,
    roles: HashMap<Address, HashMap<B256, HashSet<Address>>>,
    controllers: HashMap<Address, ControllerState>,
    strategies: HashMap<Address, StrategyState>,
    jars: HashMap<Address, JarState>,
    masterchefs: HashMap<Address, MasterChefState>,
}

/// Deterministic in-memory chain implementing `Chain`
pub struct SimulatedChain {
    preset: FarmPreset,
    state: Mutex<SimState>,
}

impl SimulatedChain {
    pub fn new(preset: FarmPreset) -> Self {
        let accounts = (0..ACCOUNT_COUNT)
            .map(|index| Address::from_slice(&keccak256(format!("simulated-account-{}", index))[12..]))
            .collect();

        let mut tokens = HashMap::new();
        let mut want = Erc20State::default();
        want.mint(preset.whale, preset.whale_balance);
        tokens.insert(preset.want, want);
        tokens.insert(preset.reward_token, Erc20State::default());

        let mut chain = Self {
            preset,
            state: Mutex::new(SimState {
                block: GENESIS_BLOCK,
                timestamp: GENESIS_TIMESTAMP,
                accounts,
                impersonated: HashSet::new(),
                local_signers: HashSet::new(),
                nonces: HashMap::new(),
                templates: Vec::new(),
                tokens,
                roles: HashMap::new(),
                controllers: HashMap::new(),
                strategies: HashMap::new(),
                jars: HashMap::new(),
                masterchefs: HashMap::new(),
            }),
        };

        for name in ["ControllerV4", "StrategyCurveAlusd3Crv", "PickleJarSymbiotic", "PickleToken", "MasterChef"] {
            if let Some(kind) = ContractKind::from_contract_name(name) {
                chain.register_template(Artifact::placeholder(name).bytecode, kind);
            }
        }
        chain
    }

    /// Preset from the vault config, plus placeholder templates for every
    /// configured artifact name
    pub fn from_config(config: &HarnessConfig) -> Self {
        let mut chain = Self::new(FarmPreset::from_config(config));
        let names = [
            (&config.vault.controller_artifact, ContractKind::Controller),
            (&config.vault.strategy_artifact, ContractKind::Strategy),
            (&config.vault.jar_artifact, ContractKind::Jar),
            (&config.deployment.token.artifact, ContractKind::PickleToken),
            (&config.deployment.masterchef.artifact, ContractKind::MasterChef),
        ];
        for (name, kind) in names {
            chain.register_template(Artifact::placeholder(name).bytecode, kind);
        }
        chain
    }

    /// Treat creation data starting with `bytecode` as a `kind` contract
    pub fn register_template(&mut self, bytecode: Bytes, kind: ContractKind) {
        if let Ok(state) = self.state.get_mut() {
            if !state.templates.iter().any(|(code, _)| *code == bytecode) {
                state.templates.push((bytecode, kind));
            }
        }
    }

    pub fn preset(&self) -> &FarmPreset {
        &self.preset
    }

    /// Seed an ERC-20 balance out of thin air (fork cheat)
    pub fn mint(&self, token: Address, to: Address, amount: U256) -> ChainResult<()> {
        let mut state = self.lock()?;
        state.tokens.entry(token).or_default().mint(to, amount);
        Ok(())
    }

    fn lock(&self) -> ChainResult<MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| ChainError::Transport("simulated chain state poisoned".to_string()))
    }
}

#[async_trait]
impl Chain for SimulatedChain {
    async fn chain_id(&self) -> ChainResult<u64> {
        Ok(CHAIN_ID)
    }

    async fn accounts(&self) -> ChainResult<Vec<Address>> {
        Ok(self.lock()?.accounts.clone())
    }

    async fn block_number(&self) -> ChainResult<u64> {
        Ok(self.lock()?.block)
    }

    async fn timestamp(&self) -> ChainResult<u64> {
        Ok(self.lock()?.timestamp)
    }

    async fn call(&self, to: Address, data: Bytes) -> ChainResult<Bytes> {
        let state = self.lock()?;
        state
            .view(&self.preset, to, &data)
            .map(Bytes::from)
            .map_err(ChainError::reverted)
    }

    async fn send_transaction(&self, tx: TxRequest) -> ChainResult<TxReceipt> {
        let mut state = self.lock()?;
        if !state.can_send(tx.from) {
            return Err(ChainError::UnknownSigner(tx.from));
        }

        let nonce = state.nonces.get(&tx.from).copied().unwrap_or_default();
        let mut hash_input = tx.from.to_vec();
        hash_input.extend_from_slice(&nonce.to_be_bytes());
        let tx_hash = keccak256(hash_input);

        let snapshot = state.clone();
        state.nonces.insert(tx.from, nonce + 1);
        state.block += 1;

        let outcome = match tx.to {
            None => state.create(tx.from, nonce, &tx.data).map(Some),
            Some(to) => state.execute(&self.preset, tx.from, to, &tx.data).map(|_| None),
        };

        match outcome {
            Ok(contract_address) => {
                debug!("simulated tx {} from {} mined in block {}", tx_hash, tx.from, state.block);
                Ok(TxReceipt {
                    tx_hash,
                    block_number: state.block,
                    gas_used: 21_000,
                    contract_address,
                    success: true,
                })
            }
            Err(reason) => {
                *state = snapshot;
                Err(ChainError::Reverted {
                    tx_hash: Some(tx_hash),
                    reason,
                })
            }
        }
    }

    async fn impersonate(&self, account: Address) -> ChainResult<()> {
        self.lock()?.impersonated.insert(account);
        Ok(())
    }

    async fn add_signer(&self, signer: PrivateKeySigner) -> ChainResult<Address> {
        let address = signer.address();
        self.lock()?.local_signers.insert(address);
        Ok(address)
    }

    async fn increase_time(&self, seconds: u64) -> ChainResult<u64> {
        let mut state = self.lock()?;
        state.timestamp += seconds;
        state.block += 1;
        Ok(seconds)
    }

    async fn mine(&self) -> ChainResult<()> {
        self.lock()?.block += 1;
        Ok(())
    }
}

fn decode<C: SolCall>(data: &[u8]) -> Result<C, Revert> {
    C::abi_decode(data).map_err(|e| format!("bad calldata for {}: {}", C::SIGNATURE, e))
}

fn selector(data: &[u8]) -> Result<[u8; 4], Revert> {
    data.get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| "calldata shorter than a selector".to_string())
}

fn acc_precision() -> U256 {
    U256::from(ACC_PRECISION)
}

impl SimState {
    fn can_send(&self, from: Address) -> bool {
        self.accounts.contains(&from) || self.impersonated.contains(&from) || self.local_signers.contains(&from)
    }

    fn create(&mut self, from: Address, nonce: u64, data: &[u8]) -> Result<Address, Revert> {
        let (bytecode_len, kind) = self
            .templates
            .iter()
            .find(|(code, _)| data.starts_with(code))
            .map(|(code, kind)| (code.len(), *kind))
            .ok_or_else(|| "simulated chain cannot execute unrecognised bytecode".to_string())?;
        let args = &data[bytecode_len..];
        let address = from.create(nonce);

        match kind {
            ContractKind::Controller => {
                let (governance, strategist, _timelock, _devfund, treasury) =
                    <(Address, Address, Address, Address, Address)>::abi_decode_params(args)
                        .map_err(|e| format!("ControllerV4 constructor: {}", e))?;
                self.controllers.insert(
                    address,
                    ControllerState {
                        governance,
                        strategist,
                        treasury,
                        jars: HashMap::new(),
                        strategies: HashMap::new(),
                        approved: HashSet::new(),
                    },
                );
            }
            ContractKind::Strategy => {
                let (governance, strategist, controller, _timelock) =
                    <(Address, Address, Address, Address)>::abi_decode_params(args)
                        .map_err(|e| format!("strategy constructor: {}", e))?;
                self.strategies.insert(
                    address,
                    StrategyState {
                        governance,
                        strategist,
                        controller,
                        pool: U256::ZERO,
                        keep_alcx: U256::ZERO,
                        base_pending: U256::ZERO,
                        alcx_pending: U256::ZERO,
                        last_accrual: self.timestamp,
                    },
                );
            }
            ContractKind::Jar => {
                let (want, reward, _governance, _timelock, controller) =
                    <(Address, Address, Address, Address, Address)>::abi_decode_params(args)
                        .map_err(|e| format!("jar constructor: {}", e))?;
                self.jars.insert(
                    address,
                    JarState {
                        want,
                        reward,
                        controller,
                        shares: Erc20State::default(),
                        acc_reward_per_share: U256::ZERO,
                        reward_debt: HashMap::new(),
                    },
                );
            }
            ContractKind::PickleToken => {
                let (_name, _symbol, _decimals, _child_chain_manager, minter) =
                    <(String, String, U256, Address, Address)>::abi_decode_params(args)
                        .map_err(|e| format!("PickleToken constructor: {}", e))?;
                self.tokens.insert(address, Erc20State::default());
                self.roles
                    .entry(address)
                    .or_default()
                    .entry(DEFAULT_ADMIN_ROLE)
                    .or_default()
                    .insert(minter);
            }
            ContractKind::MasterChef => {
                let (pickle, devaddr, pickle_per_block, start_block, bonus_end_block) =
                    <(Address, Address, U256, U256, U256)>::abi_decode_params(args)
                        .map_err(|e| format!("MasterChef constructor: {}", e))?;
                self.masterchefs.insert(
                    address,
                    MasterChefState {
                        pickle,
                        devaddr,
                        pickle_per_block,
                        start_block,
                        bonus_end_block,
                    },
                );
            }
        }

        Ok(address)
    }

    fn execute(&mut self, preset: &FarmPreset, from: Address, to: Address, data: &[u8]) -> Result<(), Revert> {
        let selector = selector(data)?;

        if self.roles.contains_key(&to) && selector == IPickleToken::grantRoleCall::SELECTOR {
            let call = decode::<IPickleToken::grantRoleCall>(data)?;
            return self.grant_role(to, from, call.role, call.account);
        }
        if self.tokens.contains_key(&to) {
            return self.execute_erc20(from, to, selector, data);
        }
        if self.controllers.contains_key(&to) {
            return self.execute_controller(preset, from, to, selector, data);
        }
        if self.strategies.contains_key(&to) {
            return self.execute_strategy(preset, from, to, selector, data);
        }
        if self.jars.contains_key(&to) {
            return self.execute_jar(preset, from, to, selector, data);
        }
        if self.masterchefs.contains_key(&to) {
            return Err("MasterChef: function not simulated".to_string());
        }
        Err(format!("no contract at {}", to))
    }

    fn execute_erc20(&mut self, from: Address, to: Address, selector: [u8; 4], data: &[u8]) -> Result<(), Revert> {
        let token = self.tokens.get_mut(&to).ok_or("no token")?;

        if selector == IERC20::transferCall::SELECTOR {
            let call = decode::<IERC20::transferCall>(data)?;
            token.transfer(from, call.to, call.amount)
        } else if selector == IERC20::approveCall::SELECTOR {
            let call = decode::<IERC20::approveCall>(data)?;
            token.allowances.insert((from, call.spender), call.amount);
            Ok(())
        } else if selector == IERC20::transferFromCall::SELECTOR {
            let call = decode::<IERC20::transferFromCall>(data)?;
            token.transfer_from(from, call.from, call.to, call.amount)
        } else {
            Err("ERC20: unknown function".to_string())
        }
    }

    fn grant_role(&mut self, token: Address, sender: Address, role: B256, account: Address) -> Result<(), Revert> {
        let roles = self.roles.entry(token).or_default();
        let is_admin = roles
            .get(&DEFAULT_ADMIN_ROLE)
            .is_some_and(|admins| admins.contains(&sender));
        if !is_admin {
            return Err("AccessControl: sender must be an admin to grant".to_string());
        }
        roles.entry(role).or_default().insert(account);
        Ok(())
    }

    fn execute_controller(
        &mut self,
        preset: &FarmPreset,
        from: Address,
        to: Address,
        selector: [u8; 4],
        data: &[u8],
    ) -> Result<(), Revert> {
        let controller = self.controllers.get_mut(&to).ok_or("no controller")?;
        let is_governance = from == controller.governance;
        let is_strategist = is_governance || from == controller.strategist;

        if selector == IControllerV4::setJarCall::SELECTOR {
            let call = decode::<IControllerV4::setJarCall>(data)?;
            if !is_strategist {
                return Err("!strategist".to_string());
            }
            if controller.jars.contains_key(&call.token) {
                return Err("jar".to_string());
            }
            controller.jars.insert(call.token, call.jar);
            Ok(())
        } else if selector == IControllerV4::approveStrategyCall::SELECTOR {
            let call = decode::<IControllerV4::approveStrategyCall>(data)?;
            if !is_governance {
                return Err("!governance".to_string());
            }
            controller.approved.insert((call.token, call.strategy));
            Ok(())
        } else if selector == IControllerV4::setStrategyCall::SELECTOR {
            let call = decode::<IControllerV4::setStrategyCall>(data)?;
            if !is_strategist {
                return Err("!strategist".to_string());
            }
            if !controller.approved.contains(&(call.token, call.strategy)) {
                return Err("!approved".to_string());
            }
            controller.strategies.insert(call.token, call.strategy);
            Ok(())
        } else if selector == IControllerV4::withdrawAllCall::SELECTOR {
            let call = decode::<IControllerV4::withdrawAllCall>(data)?;
            if !is_strategist {
                return Err("!strategist".to_string());
            }
            let strategy = controller.strategies.get(&call.token).copied().ok_or("!strategy")?;
            let jar = controller.jars.get(&call.token).copied().ok_or("!jar")?;
            self.realize(preset, strategy)?;
            let pool = self.strategies.get(&strategy).map(|s| s.pool).unwrap_or_default();
            self.pull_from_pool(preset, strategy, jar, pool)
        } else {
            Err("ControllerV4: unknown function".to_string())
        }
    }

    fn execute_strategy(
        &mut self,
        preset: &FarmPreset,
        from: Address,
        to: Address,
        selector: [u8; 4],
        data: &[u8],
    ) -> Result<(), Revert> {
        let strategy = self.strategies.get_mut(&to).ok_or("no strategy")?;

        if selector == IStrategyAlusd3Crv::harvestCall::SELECTOR {
            if from != strategy.governance && from != strategy.strategist {
                return Err("!authorized".to_string());
            }
            self.realize(preset, to)
        } else if selector == IStrategyAlusd3Crv::setKeepAlcxCall::SELECTOR {
            let call = decode::<IStrategyAlusd3Crv::setKeepAlcxCall>(data)?;
            if from != strategy.governance {
                return Err("!governance".to_string());
            }
            if call.keep > U256::from(MAX_BPS) {
                return Err("!keep".to_string());
            }
            strategy.keep_alcx = call.keep;
            Ok(())
        } else {
            Err("strategy: unknown function".to_string())
        }
    }

    fn execute_jar(
        &mut self,
        preset: &FarmPreset,
        from: Address,
        to: Address,
        selector: [u8; 4],
        data: &[u8],
    ) -> Result<(), Revert> {
        if selector == IPickleJar::depositCall::SELECTOR {
            let call = decode::<IPickleJar::depositCall>(data)?;
            self.jar_deposit(preset, to, from, call.amount)
        } else if selector == IPickleJar::withdrawAllCall::SELECTOR {
            self.jar_withdraw_all(preset, to, from)
        } else if selector == IPickleJar::earnCall::SELECTOR {
            self.jar_earn(preset, to)
        } else {
            Err("jar: unknown function".to_string())
        }
    }

    fn strategy_of_jar(&self, jar: Address) -> Option<Address> {
        let jar_state = self.jars.get(&jar)?;
        self.controllers
            .get(&jar_state.controller)?
            .strategies
            .get(&jar_state.want)
            .copied()
    }

    fn jar_of_strategy(&self, strategy: Address) -> Option<Address> {
        let controller = self.strategies.get(&strategy)?.controller;
        self.controllers.get(&controller)?.jars.get(&self.want_of_strategy(strategy)?).copied()
    }

    fn want_of_strategy(&self, strategy: Address) -> Option<Address> {
        let controller = self.strategies.get(&strategy)?.controller;
        self.controllers
            .get(&controller)?
            .strategies
            .iter()
            .find(|(_, s)| **s == strategy)
            .map(|(want, _)| *want)
    }

    fn token_mut(&mut self, token: Address) -> Result<&mut Erc20State, Revert> {
        self.tokens
            .get_mut(&token)
            .ok_or_else(|| format!("no token at {}", token))
    }

    fn token_balance(&self, token: Address, account: Address) -> U256 {
        self.tokens
            .get(&token)
            .map(|t| t.balance_of(account))
            .unwrap_or_default()
    }

    /// Pending farm rewards at `now` without mutating anything
    fn pending_farm_rewards(preset: &FarmPreset, strategy: &StrategyState, now: u64) -> (U256, U256) {
        let elapsed = U256::from(now.saturating_sub(strategy.last_accrual));
        let unit = U256::from(10u64).pow(U256::from(18u64));
        let base = strategy.pool * preset.base_rate * elapsed / unit;
        let alcx = strategy.pool * preset.alcx_rate * elapsed / unit;
        (strategy.base_pending + base, strategy.alcx_pending + alcx)
    }

    fn accrue(&mut self, preset: &FarmPreset, strategy: Address) -> Result<(), Revert> {
        let now = self.timestamp;
        let state = self.strategies.get_mut(&strategy).ok_or("no strategy")?;
        let (base, alcx) = Self::pending_farm_rewards(preset, state, now);
        state.base_pending = base;
        state.alcx_pending = alcx;
        state.last_accrual = now;
        Ok(())
    }

    /// Claim both farms into the strategy, pay the keep fee and credit the jar
    fn realize(&mut self, preset: &FarmPreset, strategy: Address) -> Result<(), Revert> {
        self.accrue(preset, strategy)?;

        let (harvested, keep, controller) = {
            let state = self.strategies.get_mut(&strategy).ok_or("no strategy")?;
            let harvested = state.base_pending + state.alcx_pending;
            state.base_pending = U256::ZERO;
            state.alcx_pending = U256::ZERO;
            (harvested, state.keep_alcx, state.controller)
        };
        if harvested.is_zero() {
            return Ok(());
        }

        let treasury = self
            .controllers
            .get(&controller)
            .map(|c| c.treasury)
            .ok_or("!controller")?;
        let fee = harvested * keep / U256::from(MAX_BPS);
        let reward = self.token_mut(preset.reward_token)?;
        reward.mint(strategy, harvested);
        reward.transfer(strategy, treasury, fee)?;

        if let Some(jar) = self.jar_of_strategy(strategy) {
            let jar_state = self.jars.get_mut(&jar).ok_or("no jar")?;
            if !jar_state.shares.total_supply.is_zero() {
                jar_state.acc_reward_per_share +=
                    (harvested - fee) * acc_precision() / jar_state.shares.total_supply;
            }
        }
        Ok(())
    }

    fn push_to_pool(&mut self, preset: &FarmPreset, jar: Address, strategy: Address) -> Result<(), Revert> {
        self.accrue(preset, strategy)?;
        let want = self.jars.get(&jar).map(|j| j.want).ok_or("no jar")?;
        let idle = self.token_balance(want, jar);
        if idle.is_zero() {
            return Ok(());
        }
        self.token_mut(want)?.transfer(jar, strategy, idle)?;
        if let Some(state) = self.strategies.get_mut(&strategy) {
            state.pool += idle;
        }
        Ok(())
    }

    fn pull_from_pool(&mut self, preset: &FarmPreset, strategy: Address, to: Address, amount: U256) -> Result<(), Revert> {
        if amount.is_zero() {
            return Ok(());
        }
        self.accrue(preset, strategy)?;
        let state = self.strategies.get_mut(&strategy).ok_or("no strategy")?;
        if state.pool < amount {
            return Err("strategy: insufficient pool balance".to_string());
        }
        state.pool -= amount;
        self.token_mut(preset.want)?.transfer(strategy, to, amount)
    }

    fn jar_total_want(&self, jar: Address) -> U256 {
        let Some(jar_state) = self.jars.get(&jar) else {
            return U256::ZERO;
        };
        let idle = self.token_balance(jar_state.want, jar);
        let pooled = self
            .strategy_of_jar(jar)
            .and_then(|s| self.strategies.get(&s))
            .map(|s| s.pool)
            .unwrap_or_default();
        idle + pooled
    }

    /// Pay `user` the reward accrued on their shares
    fn pay_pending_reward(&mut self, jar: Address, user: Address, strategy: Option<Address>) -> Result<(), Revert> {
        let jar_state = self.jars.get(&jar).ok_or("no jar")?;
        let accrued = jar_state.shares.balance_of(user) * jar_state.acc_reward_per_share / acc_precision();
        let debt = jar_state.reward_debt.get(&user).copied().unwrap_or_default();
        let pending = accrued.saturating_sub(debt);
        let reward_token = jar_state.reward;

        if let Some(strategy) = strategy {
            let available = self.token_balance(reward_token, strategy);
            let payout = pending.min(available);
            if !payout.is_zero() {
                self.token_mut(reward_token)?.transfer(strategy, user, payout)?;
            }
        }
        Ok(())
    }

    fn settle_debt(&mut self, jar: Address, user: Address) -> Result<(), Revert> {
        let jar_state = self.jars.get_mut(&jar).ok_or("no jar")?;
        let debt = jar_state.shares.balance_of(user) * jar_state.acc_reward_per_share / acc_precision();
        jar_state.reward_debt.insert(user, debt);
        Ok(())
    }

    fn jar_deposit(&mut self, preset: &FarmPreset, jar: Address, user: Address, amount: U256) -> Result<(), Revert> {
        let strategy = self.strategy_of_jar(jar);
        if let Some(strategy) = strategy {
            self.realize(preset, strategy)?;
        }
        self.pay_pending_reward(jar, user, strategy)?;

        let total_before = self.jar_total_want(jar);
        let want = self.jars.get(&jar).map(|j| j.want).ok_or("no jar")?;
        self.token_mut(want)?.transfer_from(jar, user, jar, amount)?;

        let jar_state = self.jars.get_mut(&jar).ok_or("no jar")?;
        let supply = jar_state.shares.total_supply;
        let shares = if supply.is_zero() || total_before.is_zero() {
            amount
        } else {
            amount * supply / total_before
        };
        jar_state.shares.mint(user, shares);
        self.settle_debt(jar, user)?;

        if let Some(strategy) = strategy {
            self.push_to_pool(preset, jar, strategy)?;
        }
        Ok(())
    }

    fn jar_withdraw_all(&mut self, preset: &FarmPreset, jar: Address, user: Address) -> Result<(), Revert> {
        let strategy = self.strategy_of_jar(jar);
        if let Some(strategy) = strategy {
            self.realize(preset, strategy)?;
        }
        self.pay_pending_reward(jar, user, strategy)?;

        let (shares, supply, want) = {
            let jar_state = self.jars.get(&jar).ok_or("no jar")?;
            (jar_state.shares.balance_of(user), jar_state.shares.total_supply, jar_state.want)
        };
        if shares.is_zero() {
            return self.settle_debt(jar, user);
        }

        let owed = self.jar_total_want(jar) * shares / supply;
        let idle = self.token_balance(want, jar);
        if owed > idle {
            let strategy = strategy.ok_or("!strategy")?;
            self.pull_from_pool(preset, strategy, jar, owed - idle)?;
        }

        let jar_state = self.jars.get_mut(&jar).ok_or("no jar")?;
        jar_state.shares.balances.insert(user, U256::ZERO);
        jar_state.shares.total_supply -= shares;
        jar_state.reward_debt.insert(user, U256::ZERO);

        self.token_mut(want)?.transfer(jar, user, owed)
    }

    fn jar_earn(&mut self, preset: &FarmPreset, jar: Address) -> Result<(), Revert> {
        match self.strategy_of_jar(jar) {
            Some(strategy) => self.push_to_pool(preset, jar, strategy),
            None => Err("!strategy".to_string()),
        }
    }

    fn view(&self, preset: &FarmPreset, to: Address, data: &[u8]) -> Result<Vec<u8>, Revert> {
        let selector = selector(data)?;

        if let Some(roles) = self.roles.get(&to) {
            if selector == IPickleToken::hasRoleCall::SELECTOR {
                let call = decode::<IPickleToken::hasRoleCall>(data)?;
                let granted = roles.get(&call.role).is_some_and(|members| members.contains(&call.account));
                return Ok(granted.abi_encode());
            }
        }

        if let Some(token) = self.tokens.get(&to) {
            if selector == IERC20::balanceOfCall::SELECTOR {
                let call = decode::<IERC20::balanceOfCall>(data)?;
                return Ok(token.balance_of(call.account).abi_encode());
            } else if selector == IERC20::totalSupplyCall::SELECTOR {
                return Ok(token.total_supply.abi_encode());
            } else if selector == IERC20::allowanceCall::SELECTOR {
                let call = decode::<IERC20::allowanceCall>(data)?;
                let allowance = token.allowances.get(&(call.owner, call.spender)).copied().unwrap_or_default();
                return Ok(allowance.abi_encode());
            }
            return Err("ERC20: unknown view".to_string());
        }

        if let Some(controller) = self.controllers.get(&to) {
            if selector == IControllerV4::jarsCall::SELECTOR {
                let call = decode::<IControllerV4::jarsCall>(data)?;
                return Ok(controller.jars.get(&call.token).copied().unwrap_or_default().abi_encode());
            } else if selector == IControllerV4::strategiesCall::SELECTOR {
                let call = decode::<IControllerV4::strategiesCall>(data)?;
                return Ok(controller.strategies.get(&call.token).copied().unwrap_or_default().abi_encode());
            }
            return Err("ControllerV4: unknown view".to_string());
        }

        if let Some(strategy) = self.strategies.get(&to) {
            let (base, alcx) = Self::pending_farm_rewards(preset, strategy, self.timestamp);
            let value = if selector == IStrategyAlusd3Crv::balanceOfPoolCall::SELECTOR {
                strategy.pool
            } else if selector == IStrategyAlusd3Crv::getHarvestableCall::SELECTOR {
                base
            } else if selector == IStrategyAlusd3Crv::getAlcxFarmHarvestableCall::SELECTOR {
                alcx
            } else if selector == IStrategyAlusd3Crv::pendingRewardCall::SELECTOR {
                self.token_balance(preset.reward_token, to)
            } else {
                return Err("strategy: unknown view".to_string());
            };
            return Ok(value.abi_encode());
        }

        if let Some(jar) = self.jars.get(&to) {
            if selector == IPickleJar::balanceOfCall::SELECTOR {
                let call = decode::<IPickleJar::balanceOfCall>(data)?;
                return Ok(jar.shares.balance_of(call.account).abi_encode());
            } else if selector == IPickleJar::totalSupplyCall::SELECTOR {
                return Ok(jar.shares.total_supply.abi_encode());
            }
            return Err("jar: unknown view".to_string());
        }

        if let Some(chef) = self.masterchefs.get(&to) {
            let encoded = if selector == IMasterChef::pickleCall::SELECTOR {
                chef.pickle.abi_encode()
            } else if selector == IMasterChef::devaddrCall::SELECTOR {
                chef.devaddr.abi_encode()
            } else if selector == IMasterChef::picklePerBlockCall::SELECTOR {
                chef.pickle_per_block.abi_encode()
            } else if selector == IMasterChef::startBlockCall::SELECTOR {
                chef.start_block.abi_encode()
            } else if selector == IMasterChef::bonusEndBlockCall::SELECTOR {
                chef.bonus_end_block.abi_encode()
            } else {
                return Err("MasterChef: unknown view".to_string());
            };
            return Ok(encoded);
        }

        Ok(Vec::new())
    }
}
