// Lifecycle Orchestrator: provisions the controller / strategy / jar triple and
// drives participants through fund, deposit, harvest and withdraw.
//
// Steps run strictly one after another; each transaction is confirmed before the
// next is sent, and the chain clock is only moved from here.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolValue;
use tracing::{debug, error, info};

use crate::chains::{Chain, ChainError, ChainResult};
use crate::config::VaultConfig;
use crate::contracts::{ArtifactStore, Controller, Erc20, Jar, Strategy};
use crate::error::{HarnessError, HarnessResult};
use crate::metrics::HarnessMetrics;
use crate::report::{ContractRecord, RunReport, StepRecord};

pub mod participant;

pub use participant::{Participant, ParticipantAction, ParticipantSpec, ParticipantState, TimeCursor};

/// Administrative accounts of the vault
#[derive(Debug, Clone, Copy)]
pub struct Roles {
    /// Also strategist and timelock
    pub governance: Address,
    pub devfund: Address,
    pub treasury: Address,
}

/// Handles to a provisioned vault
#[derive(Clone)]
pub struct Vault {
    pub controller: Controller,
    pub strategy: Strategy,
    pub jar: Jar,
    pub want: Erc20,
    pub reward: Erc20,
}

pub struct LifecycleOrchestrator {
    chain: Arc<dyn Chain>,
    config: VaultConfig,
    artifacts: ArtifactStore,
    metrics: Option<Arc<HarnessMetrics>>,
    roles: Roles,
    participants: Vec<Participant>,
    vault: Option<Vault>,
    cursor: TimeCursor,
    report: RunReport,
}

impl LifecycleOrchestrator {
    /// Bind roles and participants to the node's accounts
    pub async fn new(
        chain: Arc<dyn Chain>,
        config: VaultConfig,
        artifacts: ArtifactStore,
        participants: &[ParticipantSpec],
        scenario: &str,
    ) -> HarnessResult<Self> {
        let accounts = chain.accounts().await?;
        let account = |index: usize, what: &str| {
            accounts.get(index).copied().ok_or_else(|| {
                HarnessError::Setup(format!(
                    "{} needs account #{} but the node has {} accounts",
                    what,
                    index,
                    accounts.len()
                ))
            })
        };

        let roles = Roles {
            governance: account(config.roles.governance, "governance")?,
            devfund: account(config.roles.devfund, "devfund")?,
            treasury: account(config.roles.treasury, "treasury")?,
        };

        let mut bound = Vec::with_capacity(participants.len());
        for spec in participants {
            if bound.iter().any(|p: &Participant| p.name == spec.name) {
                return Err(HarnessError::Setup(format!("participant '{}' declared twice", spec.name)));
            }
            bound.push(Participant::new(spec.name.clone(), account(spec.account, &spec.name)?));
        }

        let chain_id = chain.chain_id().await?;

        Ok(Self {
            chain,
            config,
            artifacts,
            metrics: None,
            roles,
            participants: bound,
            vault: None,
            cursor: TimeCursor::default(),
            report: RunReport::new(scenario, chain_id),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<HarnessMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn roles(&self) -> Roles {
        self.roles
    }

    pub fn cursor(&self) -> TimeCursor {
        self.cursor
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, name: &str) -> HarnessResult<&Participant> {
        self.participants
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| HarnessError::UnknownParticipant(name.to_string()))
    }

    pub fn vault(&self) -> HarnessResult<&Vault> {
        self.vault
            .as_ref()
            .ok_or_else(|| HarnessError::Setup("vault has not been provisioned".to_string()))
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Close the report with the run's outcome
    pub fn finish(&mut self, error: Option<&HarnessError>) -> RunReport {
        self.report.finish(self.cursor.elapsed(), error.map(|e| e.to_string()));
        self.report.clone()
    }

    /// Deploy (or attach to) controller, strategy and jar, wire them together
    /// from governance and unlock the whale
    pub async fn provision(&mut self) -> HarnessResult<&Vault> {
        let governance = self.roles.governance;
        let existing = self.config.existing.clone();

        let controller = match existing.controller {
            Some(address) => address,
            None => {
                let args = (governance, governance, governance, self.roles.devfund, self.roles.treasury)
                    .abi_encode_params();
                self.deploy(&self.config.controller_artifact, &args).await?
            }
        };
        info!("controller is deployed at {}", controller);

        let strategy = match existing.strategy {
            Some(address) => address,
            None => {
                let args = (governance, governance, controller, governance).abi_encode_params();
                self.deploy(&self.config.strategy_artifact, &args).await?
            }
        };
        info!("strategy is deployed at {}", strategy);

        let jar = match existing.jar {
            Some(address) => address,
            None => {
                let args = (self.config.want, self.config.reward_token, governance, governance, controller)
                    .abi_encode_params();
                self.deploy(&self.config.jar_artifact, &args).await?
            }
        };
        info!("pickle jar is deployed at {}", jar);

        let vault = Vault {
            controller: Controller::attach(self.chain.clone(), controller),
            strategy: Strategy::attach(self.chain.clone(), strategy),
            jar: Jar::attach(self.chain.clone(), jar),
            want: Erc20::attach(self.chain.clone(), "want", self.config.want),
            reward: Erc20::attach(self.chain.clone(), "reward", self.config.reward_token),
        };

        let want = self.config.want;
        let mut step = StepRecord::new(self.report.steps.len(), "provision", None);

        // Attached vaults may already be wired; setJar reverts on a second call
        if vault.controller.jar_for(want).await? != jar {
            let receipt = self.submit("setJar", vault.controller.set_jar(governance, want, jar)).await?;
            step.tx_hashes.push(receipt.tx_hash);
        }
        if vault.controller.strategy_for(want).await? != strategy {
            let receipt = self
                .submit("approveStrategy", vault.controller.approve_strategy(governance, want, strategy))
                .await?;
            step.tx_hashes.push(receipt.tx_hash);
            let receipt = self
                .submit("setStrategy", vault.controller.set_strategy(governance, want, strategy))
                .await?;
            step.tx_hashes.push(receipt.tx_hash);
        }
        let keep = U256::from(self.config.keep_alcx);
        let receipt = self
            .submit("setKeepAlcx", vault.strategy.set_keep_alcx(governance, keep))
            .await?;
        step.tx_hashes.push(receipt.tx_hash);

        self.chain.impersonate(self.config.whale).await?;
        debug!("impersonating whale {}", self.config.whale);

        self.report.contracts = [
            vault.controller.handle(),
            vault.strategy.handle(),
            vault.jar.handle(),
            vault.want.handle(),
            vault.reward.handle(),
        ]
        .into_iter()
        .map(ContractRecord::from)
        .collect();
        self.push_step(step);

        let vault = self.vault.insert(vault);
        Ok(&*vault)
    }

    /// Transfer `amount` of want from the whale and require the participant to
    /// hold exactly `amount` afterwards
    pub async fn fund(&mut self, name: &str, amount: U256) -> HarnessResult<()> {
        let vault = self.vault()?.clone();
        let (address, next) = self.check(name, ParticipantAction::Fund)?;

        let before = vault.want.balance_of(address).await?;
        let receipt = self
            .submit("fund", vault.want.transfer(self.config.whale, address, amount))
            .await?;
        let after = vault.want.balance_of(address).await?;

        if after != amount {
            return Err(HarnessError::Assertion(format!(
                "{} want balance is {} after funding {} (was {})",
                name, after, amount, before
            )));
        }
        info!("{} funded with {} want", name, amount);

        self.set_state(name, next);
        let mut step = StepRecord::new(self.report.steps.len(), "fund", Some(name));
        step.tx_hashes.push(receipt.tx_hash);
        step.amount = Some(amount);
        self.push_step(step);
        Ok(())
    }

    /// Approve the jar and deposit `amount` (the full want balance when `None`)
    pub async fn deposit(&mut self, name: &str, amount: Option<U256>) -> HarnessResult<U256> {
        let vault = self.vault()?.clone();
        let (address, next) = self.check(name, ParticipantAction::Deposit)?;

        let amount = match amount {
            Some(amount) => amount,
            None => vault.want.balance_of(address).await?,
        };

        let approve = self
            .submit("approve", vault.want.approve(address, vault.jar.address(), amount))
            .await?;
        let allowance = vault.want.allowance(address, vault.jar.address()).await?;
        if allowance < amount {
            return Err(HarnessError::Assertion(format!(
                "{} jar allowance is {} after approving {}",
                name, allowance, amount
            )));
        }
        let deposit = self.submit("deposit", vault.jar.deposit(address, amount)).await?;

        let shares = vault.jar.balance_of(address).await?;
        info!("{} pToken balance {}", name, shares);

        self.set_state(name, next);
        let mut step = StepRecord::new(self.report.steps.len(), "deposit", Some(name));
        step.tx_hashes = vec![approve.tx_hash, deposit.tx_hash];
        step.amount = Some(amount);
        self.push_step(step);
        Ok(shares)
    }

    /// Ask the jar to push idle want into the strategy
    pub async fn earn(&mut self, name: &str) -> HarnessResult<()> {
        let vault = self.vault()?.clone();
        let address = self.participant(name)?.address;

        let receipt = self.submit("earn", vault.jar.earn(address)).await?;
        info!("strategy pool after earn {}", vault.strategy.balance_of_pool().await?);

        let mut step = StepRecord::new(self.report.steps.len(), "earn", Some(name));
        step.tx_hashes.push(receipt.tx_hash);
        self.push_step(step);
        Ok(())
    }

    /// Move the chain clock forward by `duration`
    pub async fn advance_time(&mut self, duration: Duration) -> HarnessResult<u64> {
        let elapsed = self.advance_clock(duration).await?;
        let step = StepRecord::new(self.report.steps.len(), "advance_time", None);
        self.push_step(step);
        Ok(elapsed)
    }

    /// One harvest cycle: for every configured window, advance the clock, log the
    /// pool and both farms' harvestable rewards, then harvest from governance
    pub async fn harvest(&mut self) -> HarnessResult<()> {
        let vault = self.vault()?.clone();
        let windows = self.config.harvest_windows.clone();
        let mut step = StepRecord::new(self.report.steps.len(), "harvest", None);

        for (round, window) in windows.into_iter().enumerate() {
            self.advance_clock(window).await?;

            info!("deposited amount of strategy {}", vault.strategy.balance_of_pool().await?);
            info!(
                "harvest #{}: Alusd3Crv farm harvestable {}, ALCX farm harvestable {}",
                round + 1,
                vault.strategy.harvestable().await?,
                vault.strategy.alcx_farm_harvestable().await?
            );

            let receipt = self
                .submit("harvest", vault.strategy.harvest(self.roles.governance))
                .await?;
            if let Some(metrics) = &self.metrics {
                metrics.harvests.inc();
            }
            step.tx_hashes.push(receipt.tx_hash);
        }

        self.push_step(step);
        Ok(())
    }

    /// Withdraw all shares, and when `expect_reward_increase` is set require the
    /// participant's reward balance to strictly grow
    pub async fn withdraw_all(&mut self, name: &str, expect_reward_increase: bool) -> HarnessResult<(U256, U256)> {
        let vault = self.vault()?.clone();
        let (address, next) = self.check(name, ParticipantAction::WithdrawAll)?;

        info!(
            "reward balance of strategy {}",
            vault.reward.balance_of(vault.strategy.address()).await?
        );
        let before = vault.reward.balance_of(address).await?;
        info!("{} reward balance before {}", name, before);

        let receipt = self.submit("withdrawAll", vault.jar.withdraw_all(address)).await?;

        let after = vault.reward.balance_of(address).await?;
        info!("{} reward balance after {}", name, after);

        let mut step = StepRecord::new(self.report.steps.len(), "withdraw_all", Some(name));
        step.tx_hashes.push(receipt.tx_hash);
        step.reward_before = Some(before);
        step.reward_after = Some(after);
        // mined even when the growth check below fails
        self.push_step(step);

        if expect_reward_increase && after <= before {
            return Err(HarnessError::Assertion(format!(
                "{} reward did not increase on withdrawal ({} -> {})",
                name, before, after
            )));
        }
        info!("pending reward after withdrawal {}", vault.strategy.pending_reward().await?);

        self.set_state(name, next);
        Ok((before, after))
    }

    /// Governance pulls all want out of the strategy back into the jar
    pub async fn controller_withdraw_all(&mut self) -> HarnessResult<U256> {
        let vault = self.vault()?.clone();
        let jar = vault.jar.address();

        let before = vault.want.balance_of(jar).await?;
        let receipt = self
            .submit(
                "controller.withdrawAll",
                vault.controller.withdraw_all(self.roles.governance, vault.want.address()),
            )
            .await?;
        let after = vault.want.balance_of(jar).await?;
        info!("jar want balance {} -> {}", before, after);

        let mut step = StepRecord::new(self.report.steps.len(), "controller_withdraw_all", None);
        step.tx_hashes.push(receipt.tx_hash);
        step.amount = Some(after.saturating_sub(before));
        self.push_step(step);
        Ok(after)
    }

    async fn deploy(&self, artifact: &str, args: &[u8]) -> HarnessResult<Address> {
        let artifact = self.artifacts.load(artifact)?;
        let (address, _) = self
            .submit(
                "deploy",
                artifact.deploy(self.chain.as_ref(), self.roles.governance, args),
            )
            .await?;
        Ok(address)
    }

    async fn advance_clock(&mut self, duration: Duration) -> HarnessResult<u64> {
        let applied = self.chain.increase_time(duration.as_secs()).await?;
        let elapsed = self.cursor.advance(applied);
        if let Some(metrics) = &self.metrics {
            metrics.time_advanced_seconds.inc_by(applied as f64);
        }
        debug!("clock advanced {}s (total {}s)", applied, elapsed);
        Ok(elapsed)
    }

    fn check(&self, name: &str, action: ParticipantAction) -> HarnessResult<(Address, ParticipantState)> {
        let participant = self.participant(name)?;
        Ok((participant.address, participant.check(action)?))
    }

    fn set_state(&mut self, name: &str, state: ParticipantState) {
        if let Some(participant) = self.participants.iter_mut().find(|p| p.name == name) {
            participant.state = state;
        }
    }

    fn push_step(&mut self, mut step: StepRecord) {
        step.elapsed_seconds = self.cursor.elapsed();
        self.report.steps.push(step);
    }

    /// Await one chain transaction, keeping metrics and logging failures
    async fn submit<T, F>(&self, what: &str, operation: F) -> HarnessResult<T>
    where
        F: Future<Output = ChainResult<T>>,
    {
        let started = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.transactions_submitted.inc();
        }

        match operation.await {
            Ok(value) => {
                if let Some(metrics) = &self.metrics {
                    metrics.tx_duration.observe(started.elapsed().as_secs_f64());
                }
                Ok(value)
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    match e {
                        ChainError::Reverted { .. } => metrics.transactions_reverted.inc(),
                        _ => metrics.rpc_errors.inc(),
                    }
                }
                error!("{} failed: {}", what, e);
                Err(e.into())
            }
        }
    }
}
