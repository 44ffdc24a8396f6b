// Deployment flow: PickleToken, MasterChef, admin role hand-over.
// Each step is a single transaction; the first failure aborts the flow.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolValue;
use tracing::info;

use crate::chains::Chain;
use crate::config::{DeployStep, DeploymentConfig};
use crate::contracts::artifact::contract_name;
use crate::contracts::{ArtifactStore, ContractHandle, PickleToken};
use crate::error::{HarnessError, HarnessResult};
use crate::keystore::KeyManager;

/// Addresses produced by a deployment run
#[derive(Debug, Default, Clone)]
pub struct DeploymentOutcome {
    pub pickle_token: Option<ContractHandle>,
    pub master_chef: Option<ContractHandle>,
    /// Admin that granted the role during hand-over
    pub granted_by: Option<Address>,
}

pub struct Deployer {
    chain: Arc<dyn Chain>,
    artifacts: ArtifactStore,
    config: DeploymentConfig,
    deployer: Address,
    outcome: DeploymentOutcome,
}

impl Deployer {
    /// Resolve the deployer account (`deployer_index` of the node's accounts)
    pub async fn new(
        chain: Arc<dyn Chain>,
        artifacts: ArtifactStore,
        config: DeploymentConfig,
    ) -> HarnessResult<Self> {
        let accounts = chain.accounts().await?;
        let deployer = accounts.get(config.deployer_index).copied().ok_or_else(|| {
            HarnessError::Setup(format!(
                "deployer index {} out of range ({} accounts)",
                config.deployer_index,
                accounts.len()
            ))
        })?;

        Ok(Self {
            chain,
            artifacts,
            config,
            deployer,
            outcome: DeploymentOutcome::default(),
        })
    }

    pub fn deployer(&self) -> Address {
        self.deployer
    }

    pub fn outcome(&self) -> &DeploymentOutcome {
        &self.outcome
    }

    /// Run `steps` in order
    pub async fn run(
        &mut self,
        steps: &[DeployStep],
        keys: &mut KeyManager,
        password: Option<&str>,
    ) -> HarnessResult<DeploymentOutcome> {
        for step in steps {
            match step {
                DeployStep::Token => {
                    self.deploy_pickle_token().await?;
                }
                DeployStep::Masterchef => {
                    self.deploy_master_chef().await?;
                }
                DeployStep::Handover => {
                    self.hand_over_perms_to_master_chef(keys, password).await?;
                }
            }
        }
        Ok(self.outcome.clone())
    }

    pub async fn deploy_pickle_token(&mut self) -> HarnessResult<ContractHandle> {
        let token = &self.config.token;
        let artifact = self.artifacts.load(&token.artifact)?;
        let args = (
            token.name.clone(),
            token.symbol.clone(),
            U256::from(token.decimals),
            token.child_chain_manager,
            token.minter,
        )
            .abi_encode_params();

        let (address, _) = artifact.deploy(self.chain.as_ref(), self.deployer, &args).await?;
        info!("pickle token deployed at {}", address);

        let handle = ContractHandle {
            name: "PickleToken",
            address,
        };
        self.outcome.pickle_token = Some(handle);
        Ok(handle)
    }

    /// Uses the token deployed by this run when there is one, the configured
    /// `pickle` address otherwise
    pub async fn deploy_master_chef(&mut self) -> HarnessResult<ContractHandle> {
        let chef = &self.config.masterchef;
        let pickle = self
            .outcome
            .pickle_token
            .map(|handle| handle.address)
            .unwrap_or(chef.pickle);
        let artifact = self.artifacts.load(&chef.artifact)?;
        let args = (
            pickle,
            chef.devaddr,
            U256::from(chef.pickle_per_block),
            U256::from(chef.start_block),
            U256::from(chef.bonus_end_block),
        )
            .abi_encode_params();

        let (address, _) = artifact.deploy(self.chain.as_ref(), self.deployer, &args).await?;
        info!("{} deployed at {}", contract_name(&chef.artifact), address);

        let handle = ContractHandle {
            name: "MasterChef",
            address,
        };
        self.outcome.master_chef = Some(handle);
        Ok(handle)
    }

    /// Grant the configured role on the token to the MasterChef, signed with the
    /// previous admin's key. `password` unlocks it when it is not in the environment.
    pub async fn hand_over_perms_to_master_chef(
        &mut self,
        keys: &mut KeyManager,
        password: Option<&str>,
    ) -> HarnessResult<Address> {
        let handover = &self.config.handover;
        let pickle = self
            .outcome
            .pickle_token
            .map(|handle| handle.address)
            .unwrap_or(handover.pickle);
        let master_chef = self
            .outcome
            .master_chef
            .map(|handle| handle.address)
            .unwrap_or(handover.masterchef);

        let admin_key = keys.load_key(&handover.admin_key, password).await?;
        let admin = self.chain.add_signer(admin_key.signer()?).await?;

        let token = PickleToken::attach(self.chain.clone(), pickle);
        token.grant_role(admin, handover.role, master_chef).await?;
        info!("mint role granted! ({} -> {} by {})", handover.role, master_chef, admin);

        self.outcome.granted_by = Some(admin);
        Ok(admin)
    }
}
