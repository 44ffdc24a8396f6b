// Deployment flow against the in-memory fork: token, MasterChef and the
// admin role hand-over signed with a keystore key
use std::sync::Arc;

use alloy::primitives::{address, keccak256, Address};
use pickle_harness::chains::{Chain, SimulatedChain};
use pickle_harness::config::{DeployStep, HarnessConfig};
use pickle_harness::contracts::{ArtifactStore, MasterChef, PickleToken, DEFAULT_ADMIN_ROLE};
use pickle_harness::deploy::Deployer;
use pickle_harness::error::HarnessError;
use pickle_harness::keystore::{EvmKey, KeyManager, KeyManagerConfig, MemoryKeyStorage};

const ADMIN_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const ADMIN: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

fn deploy_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.artifacts.placeholder = true;
    config.deployment.token.minter = ADMIN;
    config
}

async fn key_manager(key_id: &str, password: &str) -> KeyManager {
    let config = KeyManagerConfig {
        allow_env_keys: false,
        ..KeyManagerConfig::default()
    };
    let mut keys = KeyManager::with_storage(config, Box::new(MemoryKeyStorage::new()));
    let key = EvmKey::from_env_string(ADMIN_KEY).unwrap();
    assert_eq!(key.address, ADMIN);
    keys.store_key(key_id, key, password).await.unwrap();
    keys
}

#[tokio::test]
async fn test_full_deployment_hands_admin_role_to_master_chef() {
    let config = deploy_config();
    let chain = Arc::new(SimulatedChain::from_config(&config));
    let mut keys = key_manager("prev-admin", "hunter2").await;

    let mut deployer = Deployer::new(chain.clone(), ArtifactStore::Placeholder, config.deployment.clone())
        .await
        .unwrap();
    assert_eq!(deployer.deployer(), chain.accounts().await.unwrap()[0]);

    let outcome = deployer
        .run(
            &[DeployStep::Token, DeployStep::Masterchef, DeployStep::Handover],
            &mut keys,
            Some("hunter2"),
        )
        .await
        .unwrap();

    let token = outcome.pickle_token.unwrap();
    let chef = outcome.master_chef.unwrap();
    assert_eq!(outcome.granted_by, Some(ADMIN));
    assert_ne!(token.address, chef.address);

    // the MasterChef was built around the token from this run
    let master_chef = MasterChef::attach(chain.clone(), chef.address);
    assert_eq!(master_chef.pickle().await.unwrap(), token.address);
    assert_eq!(
        master_chef.pickle_per_block().await.unwrap(),
        alloy::primitives::U256::from(config.deployment.masterchef.pickle_per_block)
    );
    assert_eq!(
        master_chef.start_block().await.unwrap(),
        alloy::primitives::U256::from(config.deployment.masterchef.start_block)
    );

    let pickle = PickleToken::attach(chain.clone(), token.address);
    assert!(pickle.has_role(DEFAULT_ADMIN_ROLE, chef.address).await.unwrap());
    assert!(pickle.has_role(DEFAULT_ADMIN_ROLE, ADMIN).await.unwrap());
}

#[tokio::test]
async fn test_handover_of_custom_role() {
    let mut config = deploy_config();
    config.deployment.handover.role = keccak256("MINTER_ROLE");
    let chain = Arc::new(SimulatedChain::from_config(&config));
    let mut keys = key_manager("prev-admin", "pw").await;

    let mut deployer = Deployer::new(chain.clone(), ArtifactStore::Placeholder, config.deployment.clone())
        .await
        .unwrap();
    deployer.deploy_pickle_token().await.unwrap();
    deployer.deploy_master_chef().await.unwrap();
    deployer.hand_over_perms_to_master_chef(&mut keys, Some("pw")).await.unwrap();

    let outcome = deployer.outcome();
    let pickle = PickleToken::attach(chain.clone(), outcome.pickle_token.unwrap().address);
    let chef = outcome.master_chef.unwrap().address;
    assert!(pickle.has_role(keccak256("MINTER_ROLE"), chef).await.unwrap());
    assert!(!pickle.has_role(DEFAULT_ADMIN_ROLE, chef).await.unwrap());
}

#[tokio::test]
async fn test_handover_from_non_admin_reverts() {
    let mut config = deploy_config();
    // someone else holds the admin role
    config.deployment.token.minter = address!("aCfE4511CE883C14c4eA40563F176C3C09b4c47C");
    let chain = Arc::new(SimulatedChain::from_config(&config));
    let mut keys = key_manager("prev-admin", "pw").await;

    let mut deployer = Deployer::new(chain.clone(), ArtifactStore::Placeholder, config.deployment.clone())
        .await
        .unwrap();
    let err = deployer
        .run(
            &[DeployStep::Token, DeployStep::Masterchef, DeployStep::Handover],
            &mut keys,
            Some("pw"),
        )
        .await
        .unwrap_err();

    assert!(err.is_revert());
    assert!(err.to_string().contains("AccessControl: sender must be an admin to grant"));
    assert!(deployer.outcome().granted_by.is_none());
    // both contracts were deployed before the failing step
    assert!(deployer.outcome().master_chef.is_some());
}

#[tokio::test]
async fn test_handover_without_password_fails_before_sending() {
    let config = deploy_config();
    let chain = Arc::new(SimulatedChain::from_config(&config));
    let mut keys = key_manager("prev-admin", "pw").await;

    let mut deployer = Deployer::new(chain.clone(), ArtifactStore::Placeholder, config.deployment.clone())
        .await
        .unwrap();
    deployer.deploy_pickle_token().await.unwrap();
    let block = chain.block_number().await.unwrap();

    let err = deployer
        .hand_over_perms_to_master_chef(&mut keys, None)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Key(_)));
    assert_eq!(chain.block_number().await.unwrap(), block);
}

#[tokio::test]
async fn test_deployer_index_out_of_range() {
    let mut config = deploy_config();
    config.deployment.deployer_index = 42;
    let chain = Arc::new(SimulatedChain::from_config(&config));

    let result = Deployer::new(chain, ArtifactStore::Placeholder, config.deployment.clone()).await;
    assert!(matches!(result, Err(HarnessError::Setup(_))));
}
