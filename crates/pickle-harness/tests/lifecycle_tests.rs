// Vault lifecycle against the in-memory fork: funding, interleaved deposits,
// harvest cycles and reward growth on withdrawal
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use pickle_harness::chains::{Chain, ChainError, SimulatedChain};
use pickle_harness::config::HarnessConfig;
use pickle_harness::contracts::{to_wei, ArtifactStore, Erc20};
use pickle_harness::error::HarnessError;
use pickle_harness::metrics::HarnessMetrics;
use pickle_harness::orchestrator::{LifecycleOrchestrator, ParticipantSpec, ParticipantState};
use pickle_harness::scenario::{Scenario, ScenarioRunner, Step};

const DAY: u64 = 60 * 60 * 24;

fn simulated_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.artifacts.placeholder = true;
    config
}

async fn orchestrator() -> (Arc<SimulatedChain>, LifecycleOrchestrator) {
    let config = simulated_config();
    let chain = Arc::new(SimulatedChain::from_config(&config));
    let mut orchestrator = LifecycleOrchestrator::new(
        chain.clone(),
        config.vault.clone(),
        ArtifactStore::Placeholder,
        &ParticipantSpec::defaults(),
        "test",
    )
    .await
    .unwrap();
    orchestrator.provision().await.unwrap();
    (chain, orchestrator)
}

#[tokio::test]
async fn test_funding_is_exact() {
    let (_chain, mut orchestrator) = orchestrator().await;

    orchestrator.fund("alice", to_wei(2000, 18)).await.unwrap();
    orchestrator.fund("bob", to_wei(1000, 18)).await.unwrap();
    orchestrator.fund("john", to_wei(2500, 18)).await.unwrap();

    let want = orchestrator.vault().unwrap().want.clone();
    let expected = [("alice", 2000), ("bob", 1000), ("john", 2500)];
    for (name, units) in expected {
        let participant = orchestrator.participant(name).unwrap();
        assert_eq!(participant.state, ParticipantState::Funded);
        assert_eq!(want.balance_of(participant.address).await.unwrap(), to_wei(units, 18));
    }
}

#[tokio::test]
async fn test_participant_is_funded_once() {
    let (_chain, mut orchestrator) = orchestrator().await;
    let want = orchestrator.vault().unwrap().want.clone();
    let alice = orchestrator.participant("alice").unwrap().address;

    orchestrator.fund("alice", to_wei(2000, 18)).await.unwrap();
    let steps_before = orchestrator.report().steps.len();

    let err = orchestrator.fund("alice", to_wei(500, 18)).await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::InvalidTransition { action: "fund", ref state, .. } if state == "funded"
    ));
    assert_eq!(want.balance_of(alice).await.unwrap(), to_wei(2000, 18));
    assert_eq!(orchestrator.report().steps.len(), steps_before);
}

#[tokio::test]
async fn test_funding_requires_exact_resulting_balance() {
    let (_chain, mut orchestrator) = orchestrator().await;
    let want = orchestrator.vault().unwrap().want.clone();
    let whale = simulated_config().vault.whale;
    let bob = orchestrator.participant("bob").unwrap().address;

    // bob already holds some want before the harness funds him
    want.transfer(whale, bob, to_wei(1, 18)).await.unwrap();

    let err = orchestrator.fund("bob", to_wei(1000, 18)).await.unwrap_err();
    assert!(matches!(err, HarnessError::Assertion(_)));
    assert_eq!(orchestrator.participant("bob").unwrap().state, ParticipantState::Unfunded);
}

#[tokio::test]
async fn test_deposit_before_funding_is_rejected() {
    let (_chain, mut orchestrator) = orchestrator().await;
    let steps_before = orchestrator.report().steps.len();

    let err = orchestrator.deposit("bob", Some(to_wei(1, 18))).await.unwrap_err();
    assert!(matches!(err, HarnessError::InvalidTransition { action: "deposit", .. }));
    assert_eq!(orchestrator.participant("bob").unwrap().state, ParticipantState::Unfunded);
    assert_eq!(orchestrator.report().steps.len(), steps_before);

    let err = orchestrator.fund("mallory", U256::from(1u64)).await.unwrap_err();
    assert!(matches!(err, HarnessError::UnknownParticipant(_)));
}

#[tokio::test]
async fn test_harvest_cycle_grows_pending_rewards() {
    let (_chain, mut orchestrator) = orchestrator().await;
    orchestrator.fund("alice", to_wei(2000, 18)).await.unwrap();
    let shares = orchestrator.deposit("alice", None).await.unwrap();
    assert_eq!(shares, to_wei(2000, 18));

    let vault = orchestrator.vault().unwrap().clone();
    let alice = orchestrator.participant("alice").unwrap().address;
    // the deposit spent the whole approval
    assert_eq!(vault.want.allowance(alice, vault.jar.address()).await.unwrap(), U256::ZERO);
    assert_eq!(vault.strategy.balance_of_pool().await.unwrap(), to_wei(2000, 18));

    orchestrator.harvest().await.unwrap();
    assert_eq!(orchestrator.cursor().elapsed(), 30 * DAY);

    // harvested ALCX sits in the strategy; the keep fee went to treasury
    assert!(vault.strategy.pending_reward().await.unwrap() > U256::ZERO);
    let treasury = orchestrator.roles().treasury;
    assert!(vault.reward.balance_of(treasury).await.unwrap() > U256::ZERO);
    assert_eq!(vault.strategy.harvestable().await.unwrap(), U256::ZERO);

    orchestrator.advance_time(Duration::from_secs(DAY)).await.unwrap();
    assert!(vault.strategy.harvestable().await.unwrap() > U256::ZERO);
    assert!(vault.strategy.alcx_farm_harvestable().await.unwrap() > U256::ZERO);
}

#[tokio::test]
async fn test_withdraw_without_accrual_fails_growth_assertion() {
    let (_chain, mut orchestrator) = orchestrator().await;
    orchestrator.fund("alice", to_wei(2000, 18)).await.unwrap();
    orchestrator.deposit("alice", None).await.unwrap();

    let err = orchestrator.withdraw_all("alice", true).await.unwrap_err();
    assert!(matches!(err, HarnessError::Assertion(_)));
    // the withdrawal itself went through; only the state update is skipped
    assert_eq!(orchestrator.participant("alice").unwrap().state, ParticipantState::Deposited);

    let step = orchestrator.report().steps.last().unwrap();
    assert_eq!(step.action, "withdraw_all");
    assert_eq!(step.tx_hashes.len(), 1);
    assert_eq!(step.reward_before, Some(U256::ZERO));
    assert_eq!(step.reward_after, step.reward_before);
}

#[tokio::test]
async fn test_rewards_grow_under_another_interleaving() {
    let (_chain, mut orchestrator) = orchestrator().await;
    orchestrator.fund("alice", to_wei(2000, 18)).await.unwrap();
    orchestrator.fund("bob", to_wei(1000, 18)).await.unwrap();
    orchestrator.fund("john", to_wei(2500, 18)).await.unwrap();

    orchestrator.deposit("john", None).await.unwrap();
    orchestrator.deposit("bob", None).await.unwrap();
    orchestrator.harvest().await.unwrap();
    orchestrator.withdraw_all("bob", true).await.unwrap();

    orchestrator.deposit("alice", None).await.unwrap();
    orchestrator.harvest().await.unwrap();
    let (before, after) = orchestrator.withdraw_all("john", true).await.unwrap();
    assert!(after > before);
    let (before, after) = orchestrator.withdraw_all("alice", true).await.unwrap();
    assert!(after > before);

    let want = orchestrator.vault().unwrap().want.clone();
    for (name, units) in [("alice", 2000), ("bob", 1000), ("john", 2500)] {
        let participant = orchestrator.participant(name).unwrap();
        assert_eq!(participant.state, ParticipantState::Withdrawn);
        assert_eq!(want.balance_of(participant.address).await.unwrap(), to_wei(units, 18));
    }
    assert_eq!(orchestrator.cursor().elapsed(), 60 * DAY);
}

#[tokio::test]
async fn test_only_governance_can_harvest() {
    let (_chain, orchestrator) = orchestrator().await;
    let alice = orchestrator.participant("alice").unwrap().address;

    let err = orchestrator.vault().unwrap().strategy.harvest(alice).await.unwrap_err();
    match err {
        ChainError::Reverted { reason, .. } => assert_eq!(reason, "!authorized"),
        other => panic!("expected revert, got {:?}", other),
    }
}

#[tokio::test]
async fn test_harvest_rewards_scenario() {
    let config = simulated_config();
    let chain = Arc::new(SimulatedChain::from_config(&config));
    let scenario = Scenario::builtin("harvest-rewards").unwrap();
    let metrics = Arc::new(HarnessMetrics::new().unwrap());

    let mut runner = ScenarioRunner::new(chain.clone(), &config, &scenario)
        .await
        .unwrap()
        .with_metrics(metrics.clone());
    let report = runner.run(&scenario).await.unwrap();

    assert!(report.success);
    assert_eq!(report.elapsed_seconds, 74 * DAY);
    assert_eq!(report.contracts.len(), 5);

    let withdrawals: Vec<_> = report.steps.iter().filter(|s| s.action == "withdraw_all").collect();
    assert_eq!(withdrawals.len(), 4);
    for step in withdrawals {
        assert!(step.reward_after > step.reward_before, "{:?}", step);
    }

    // everyone got their want back
    let want = Erc20::attach(chain.clone(), "want", config.vault.want);
    for participant in runner.orchestrator().participants() {
        assert_eq!(participant.state, ParticipantState::Withdrawn);
        assert!(want.balance_of(participant.address).await.unwrap() > U256::ZERO);
    }
    assert_eq!(want.balance_of(participant_address(&runner, "john")).await.unwrap(), to_wei(2500, 18));

    assert_eq!(metrics.harvests.get(), 4.0);
    assert_eq!(metrics.transactions_reverted.get(), 0.0);
}

#[tokio::test]
async fn test_full_suite_shares_chain_state() {
    let config = simulated_config();
    let chain = Arc::new(SimulatedChain::from_config(&config));
    let scenario = Scenario::builtin("full-suite").unwrap();

    let mut runner = ScenarioRunner::new(chain.clone(), &config, &scenario).await.unwrap();
    let report = runner.run(&scenario).await.unwrap();
    assert!(report.success);

    let pulls: Vec<_> = report
        .steps
        .iter()
        .filter(|s| s.action == "controller_withdraw_all")
        .collect();
    assert_eq!(pulls.len(), 2);
    // first pull returns the whole pool, second finds nothing left
    assert_eq!(pulls[0].amount, Some(to_wei(3000, 18)));
    assert_eq!(pulls[1].amount, Some(U256::ZERO));

    let jar = runner.orchestrator().vault().unwrap().jar.clone();
    assert_eq!(jar.total_supply().await.unwrap(), U256::ZERO);
    assert!(chain.timestamp().await.unwrap() > 0);
}

#[tokio::test]
async fn test_failed_run_keeps_partial_report() {
    let config = simulated_config();
    let chain = Arc::new(SimulatedChain::from_config(&config));
    let scenario = Scenario {
        name: "early-withdraw".to_string(),
        description: String::new(),
        participants: ParticipantSpec::defaults(),
        steps: vec![
            Step::Fund {
                participant: "bob".to_string(),
                amount: 1000,
            },
            Step::WithdrawAll {
                participant: "bob".to_string(),
                expect_reward_increase: true,
            },
            Step::Harvest,
        ],
    };

    let mut runner = ScenarioRunner::new(chain, &config, &scenario).await.unwrap();
    let err = runner.run(&scenario).await.unwrap_err();
    assert!(matches!(err, HarnessError::InvalidTransition { .. }));

    let report = runner.report();
    assert!(!report.success);
    assert!(report.error.as_deref().unwrap_or_default().contains("bob"));
    // provision + fund, nothing after the failing step
    assert_eq!(report.steps.len(), 2);
}

#[tokio::test]
async fn test_undeclared_participant_rejected_up_front() {
    let config = simulated_config();
    let chain = Arc::new(SimulatedChain::from_config(&config));
    let scenario = Scenario {
        name: "typo".to_string(),
        description: String::new(),
        participants: ParticipantSpec::defaults(),
        steps: vec![Step::Earn {
            participant: "jon".to_string(),
        }],
    };

    let result = ScenarioRunner::new(chain.clone(), &config, &scenario).await;
    assert!(matches!(result, Err(HarnessError::UnknownParticipant(name)) if name == "jon"));
    // nothing was deployed
    assert_eq!(chain.block_number().await.unwrap(), 13_000_000);
}

fn participant_address(runner: &ScenarioRunner, name: &str) -> alloy::primitives::Address {
    runner.orchestrator().participant(name).unwrap().address
}
