// Scenarios as data: an ordered list of participant actions interpreted by
// `ScenarioRunner` on top of the Lifecycle Orchestrator.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::chains::Chain;
use crate::config::HarnessConfig;
use crate::contracts::{to_wei, ArtifactStore};
use crate::error::{HarnessError, HarnessResult};
use crate::metrics::HarnessMetrics;
use crate::orchestrator::{LifecycleOrchestrator, ParticipantSpec};
use crate::report::RunReport;

pub const BUILTIN_SCENARIOS: [&str; 3] = ["harvest-rewards", "withdraw-want", "full-suite"];

const DAY: u64 = 60 * 60 * 24;

/// One scenario step. Amounts are whole want tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Fund {
        participant: String,
        amount: u64,
    },
    Deposit {
        participant: String,
        /// Whole balance when omitted
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<u64>,
    },
    Earn {
        participant: String,
    },
    AdvanceTime {
        #[serde(with = "crate::config::duration")]
        duration: Duration,
    },
    Harvest,
    WithdrawAll {
        participant: String,
        #[serde(default = "default_true")]
        expect_reward_increase: bool,
    },
    ControllerWithdrawAll,
}

fn default_true() -> bool {
    true
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Fund { participant, amount } => write!(f, "fund {} with {}", participant, amount),
            Step::Deposit { participant, amount: Some(amount) } => write!(f, "{} deposits {}", participant, amount),
            Step::Deposit { participant, amount: None } => write!(f, "{} deposits everything", participant),
            Step::Earn { participant } => write!(f, "{} calls earn", participant),
            Step::AdvanceTime { duration } => write!(f, "advance time {}", humantime::format_duration(*duration)),
            Step::Harvest => write!(f, "harvest"),
            Step::WithdrawAll { participant, .. } => write!(f, "{} withdraws all", participant),
            Step::ControllerWithdrawAll => write!(f, "controller withdraws all"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "ParticipantSpec::defaults")]
    pub participants: Vec<ParticipantSpec>,
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Load from a `.json` file, anything else is read as TOML
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let scenario = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        Self::validate(&scenario)?;
        Ok(scenario)
    }

    /// The chain clock moves in whole seconds
    pub fn validate(&self) -> anyhow::Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            if let Step::AdvanceTime { duration } = step {
                if duration.subsec_nanos() != 0 {
                    anyhow::bail!(
                        "step {}: advance_time duration {} is not a whole number of seconds",
                        index,
                        humantime::format_duration(*duration)
                    );
                }
            }
        }
        Ok(())
    }

    /// A built-in scenario by name, otherwise a file path
    pub fn resolve(name_or_path: &str) -> anyhow::Result<Self> {
        match Self::builtin(name_or_path) {
            Some(scenario) => Ok(scenario),
            None => Self::load(name_or_path),
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        let (description, steps) = match name {
            "harvest-rewards" => (
                "Interleaved deposits, two harvest cycles and withdrawals with strict reward growth",
                [funding_steps(), harvest_rewards_steps()].concat(),
            ),
            "withdraw-want" => (
                "Controller pulls want back into the jar before participants withdraw",
                [funding_steps(), withdraw_want_steps()].concat(),
            ),
            "full-suite" => (
                "Both cases back to back on the same chain state",
                [funding_steps(), harvest_rewards_steps(), withdraw_want_steps()].concat(),
            ),
            _ => return None,
        };

        Some(Scenario {
            name: name.to_string(),
            description: description.to_string(),
            participants: ParticipantSpec::defaults(),
            steps,
        })
    }

    /// Participant names used by steps but not declared
    pub fn undeclared_participants(&self) -> Vec<String> {
        let mut missing: Vec<String> = Vec::new();
        for step in &self.steps {
            let name = match step {
                Step::Fund { participant, .. }
                | Step::Deposit { participant, .. }
                | Step::Earn { participant }
                | Step::WithdrawAll { participant, .. } => participant,
                _ => continue,
            };
            if !self.participants.iter().any(|p| &p.name == name) && !missing.contains(name) {
                missing.push(name.clone());
            }
        }
        missing
    }
}

fn fund(participant: &str, amount: u64) -> Step {
    Step::Fund {
        participant: participant.to_string(),
        amount,
    }
}

fn deposit(participant: &str, amount: u64) -> Step {
    Step::Deposit {
        participant: participant.to_string(),
        amount: Some(amount),
    }
}

fn earn(participant: &str) -> Step {
    Step::Earn {
        participant: participant.to_string(),
    }
}

fn advance_days(days: u64) -> Step {
    Step::AdvanceTime {
        duration: Duration::from_secs(days * DAY),
    }
}

fn withdraw_all(participant: &str, expect_reward_increase: bool) -> Step {
    Step::WithdrawAll {
        participant: participant.to_string(),
        expect_reward_increase,
    }
}

fn funding_steps() -> Vec<Step> {
    vec![fund("alice", 2000), fund("bob", 1000), fund("john", 2500)]
}

fn harvest_rewards_steps() -> Vec<Step> {
    vec![
        deposit("alice", 2000),
        Step::Harvest,
        deposit("bob", 1000),
        advance_days(7),
        deposit("john", 2500),
        Step::Harvest,
        withdraw_all("alice", true),
        advance_days(3),
        deposit("alice", 2000),
        advance_days(4),
        withdraw_all("bob", true),
        withdraw_all("john", true),
        withdraw_all("alice", true),
    ]
}

fn withdraw_want_steps() -> Vec<Step> {
    vec![
        deposit("alice", 2000),
        earn("alice"),
        Step::Harvest,
        deposit("bob", 1000),
        earn("bob"),
        Step::Harvest,
        Step::ControllerWithdrawAll,
        withdraw_all("alice", false),
        Step::ControllerWithdrawAll,
        withdraw_all("bob", true),
    ]
}

/// Provisions a vault and interprets scenario steps in order, stopping at the
/// first failure
pub struct ScenarioRunner {
    orchestrator: LifecycleOrchestrator,
    want_decimals: u8,
}

impl ScenarioRunner {
    pub async fn new(chain: Arc<dyn Chain>, config: &HarnessConfig, scenario: &Scenario) -> HarnessResult<Self> {
        scenario
            .validate()
            .map_err(|e| HarnessError::Config(e.to_string()))?;
        let missing = scenario.undeclared_participants();
        if !missing.is_empty() {
            return Err(HarnessError::UnknownParticipant(missing.join(", ")));
        }

        let orchestrator = LifecycleOrchestrator::new(
            chain,
            config.vault.clone(),
            ArtifactStore::from_config(&config.artifacts),
            &scenario.participants,
            &scenario.name,
        )
        .await?;

        Ok(Self {
            orchestrator,
            want_decimals: config.vault.want_decimals,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<HarnessMetrics>) -> Self {
        self.orchestrator = self.orchestrator.with_metrics(metrics);
        self
    }

    pub fn orchestrator(&self) -> &LifecycleOrchestrator {
        &self.orchestrator
    }

    /// Report so far; complete once `run` has returned
    pub fn report(&self) -> &RunReport {
        self.orchestrator.report()
    }

    pub async fn run(&mut self, scenario: &Scenario) -> HarnessResult<RunReport> {
        info!("running scenario '{}' ({} steps)", scenario.name, scenario.steps.len());

        match self.execute(scenario).await {
            Ok(()) => {
                let report = self.orchestrator.finish(None);
                info!(
                    "scenario '{}' passed, clock advanced {}s",
                    scenario.name, report.elapsed_seconds
                );
                Ok(report)
            }
            Err(e) => {
                error!("scenario '{}' failed: {}", scenario.name, e);
                self.orchestrator.finish(Some(&e));
                Err(e)
            }
        }
    }

    async fn execute(&mut self, scenario: &Scenario) -> HarnessResult<()> {
        self.orchestrator.provision().await?;

        for (index, step) in scenario.steps.iter().enumerate() {
            info!("step {}/{}: {}", index + 1, scenario.steps.len(), step);
            self.apply(step).await?;
        }
        Ok(())
    }

    async fn apply(&mut self, step: &Step) -> HarnessResult<()> {
        match step {
            Step::Fund { participant, amount } => {
                let amount = to_wei(*amount, self.want_decimals);
                self.orchestrator.fund(participant, amount).await
            }
            Step::Deposit { participant, amount } => {
                let amount = amount.map(|units| to_wei(units, self.want_decimals));
                self.orchestrator.deposit(participant, amount).await.map(|_| ())
            }
            Step::Earn { participant } => self.orchestrator.earn(participant).await,
            Step::AdvanceTime { duration } => self.orchestrator.advance_time(*duration).await.map(|_| ()),
            Step::Harvest => self.orchestrator.harvest().await,
            Step::WithdrawAll {
                participant,
                expect_reward_increase,
            } => self
                .orchestrator
                .withdraw_all(participant, *expect_reward_increase)
                .await
                .map(|_| ()),
            Step::ControllerWithdrawAll => self.orchestrator.controller_withdraw_all().await.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_steps() {
        let scenario: Scenario = toml::from_str(
            r#"
            name = "short"

            [[steps]]
            action = "fund"
            participant = "alice"
            amount = 2000

            [[steps]]
            action = "deposit"
            participant = "alice"

            [[steps]]
            action = "advance_time"
            duration = "7days"

            [[steps]]
            action = "harvest"

            [[steps]]
            action = "withdraw_all"
            participant = "alice"
            "#,
        )
        .unwrap();

        assert_eq!(scenario.participants, ParticipantSpec::defaults());
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(
            scenario.steps[1],
            Step::Deposit {
                participant: "alice".to_string(),
                amount: None
            }
        );
        assert_eq!(scenario.steps[2], advance_days(7));
        assert_eq!(scenario.steps[4], withdraw_all("alice", true));
    }

    #[test]
    fn test_parse_json_steps() {
        let scenario: Scenario = serde_json::from_str(
            r#"{
                "name": "json",
                "participants": [{ "name": "carol", "account": 6 }],
                "steps": [
                    { "action": "fund", "participant": "carol", "amount": 10 },
                    { "action": "controller_withdraw_all" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(scenario.participants, vec![ParticipantSpec::new("carol", 6)]);
        assert_eq!(scenario.steps[1], Step::ControllerWithdrawAll);
    }

    #[test]
    fn test_builtins() {
        for name in BUILTIN_SCENARIOS {
            let scenario = Scenario::builtin(name).unwrap();
            assert!(scenario.undeclared_participants().is_empty());
            assert_eq!(&scenario.steps[..3], &funding_steps()[..]);
        }
        assert!(Scenario::builtin("nope").is_none());

        let full = Scenario::builtin("full-suite").unwrap();
        assert_eq!(
            full.steps.len(),
            3 + harvest_rewards_steps().len() + withdraw_want_steps().len()
        );
    }

    #[test]
    fn test_shipped_files_match_builtins() {
        let harvest: Scenario = toml::from_str(include_str!("../../scenarios/harvest-rewards.toml")).unwrap();
        assert_eq!(harvest.steps, Scenario::builtin("harvest-rewards").unwrap().steps);

        let withdraw: Scenario = toml::from_str(include_str!("../../scenarios/withdraw-want.toml")).unwrap();
        assert_eq!(withdraw.steps, Scenario::builtin("withdraw-want").unwrap().steps);
    }

    #[test]
    fn test_undeclared_participant_detected() {
        let scenario = Scenario {
            name: "typo".to_string(),
            description: String::new(),
            participants: ParticipantSpec::defaults(),
            steps: vec![fund("alcie", 1), fund("alice", 1), fund("alcie", 2)],
        };
        assert_eq!(scenario.undeclared_participants(), vec!["alcie".to_string()]);
    }

    #[test]
    fn test_sub_second_durations_rejected() {
        let mut scenario = Scenario::builtin("harvest-rewards").unwrap();
        scenario.validate().unwrap();

        scenario.steps.push(Step::AdvanceTime {
            duration: Duration::from_millis(1500),
        });
        let err = scenario.validate().unwrap_err();
        assert!(err.to_string().contains("1s 500ms"), "{}", err);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jitter.toml");
        std::fs::write(
            &path,
            r#"
            name = "jitter"

            [[steps]]
            action = "advance_time"
            duration = "2s 250ms"
            "#,
        )
        .unwrap();
        assert!(Scenario::load(&path).is_err());
    }

    #[test]
    fn test_step_display() {
        assert_eq!(advance_days(3).to_string(), "advance time 3days");
        assert_eq!(withdraw_all("bob", true).to_string(), "bob withdraws all");
    }
}
