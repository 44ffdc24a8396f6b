// Record of an orchestrated run, serialised to JSON after the run

use std::path::Path;

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contracts::ContractHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scenario: String,
    pub chain_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub contracts: Vec<ContractRecord>,
    pub steps: Vec<StepRecord>,
    /// Total seconds the chain clock was moved forward
    pub elapsed_seconds: u64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRecord {
    pub name: String,
    pub address: Address,
}

impl From<ContractHandle> for ContractRecord {
    fn from(handle: ContractHandle) -> Self {
        Self {
            name: handle.name.to_string(),
            address: handle.address,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub action: String,
    pub participant: Option<String>,
    pub tx_hashes: Vec<B256>,
    pub amount: Option<U256>,
    pub reward_before: Option<U256>,
    pub reward_after: Option<U256>,
    /// Time cursor after the step
    pub elapsed_seconds: u64,
    pub completed_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn new(index: usize, action: impl Into<String>, participant: Option<&str>) -> Self {
        Self {
            index,
            action: action.into(),
            participant: participant.map(str::to_string),
            tx_hashes: Vec::new(),
            amount: None,
            reward_before: None,
            reward_after: None,
            elapsed_seconds: 0,
            completed_at: Utc::now(),
        }
    }
}

impl RunReport {
    pub fn new(scenario: impl Into<String>, chain_id: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scenario: scenario.into(),
            chain_id,
            started_at: Utc::now(),
            finished_at: None,
            contracts: Vec::new(),
            steps: Vec::new(),
            elapsed_seconds: 0,
            success: false,
            error: None,
        }
    }

    pub fn finish(&mut self, elapsed_seconds: u64, error: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.elapsed_seconds = elapsed_seconds;
        self.success = error.is_none();
        self.error = error;
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
