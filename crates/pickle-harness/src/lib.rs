// Pickle harness library
// Deployment flow and vault lifecycle orchestration, exposed for the binaries and tests

pub mod chains;
pub mod config;
pub mod contracts;
pub mod deploy;
pub mod error;
pub mod keystore;
pub mod metrics;
pub mod node;
pub mod orchestrator;
pub mod report;
pub mod scenario;

// Re-export commonly used types for convenience
pub use chains::{Chain, ChainError, RpcChain, SimulatedChain};
pub use config::{DeployStep, HarnessConfig};
pub use deploy::{Deployer, DeploymentOutcome};
pub use error::{HarnessError, HarnessResult};
pub use keystore::{KeyManager, KeyManagerConfig, KeyError};
pub use metrics::HarnessMetrics;
pub use orchestrator::{LifecycleOrchestrator, ParticipantSpec, ParticipantState, TimeCursor};
pub use report::RunReport;
pub use scenario::{Scenario, ScenarioRunner, Step};
