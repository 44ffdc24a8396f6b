use thiserror::Error;

use crate::chains::ChainError;
use crate::keystore::KeyError;

/// Errors that abort a deployment or a scenario run
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("participant '{participant}' cannot {action} while {state}")]
    InvalidTransition {
        participant: String,
        action: &'static str,
        state: String,
    },

    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

impl HarnessError {
    /// True when the chain rejected a transaction
    pub fn is_revert(&self) -> bool {
        matches!(self, HarnessError::Chain(ChainError::Reverted { .. }))
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
