// Participants of a run and the clock offset the orchestrator has applied

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Where a participant is in the fund / deposit / withdraw cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    Unfunded,
    Funded,
    Deposited,
    Withdrawn,
}

/// Participant actions that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantAction {
    Fund,
    Deposit,
    WithdrawAll,
}

impl ParticipantAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantAction::Fund => "fund",
            ParticipantAction::Deposit => "deposit",
            ParticipantAction::WithdrawAll => "withdraw_all",
        }
    }
}

impl ParticipantState {
    /// State after `action`, or `None` when the action is not allowed here.
    /// Funding happens once per participant. A withdrawn participant may
    /// deposit again with the want it got back.
    pub fn next(self, action: ParticipantAction) -> Option<ParticipantState> {
        use ParticipantAction::*;
        use ParticipantState::*;

        match (self, action) {
            (Unfunded, Fund) => Some(Funded),
            (Funded | Withdrawn, Deposit) => Some(Deposited),
            (Deposited, WithdrawAll) => Some(Withdrawn),
            _ => None,
        }
    }
}

/// A named participant bound to a node account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSpec {
    pub name: String,
    /// Index into the node's account list
    pub account: usize,
}

impl ParticipantSpec {
    pub fn new(name: impl Into<String>, account: usize) -> Self {
        Self {
            name: name.into(),
            account,
        }
    }

    /// alice, bob and john on accounts 3, 4 and 5
    pub fn defaults() -> Vec<ParticipantSpec> {
        vec![
            ParticipantSpec::new("alice", 3),
            ParticipantSpec::new("bob", 4),
            ParticipantSpec::new("john", 5),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub name: String,
    pub address: Address,
    pub state: ParticipantState,
}

impl Participant {
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
            state: ParticipantState::Unfunded,
        }
    }

    /// Validate `action` without changing anything
    pub fn check(&self, action: ParticipantAction) -> HarnessResult<ParticipantState> {
        self.state
            .next(action)
            .ok_or_else(|| HarnessError::InvalidTransition {
                participant: self.name.clone(),
                action: action.as_str(),
                state: format!("{:?}", self.state).to_lowercase(),
            })
    }
}

/// Total offset applied to the chain clock. Only ever moves forward.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimeCursor {
    elapsed: u64,
}

impl TimeCursor {
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn advance(&mut self, seconds: u64) -> u64 {
        self.elapsed = self.elapsed.saturating_add(seconds);
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use ParticipantAction::*;
        use ParticipantState::*;

        assert_eq!(Unfunded.next(Fund), Some(Funded));
        assert_eq!(Funded.next(Deposit), Some(Deposited));
        assert_eq!(Deposited.next(WithdrawAll), Some(Withdrawn));
        assert_eq!(Withdrawn.next(Deposit), Some(Deposited));

        assert_eq!(Unfunded.next(Deposit), None);
        assert_eq!(Funded.next(WithdrawAll), None);
        assert_eq!(Deposited.next(Deposit), None);
        assert_eq!(Withdrawn.next(WithdrawAll), None);

        // no top-ups
        assert_eq!(Funded.next(Fund), None);
        assert_eq!(Deposited.next(Fund), None);
        assert_eq!(Withdrawn.next(Fund), None);
    }

    #[test]
    fn test_invalid_transition_error() {
        let bob = Participant::new("bob", Address::repeat_byte(4));
        match bob.check(ParticipantAction::WithdrawAll) {
            Err(HarnessError::InvalidTransition { participant, action, state }) => {
                assert_eq!(participant, "bob");
                assert_eq!(action, "withdraw_all");
                assert_eq!(state, "unfunded");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cursor_is_monotonic() {
        let mut cursor = TimeCursor::default();
        assert_eq!(cursor.advance(60 * 60 * 24 * 15), 1_296_000);
        assert_eq!(cursor.advance(0), 1_296_000);
        assert_eq!(cursor.advance(60), 1_296_060);
        assert_eq!(cursor.elapsed(), 1_296_060);
    }
}
