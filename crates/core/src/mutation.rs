use crate::error::CoreError;
use crate::ids::{EntityKey, MutationId};

/// Lifecycle of one mutation attempt. There is exactly one path through it:
/// `Idle -> OptimisticApplied -> InFlight -> Committed | Reverted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationState {
    Idle,
    OptimisticApplied,
    InFlight,
    Committed,
    Reverted,
}

impl MutationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::OptimisticApplied => "optimistic_applied",
            Self::InFlight => "in_flight",
            Self::Committed => "committed",
            Self::Reverted => "reverted",
        }
    }

    pub fn can_advance_to(&self, next: MutationState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::OptimisticApplied)
                | (Self::OptimisticApplied, Self::InFlight)
                | (Self::InFlight, Self::Committed)
                | (Self::InFlight, Self::Reverted)
        )
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Committed | Self::Reverted)
    }
}

#[derive(Debug, Clone)]
pub struct MutationAttempt {
    pub id: MutationId,
    pub key: EntityKey,
    state: MutationState,
}

impl MutationAttempt {
    pub fn new(key: EntityKey) -> Self {
        Self {
            id: MutationId::new(),
            key,
            state: MutationState::Idle,
        }
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    pub fn advance(&mut self, next: MutationState) -> Result<(), CoreError> {
        if !self.state.can_advance_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut attempt = MutationAttempt::new(EntityKey::order(7));
        attempt.advance(MutationState::OptimisticApplied).unwrap();
        attempt.advance(MutationState::InFlight).unwrap();
        attempt.advance(MutationState::Committed).unwrap();
        assert!(attempt.state().is_settled());
    }

    #[test]
    fn cannot_skip_optimistic_apply() {
        let mut attempt = MutationAttempt::new(EntityKey::order(7));
        let err = attempt.advance(MutationState::InFlight).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { from: "idle", to: "in_flight" }));
        assert_eq!(attempt.state(), MutationState::Idle);
    }

    #[test]
    fn settled_attempts_are_final() {
        let mut attempt = MutationAttempt::new(EntityKey::order(7));
        attempt.advance(MutationState::OptimisticApplied).unwrap();
        attempt.advance(MutationState::InFlight).unwrap();
        attempt.advance(MutationState::Reverted).unwrap();
        assert!(attempt.advance(MutationState::Committed).is_err());
    }
}
