//! Mapping from the ledger's workflow status ordinal to [`WorkflowPhase`].

use shared::{domain::WorkflowPhase, error::UnknownPhaseError};

/// Translates the remote status ordinal. Any ordinal outside `0..=5` is an error.
pub fn translate(ordinal: u64) -> Result<WorkflowPhase, UnknownPhaseError> {
    match ordinal {
        0 => Ok(WorkflowPhase::RegisteringVoters),
        1 => Ok(WorkflowPhase::ProposalsRegistrationStarted),
        2 => Ok(WorkflowPhase::ProposalsRegistrationEnded),
        3 => Ok(WorkflowPhase::VotingSessionStarted),
        4 => Ok(WorkflowPhase::VotingSessionEnded),
        5 => Ok(WorkflowPhase::VotesTallied),
        ordinal => Err(UnknownPhaseError { ordinal }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ordinals_agree_with_phase_ordinals() {
        for phase in WorkflowPhase::ALL {
            assert_eq!(translate(phase.ordinal()), Ok(phase));
        }
    }

    #[test]
    fn ordinals_outside_the_protocol_fail_loudly() {
        for ordinal in [6, 7, 42, 255, 256, u64::MAX] {
            assert_eq!(translate(ordinal), Err(UnknownPhaseError { ordinal }));
        }
    }
}
