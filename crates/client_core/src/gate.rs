use std::fmt;

use serde::Serialize;
use shared::{
    domain::{Address, ProposalId, Role, WorkflowPhase},
    protocol::RemoteMethod,
};
use thiserror::Error;

use crate::session::{SessionSnapshot, SessionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RegisterVoter { voter: Address },
    OpenProposals,
    CloseProposals,
    OpenVoting,
    CloseVoting,
    Tally,
    SubmitProposal { description: String },
    CastVote { proposal_id: ProposalId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RegisterVoter,
    OpenProposals,
    CloseProposals,
    OpenVoting,
    CloseVoting,
    Tally,
    SubmitProposal,
    CastVote,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::RegisterVoter,
        ActionKind::OpenProposals,
        ActionKind::CloseProposals,
        ActionKind::OpenVoting,
        ActionKind::CloseVoting,
        ActionKind::Tally,
        ActionKind::SubmitProposal,
        ActionKind::CastVote,
    ];

    pub fn required_phase(self) -> WorkflowPhase {
        match self {
            ActionKind::RegisterVoter | ActionKind::OpenProposals => {
                WorkflowPhase::RegisteringVoters
            }
            ActionKind::CloseProposals | ActionKind::SubmitProposal => {
                WorkflowPhase::ProposalsRegistrationStarted
            }
            ActionKind::OpenVoting => WorkflowPhase::ProposalsRegistrationEnded,
            ActionKind::CloseVoting | ActionKind::CastVote => WorkflowPhase::VotingSessionStarted,
            ActionKind::Tally => WorkflowPhase::VotingSessionEnded,
        }
    }

    pub fn required_role(self) -> Role {
        match self {
            ActionKind::SubmitProposal | ActionKind::CastVote => Role::RegisteredVoter,
            _ => Role::Owner,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::RegisterVoter => "register_voter",
            ActionKind::OpenProposals => "open_proposals",
            ActionKind::CloseProposals => "close_proposals",
            ActionKind::OpenVoting => "open_voting",
            ActionKind::CloseVoting => "close_voting",
            ActionKind::Tally => "tally",
            ActionKind::SubmitProposal => "submit_proposal",
            ActionKind::CastVote => "cast_vote",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::RegisterVoter { .. } => ActionKind::RegisterVoter,
            Action::OpenProposals => ActionKind::OpenProposals,
            Action::CloseProposals => ActionKind::CloseProposals,
            Action::OpenVoting => ActionKind::OpenVoting,
            Action::CloseVoting => ActionKind::CloseVoting,
            Action::Tally => ActionKind::Tally,
            Action::SubmitProposal { .. } => ActionKind::SubmitProposal,
            Action::CastVote { .. } => ActionKind::CastVote,
        }
    }

    pub fn into_method(self) -> RemoteMethod {
        match self {
            Action::RegisterVoter { voter } => RemoteMethod::AddVoter { voter },
            Action::OpenProposals => RemoteMethod::StartProposalsRegistering,
            Action::CloseProposals => RemoteMethod::EndProposalsRegistering,
            Action::OpenVoting => RemoteMethod::StartVotingSession,
            Action::CloseVoting => RemoteMethod::EndVotingSession,
            Action::Tally => RemoteMethod::TallyVotes,
            Action::SubmitProposal { description } => RemoteMethod::AddProposal { description },
            Action::CastVote { proposal_id } => RemoteMethod::SetVote { proposal_id },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialCategory {
    NotSynced,
    Phase,
    Role,
    Argument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    NotSynced {
        status: SessionStatus,
    },
    WrongPhase {
        required: WorkflowPhase,
        current: WorkflowPhase,
    },
    WrongRole {
        required: Role,
    },
    EmptyDescription,
    UnknownProposal(ProposalId),
    AlreadyVoted {
        proposal_id: Option<ProposalId>,
    },
    AlreadyRegistered(Address),
}

impl DenialReason {
    pub fn category(&self) -> DenialCategory {
        match self {
            DenialReason::NotSynced { .. } => DenialCategory::NotSynced,
            DenialReason::WrongPhase { .. } => DenialCategory::Phase,
            DenialReason::WrongRole { .. } => DenialCategory::Role,
            DenialReason::EmptyDescription
            | DenialReason::UnknownProposal(_)
            | DenialReason::AlreadyVoted { .. }
            | DenialReason::AlreadyRegistered(_) => DenialCategory::Argument,
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::NotSynced { status } => {
                write!(f, "session is not synchronised (status {status:?})")
            }
            DenialReason::WrongPhase { required, current } => {
                write!(f, "requires phase {required}, current phase is {current}")
            }
            DenialReason::WrongRole { required } => write!(f, "requires the {required} role"),
            DenialReason::EmptyDescription => f.write_str("proposal description is empty"),
            DenialReason::UnknownProposal(id) => write!(f, "proposal {id} does not exist"),
            DenialReason::AlreadyVoted { proposal_id: Some(id) } => {
                write!(f, "already voted for proposal {id}")
            }
            DenialReason::AlreadyVoted { proposal_id: None } => f.write_str("already voted"),
            DenialReason::AlreadyRegistered(voter) => {
                write!(f, "{voter} is already a registered voter")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} denied: {reason}")]
pub struct ActionDenied {
    pub action: ActionKind,
    pub reason: DenialReason,
}

/// Decides whether `action` may be submitted given `snapshot`.
///
/// Checks run in order: synchronisation, phase, role, then arguments. Approval does
/// not guarantee the ledger accepts the transaction.
pub fn authorize(action: &Action, snapshot: &SessionSnapshot) -> Result<(), ActionDenied> {
    let kind = action.kind();
    let deny = |reason| ActionDenied {
        action: kind,
        reason,
    };

    // Collections are incomplete until history has been replayed.
    let current = match (snapshot.status, snapshot.phase) {
        (SessionStatus::Ready, Some(phase)) => phase,
        _ => {
            return Err(deny(DenialReason::NotSynced {
                status: snapshot.status,
            }))
        }
    };

    let required = kind.required_phase();
    if current != required {
        return Err(deny(DenialReason::WrongPhase { required, current }));
    }

    let role = kind.required_role();
    let has_role = match role {
        Role::Owner => snapshot.is_owner,
        Role::RegisteredVoter => snapshot.is_registered_voter,
    };
    if !has_role {
        return Err(deny(DenialReason::WrongRole { required: role }));
    }

    match action {
        Action::RegisterVoter { voter } => {
            if snapshot.voter(voter).is_some_and(|record| record.is_registered) {
                return Err(deny(DenialReason::AlreadyRegistered(voter.clone())));
            }
        }
        Action::SubmitProposal { description } => {
            if description.trim().is_empty() {
                return Err(deny(DenialReason::EmptyDescription));
            }
        }
        Action::CastVote { proposal_id } => {
            if let Some(voter) = snapshot.caller_voter().filter(|voter| voter.has_voted) {
                return Err(deny(DenialReason::AlreadyVoted {
                    proposal_id: voter.voted_proposal_id,
                }));
            }
            if snapshot.proposal(*proposal_id).is_none() {
                return Err(deny(DenialReason::UnknownProposal(*proposal_id)));
            }
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/gate_tests.rs"]
mod tests;
