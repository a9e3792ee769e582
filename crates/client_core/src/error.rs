use shared::{
    domain::{EventKey, ProposalId, WorkflowPhase},
    error::UnknownPhaseError,
    protocol::EventKind,
};
use thiserror::Error;

use crate::session::SessionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteCallError {
    #[error("transport failure calling {method}: {message}")]
    Transport {
        method: &'static str,
        message: String,
    },
    #[error("{method} reverted: {reason}")]
    Reverted {
        method: &'static str,
        reason: String,
    },
    #[error("{method} returned a {actual} value, expected {expected}")]
    UnexpectedValue {
        method: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteSubmitError {
    #[error("transport failure submitting {method}: {message}")]
    Transport {
        method: &'static str,
        message: String,
    },
    #[error("{method} rejected by the ledger: {reason}")]
    Rejected {
        method: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to fetch {kind} history: {message}")]
pub struct HistoryFetchError {
    pub kind: EventKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("failed to open {kind} subscription: {message}")]
    Open { kind: EventKind, message: String },
    #[error("{kind} subscription delivered an undecodable event: {message}")]
    Decode { kind: EventKind, message: String },
    #[error("{kind} subscription transport failure: {message}")]
    Transport { kind: EventKind, message: String },
    #[error("{kind} subscription closed by the remote")]
    Closed { kind: EventKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialHistoryReason {
    FetchFailed(String),
    MissingProposals {
        expected: ProposalId,
        found: ProposalId,
    },
}

/// History for one event kind is incomplete; the session continues on live data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("partial {kind} history: {reason:?}")]
pub struct PartialHistoryError {
    pub kind: EventKind,
    pub reason: PartialHistoryReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("winner {winner} observed while phase is {phase:?}")]
pub struct InconsistentWinnerError {
    pub winner: ProposalId,
    pub phase: Option<WorkflowPhase>,
}

/// A live event could not be applied and the feed will not deliver it again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("live {kind} event {key} was not applied, resync to recover: {source}")]
pub struct LostEventError {
    pub kind: EventKind,
    pub key: EventKey,
    pub source: RemoteCallError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("proposal {found} arrived before proposal {expected}")]
    ProposalOutOfSequence {
        expected: ProposalId,
        found: ProposalId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{transition} is not accepted while the session is {status:?}")]
    NotAccepting {
        transition: &'static str,
        status: SessionStatus,
    },
    #[error(transparent)]
    UnknownPhase(#[from] UnknownPhaseError),
    #[error("phase cannot move back from {current} to {observed}")]
    PhaseRegression {
        current: WorkflowPhase,
        observed: WorkflowPhase,
    },
    #[error(transparent)]
    InconsistentWinner(#[from] InconsistentWinnerError),
    #[error("vote references unknown proposal {0}")]
    UnknownProposal(ProposalId),
}

/// Conditions that affect the whole snapshot and are broadcast to every observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncFault {
    #[error(transparent)]
    UnknownPhase(#[from] UnknownPhaseError),
    #[error(transparent)]
    PartialHistory(#[from] PartialHistoryError),
    #[error(transparent)]
    InconsistentWinner(#[from] InconsistentWinnerError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    RemoteCall(#[from] RemoteCallError),
    #[error(transparent)]
    LostEvent(#[from] LostEventError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}
