//! Single-writer session store: the local view of the remote voting process.
//!
//! [`SessionState`] is only changed through [`SessionState::apply`]; every accepted
//! [`Transition`] bumps the revision so readers can take a fresh [`SessionSnapshot`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    domain::{Address, NetworkId, ProposalId, TxHash, WorkflowPhase},
    protocol::EventKind,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{InconsistentWinnerError, TransitionError},
    gateway::Identity,
    phase,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Syncing,
    Ready,
    Stale,
    Closed,
}

impl SessionStatus {
    pub fn accepts_observations(self) -> bool {
        matches!(self, SessionStatus::Syncing | SessionStatus::Ready)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Voter {
    pub address: Address,
    pub is_registered: bool,
    pub has_voted: bool,
    pub voted_proposal_id: Option<ProposalId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub description: String,
    pub submitter: Address,
    pub vote_count: u64,
    pub tx_hash: Option<TxHash>,
}

/// Result of the pinned reads taken when a session (re)starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialRead {
    pub caller: Address,
    pub network_id: NetworkId,
    pub owner: Address,
    pub phase_ordinal: u64,
    pub sync_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Init(InitialRead),
    SyncCompleted,
    PhaseChanged(u64),
    WinnerResolved(ProposalId),
    ProposalObserved(Proposal),
    VoterObserved(Address),
    VoteObserved {
        voter: Address,
        proposal_id: ProposalId,
        /// Already counted by the pinned proposal read.
        reflected: bool,
    },
    HistoryDegraded(EventKind),
    IdentityChanged(Identity),
    Teardown,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Init(_) => "init",
            Transition::SyncCompleted => "sync_completed",
            Transition::PhaseChanged(_) => "phase_changed",
            Transition::WinnerResolved(_) => "winner_resolved",
            Transition::ProposalObserved(_) => "proposal_observed",
            Transition::VoterObserved(_) => "voter_observed",
            Transition::VoteObserved { .. } => "vote_observed",
            Transition::HistoryDegraded(_) => "history_degraded",
            Transition::IdentityChanged(_) => "identity_changed",
            Transition::Teardown => "teardown",
        }
    }
}

/// Follow-up work requested by a transition. The reducer never performs I/O itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ReadWinner,
    Rebuild,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub generation: u64,
    pub revision: u64,
    pub phase: Option<WorkflowPhase>,
    pub caller: Option<Address>,
    pub network_id: Option<NetworkId>,
    pub owner: Option<Address>,
    pub is_owner: bool,
    pub is_registered_voter: bool,
    pub voters: Vec<Voter>,
    pub proposals: Vec<Proposal>,
    pub winner_id: Option<ProposalId>,
    pub degraded: Vec<EventKind>,
    pub sync_height: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn proposal(&self, id: ProposalId) -> Option<&Proposal> {
        self.proposals.iter().find(|proposal| proposal.id == id)
    }

    pub fn voter(&self, address: &Address) -> Option<&Voter> {
        self.voters.iter().find(|voter| &voter.address == address)
    }

    pub fn caller_voter(&self) -> Option<&Voter> {
        self.caller.as_ref().and_then(|caller| self.voter(caller))
    }

    pub fn winner(&self) -> Option<&Proposal> {
        self.winner_id.and_then(|id| self.proposal(id))
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

#[derive(Debug)]
pub struct SessionState {
    status: SessionStatus,
    generation: u64,
    revision: u64,
    phase: Option<WorkflowPhase>,
    caller: Option<Address>,
    network_id: Option<NetworkId>,
    owner: Option<Address>,
    voters: BTreeMap<Address, Voter>,
    proposals: BTreeMap<ProposalId, Proposal>,
    winner_id: Option<ProposalId>,
    degraded: BTreeSet<EventKind>,
    sync_height: Option<u64>,
    updated_at: DateTime<Utc>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            generation: 0,
            revision: 0,
            phase: None,
            caller: None,
            network_id: None,
            owner: None,
            voters: BTreeMap::new(),
            proposals: BTreeMap::new(),
            winner_id: None,
            degraded: BTreeSet::new(),
            sync_height: None,
            updated_at: Utc::now(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> Option<WorkflowPhase> {
        self.phase
    }

    pub fn caller(&self) -> Option<&Address> {
        self.caller.as_ref()
    }

    pub fn has_proposal(&self, id: ProposalId) -> bool {
        self.proposals.contains_key(&id)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let is_owner = match (&self.caller, &self.owner) {
            (Some(caller), Some(owner)) => caller == owner,
            _ => false,
        };
        let is_registered_voter = self
            .caller
            .as_ref()
            .and_then(|caller| self.voters.get(caller))
            .is_some_and(|voter| voter.is_registered);

        SessionSnapshot {
            status: self.status,
            generation: self.generation,
            revision: self.revision,
            phase: self.phase,
            caller: self.caller.clone(),
            network_id: self.network_id,
            owner: self.owner.clone(),
            is_owner,
            is_registered_voter,
            voters: self.voters.values().cloned().collect(),
            proposals: self.proposals.values().cloned().collect(),
            winner_id: self.winner_id,
            degraded: self.degraded.iter().copied().collect(),
            sync_height: self.sync_height,
            updated_at: self.updated_at,
        }
    }

    /// Applies one named transition atomically. On error nothing is changed.
    pub fn apply(&mut self, transition: Transition) -> Result<Vec<Effect>, TransitionError> {
        let name = transition.name();
        let effects = match transition {
            Transition::Init(read) => self.init(read)?,
            Transition::SyncCompleted => {
                if self.status != SessionStatus::Syncing {
                    return Err(self.not_accepting(name));
                }
                self.status = SessionStatus::Ready;
                info!(
                    generation = self.generation,
                    voters = self.voters.len(),
                    proposals = self.proposals.len(),
                    "session: ready"
                );
                Vec::new()
            }
            Transition::PhaseChanged(ordinal) => {
                self.require_observing(name)?;
                self.phase_changed(ordinal)?
            }
            Transition::WinnerResolved(winner) => {
                self.require_observing(name)?;
                if self.phase != Some(WorkflowPhase::VotesTallied) {
                    let err = InconsistentWinnerError {
                        winner,
                        phase: self.phase,
                    };
                    error!(winner = winner.0, phase = ?self.phase, "session: winner observed before tally");
                    return Err(err.into());
                }
                self.winner_id = Some(winner);
                Vec::new()
            }
            Transition::ProposalObserved(proposal) => {
                self.require_observing(name)?;
                self.proposal_observed(proposal);
                Vec::new()
            }
            Transition::VoterObserved(address) => {
                self.require_observing(name)?;
                self.voters.entry(address.clone()).or_insert_with(|| Voter {
                    address,
                    is_registered: true,
                    has_voted: false,
                    voted_proposal_id: None,
                });
                Vec::new()
            }
            Transition::VoteObserved {
                voter,
                proposal_id,
                reflected,
            } => {
                self.require_observing(name)?;
                self.vote_observed(voter, proposal_id, reflected)?;
                Vec::new()
            }
            Transition::HistoryDegraded(kind) => {
                self.require_observing(name)?;
                self.degraded.insert(kind);
                Vec::new()
            }
            Transition::IdentityChanged(identity) => {
                if self.status == SessionStatus::Closed {
                    return Err(self.not_accepting(name));
                }
                if matches!(self.status, SessionStatus::Syncing | SessionStatus::Ready) {
                    self.status = SessionStatus::Stale;
                }
                self.discard_derived();
                self.caller = Some(identity.account);
                self.network_id = Some(identity.network_id);
                vec![Effect::Rebuild]
            }
            Transition::Teardown => {
                self.discard_derived();
                self.status = SessionStatus::Closed;
                Vec::new()
            }
        };

        self.revision += 1;
        self.updated_at = Utc::now();
        debug!(
            transition = name,
            status = ?self.status,
            revision = self.revision,
            "session: transition applied"
        );
        Ok(effects)
    }

    fn init(&mut self, read: InitialRead) -> Result<Vec<Effect>, TransitionError> {
        if !matches!(
            self.status,
            SessionStatus::Uninitialized | SessionStatus::Stale
        ) {
            return Err(self.not_accepting("init"));
        }
        let phase = phase::translate(read.phase_ordinal)?;

        self.discard_derived();
        self.status = SessionStatus::Syncing;
        self.generation += 1;
        self.phase = Some(phase);
        self.caller = Some(read.caller);
        self.network_id = Some(read.network_id);
        self.owner = Some(read.owner);
        self.sync_height = Some(read.sync_height);

        if phase == WorkflowPhase::VotesTallied {
            Ok(vec![Effect::ReadWinner])
        } else {
            Ok(Vec::new())
        }
    }

    fn phase_changed(&mut self, ordinal: u64) -> Result<Vec<Effect>, TransitionError> {
        let observed = phase::translate(ordinal)?;
        if let Some(current) = self.phase {
            if observed < current {
                return Err(TransitionError::PhaseRegression { current, observed });
            }
            if observed == current {
                return Ok(Vec::new());
            }
            if current.next() != Some(observed) {
                warn!(from = %current, to = %observed, "session: phase skipped ahead");
            }
        }
        info!(phase = %observed, "session: phase changed");
        self.phase = Some(observed);
        if observed == WorkflowPhase::VotesTallied {
            Ok(vec![Effect::ReadWinner])
        } else {
            Ok(Vec::new())
        }
    }

    fn proposal_observed(&mut self, proposal: Proposal) {
        match self.proposals.get_mut(&proposal.id) {
            Some(existing) => {
                if existing.description != proposal.description
                    || existing.submitter != proposal.submitter
                {
                    warn!(
                        proposal_id = proposal.id.0,
                        "session: ignoring changed immutable proposal fields"
                    );
                }
                existing.vote_count = proposal.vote_count;
            }
            None => {
                self.proposals.insert(proposal.id, proposal);
            }
        }
    }

    fn vote_observed(
        &mut self,
        voter: Address,
        proposal_id: ProposalId,
        reflected: bool,
    ) -> Result<(), TransitionError> {
        let Some(proposal) = self.proposals.get_mut(&proposal_id) else {
            return Err(TransitionError::UnknownProposal(proposal_id));
        };
        if !reflected {
            proposal.vote_count += 1;
        }
        match self.voters.get_mut(&voter) {
            Some(record) => {
                record.has_voted = true;
                record.voted_proposal_id = Some(proposal_id);
            }
            None => warn!(voter = %voter, "session: vote from a voter never seen registering"),
        }
        Ok(())
    }

    fn require_observing(&self, transition: &'static str) -> Result<(), TransitionError> {
        if self.status.accepts_observations() {
            Ok(())
        } else {
            Err(self.not_accepting(transition))
        }
    }

    fn not_accepting(&self, transition: &'static str) -> TransitionError {
        TransitionError::NotAccepting {
            transition,
            status: self.status,
        }
    }

    fn discard_derived(&mut self) {
        self.phase = None;
        self.owner = None;
        self.voters.clear();
        self.proposals.clear();
        self.winner_id = None;
        self.degraded.clear();
        self.sync_height = None;
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
