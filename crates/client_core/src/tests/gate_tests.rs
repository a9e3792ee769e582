use chrono::Utc;
use shared::domain::NetworkId;

use super::*;
use crate::session::{Proposal, Voter};

fn addr(n: u8) -> Address {
    format!("0x{:040x}", n).parse().expect("address")
}

fn snapshot(phase: WorkflowPhase, is_owner: bool, is_registered_voter: bool) -> SessionSnapshot {
    let caller = addr(if is_owner { 1 } else { 3 });
    let mut voters = vec![Voter {
        address: addr(4),
        is_registered: true,
        has_voted: false,
        voted_proposal_id: None,
    }];
    if is_registered_voter {
        voters.push(Voter {
            address: caller.clone(),
            is_registered: true,
            has_voted: false,
            voted_proposal_id: None,
        });
    }
    SessionSnapshot {
        status: SessionStatus::Ready,
        generation: 1,
        revision: 10,
        phase: Some(phase),
        caller: Some(caller),
        network_id: Some(NetworkId(1337)),
        owner: Some(addr(1)),
        is_owner,
        is_registered_voter,
        voters,
        proposals: vec![Proposal {
            id: ProposalId(1),
            description: "Lunch".into(),
            submitter: addr(4),
            vote_count: 0,
            tx_hash: None,
        }],
        winner_id: None,
        degraded: Vec::new(),
        sync_height: Some(12),
        updated_at: Utc::now(),
    }
}

fn valid_action(kind: ActionKind) -> Action {
    match kind {
        ActionKind::RegisterVoter => Action::RegisterVoter { voter: addr(9) },
        ActionKind::OpenProposals => Action::OpenProposals,
        ActionKind::CloseProposals => Action::CloseProposals,
        ActionKind::OpenVoting => Action::OpenVoting,
        ActionKind::CloseVoting => Action::CloseVoting,
        ActionKind::Tally => Action::Tally,
        ActionKind::SubmitProposal => Action::SubmitProposal {
            description: "More coffee".into(),
        },
        ActionKind::CastVote => Action::CastVote {
            proposal_id: ProposalId(1),
        },
    }
}

#[test]
fn every_action_phase_and_role_combination_follows_the_table() {
    let roles = [(true, false), (false, true), (false, false), (true, true)];
    for kind in ActionKind::ALL {
        for phase in WorkflowPhase::ALL {
            for (is_owner, is_voter) in roles {
                let view = snapshot(phase, is_owner, is_voter);
                let outcome = authorize(&valid_action(kind), &view);

                let has_role = match kind.required_role() {
                    Role::Owner => is_owner,
                    Role::RegisteredVoter => is_voter,
                };
                let expected = if phase != kind.required_phase() {
                    Some(DenialCategory::Phase)
                } else if !has_role {
                    Some(DenialCategory::Role)
                } else {
                    None
                };

                assert_eq!(
                    outcome.as_ref().err().map(|denied| denied.reason.category()),
                    expected,
                    "{kind} in {phase} (owner={is_owner}, voter={is_voter}): {outcome:?}"
                );
                if let Err(denied) = outcome {
                    assert_eq!(denied.action, kind);
                }
            }
        }
    }
}

#[test]
fn unsynchronised_sessions_deny_everything() {
    for status in [
        SessionStatus::Uninitialized,
        SessionStatus::Syncing,
        SessionStatus::Stale,
        SessionStatus::Closed,
    ] {
        let mut view = snapshot(WorkflowPhase::RegisteringVoters, true, false);
        view.status = status;
        let denied = authorize(&Action::OpenProposals, &view).expect_err("not synced");
        assert_eq!(denied.reason, DenialReason::NotSynced { status });
    }
}

#[test]
fn syncing_voter_is_not_told_it_lacks_the_role() {
    // Mid-replay: the caller's registration has not been applied yet.
    let mut view = snapshot(WorkflowPhase::VotingSessionStarted, false, false);
    view.status = SessionStatus::Syncing;
    let denied = authorize(
        &Action::CastVote {
            proposal_id: ProposalId(1),
        },
        &view,
    )
    .expect_err("still syncing");
    assert_eq!(denied.reason.category(), DenialCategory::NotSynced);
}

#[test]
fn phase_is_reported_before_role() {
    let view = snapshot(WorkflowPhase::VotingSessionStarted, false, true);
    let denied = authorize(&Action::OpenProposals, &view).expect_err("denied");
    assert_eq!(
        denied.reason,
        DenialReason::WrongPhase {
            required: WorkflowPhase::RegisteringVoters,
            current: WorkflowPhase::VotingSessionStarted,
        }
    );
}

#[test]
fn blank_descriptions_are_rejected() {
    let view = snapshot(WorkflowPhase::ProposalsRegistrationStarted, false, true);
    for description in ["", "   ", "\n\t"] {
        let denied = authorize(
            &Action::SubmitProposal {
                description: description.into(),
            },
            &view,
        )
        .expect_err("empty description");
        assert_eq!(denied.reason, DenialReason::EmptyDescription);
        assert_eq!(denied.reason.category(), DenialCategory::Argument);
    }
}

#[test]
fn votes_need_an_existing_proposal_and_a_fresh_voter() {
    let mut view = snapshot(WorkflowPhase::VotingSessionStarted, false, true);
    let denied = authorize(
        &Action::CastVote {
            proposal_id: ProposalId(7),
        },
        &view,
    )
    .expect_err("unknown proposal");
    assert_eq!(denied.reason, DenialReason::UnknownProposal(ProposalId(7)));

    let caller = view.caller.clone().expect("caller");
    for voter in view.voters.iter_mut().filter(|voter| voter.address == caller) {
        voter.has_voted = true;
        voter.voted_proposal_id = Some(ProposalId(1));
    }
    let denied = authorize(
        &Action::CastVote {
            proposal_id: ProposalId(1),
        },
        &view,
    )
    .expect_err("already voted");
    assert_eq!(
        denied.reason,
        DenialReason::AlreadyVoted {
            proposal_id: Some(ProposalId(1)),
        }
    );
    assert_eq!(denied.to_string(), "cast_vote denied: already voted for proposal 1");
}

#[test]
fn registering_a_known_voter_is_rejected() {
    let view = snapshot(WorkflowPhase::RegisteringVoters, true, false);
    let denied = authorize(&Action::RegisterVoter { voter: addr(4) }, &view)
        .expect_err("already registered");
    assert_eq!(denied.reason, DenialReason::AlreadyRegistered(addr(4)));
}

#[test]
fn actions_map_onto_remote_methods() {
    assert_eq!(
        Action::RegisterVoter { voter: addr(9) }.into_method(),
        RemoteMethod::AddVoter { voter: addr(9) }
    );
    assert_eq!(Action::Tally.into_method(), RemoteMethod::TallyVotes);
    assert_eq!(
        Action::CastVote {
            proposal_id: ProposalId(2)
        }
        .into_method(),
        RemoteMethod::SetVote {
            proposal_id: ProposalId(2)
        }
    );
    for kind in ActionKind::ALL {
        assert!(!valid_action(kind).into_method().is_read_only());
    }
}
